//! Eloquence orchestrator core.
//!
//! One [`session::Session`] per connected learner multiplexes the audio
//! transport with the external ASR, LLM and TTS services, enforcing ordering
//! and cancellation across them through a per-session interruption epoch.

pub mod cache;
pub mod clients;
pub mod dialogue;
pub mod emotion;
pub mod error;
pub mod feedback;
pub mod interrupt;
pub mod scenario;
pub mod session;
pub mod speech;
pub mod transport;
pub mod vad;

pub use error::{CoreError, CoreResult};
