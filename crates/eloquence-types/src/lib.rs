pub mod agent;
pub mod audio;
pub mod emotion;
pub mod error;
pub mod frames;
pub mod scenario;
pub mod turn;

pub use agent::AgentProfile;
pub use emotion::Emotion;
pub use error::{ErrorCode, ErrorPayload};
pub use frames::{ClientFrame, ServerFrame};
pub use turn::{Role, Turn};
