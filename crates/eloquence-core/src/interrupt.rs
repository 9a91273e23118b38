//! Interruption arbiter: turns a confirmed barge-in into an epoch advance,
//! cancellation of the in-flight pipeline, and a single `tts_stop` frame.
//!
//! Everything already queued under the previous epoch is dropped by the
//! outbound writer's stale filter; nothing stale can follow the stop frame.

use crate::error::CoreResult;
use crate::transport::OutboundHandle;
use eloquence_types::ServerFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct InterruptionArbiter {
    epoch: Arc<AtomicU64>,
    current: Mutex<Option<CancellationToken>>,
}

impl InterruptionArbiter {
    pub fn new(epoch: Arc<AtomicU64>) -> Self {
        Self {
            epoch,
            current: Mutex::new(None),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Registers the cancellation token of the pipeline now in flight.
    pub fn register(&self, token: CancellationToken) {
        *self.current.lock().unwrap() = Some(token);
    }

    /// Clears the registration once a pipeline finished on its own.
    pub fn clear(&self) {
        *self.current.lock().unwrap() = None;
    }

    /// Executes the barge-in protocol: advance the epoch, cancel the
    /// in-flight pipeline, emit one `tts_stop`. Returns the new epoch.
    pub async fn trip(&self, out: &OutboundHandle) -> CoreResult<u64> {
        let new_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(token) = self.current.lock().unwrap().take() {
            token.cancel();
        }

        out.frame(ServerFrame::TtsStop { epoch: new_epoch }).await?;
        tracing::info!(epoch = new_epoch, "barge-in: pipeline cancelled");
        Ok(new_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel::{ChannelSink, Sent};
    use crate::transport::spawn_writer;
    use eloquence_types::audio::AudioChunk;

    fn setup() -> (
        InterruptionArbiter,
        OutboundHandle,
        tokio::sync::mpsc::UnboundedReceiver<Sent>,
    ) {
        let (sink, rx) = ChannelSink::new();
        let epoch = Arc::new(AtomicU64::new(0));
        let (handle, _task) = spawn_writer(Arc::new(sink), epoch.clone(), 64);
        (InterruptionArbiter::new(epoch), handle, rx)
    }

    #[tokio::test]
    async fn test_trip_increments_epoch_by_exactly_one() {
        let (arbiter, out, _rx) = setup();
        assert_eq!(arbiter.current_epoch(), 0);

        let new_epoch = arbiter.trip(&out).await.unwrap();
        assert_eq!(new_epoch, 1);
        assert_eq!(arbiter.current_epoch(), 1);
    }

    #[tokio::test]
    async fn test_trip_cancels_registered_token() {
        let (arbiter, out, _rx) = setup();
        let token = CancellationToken::new();
        arbiter.register(token.clone());

        arbiter.trip(&out).await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_stale_audio_after_stop_frame() {
        let (arbiter, out, mut rx) = setup();

        // Audio produced under epoch 0, then the barge-in, then a stale
        // chunk that was still in a pipeline task.
        out.audio(AudioChunk::new(0, 0, vec![0u8; 4])).await.unwrap();
        arbiter.trip(&out).await.unwrap();
        out.audio(AudioChunk::new(0, 1, vec![0u8; 4])).await.unwrap();

        let mut saw_stop = false;
        let mut audio_after_stop = 0;
        while let Ok(sent) = rx.try_recv() {
            match sent {
                Sent::Frame(ServerFrame::TtsStop { .. }) => saw_stop = true,
                Sent::Audio(_) if saw_stop => audio_after_stop += 1,
                _ => {}
            }
        }
        assert!(saw_stop);
        assert_eq!(audio_after_stop, 0);
    }

    #[tokio::test]
    async fn test_trip_without_registration_still_advances() {
        let (arbiter, out, _rx) = setup();
        assert_eq!(arbiter.trip(&out).await.unwrap(), 1);
        assert_eq!(arbiter.trip(&out).await.unwrap(), 2);
    }
}
