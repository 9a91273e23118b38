//! Transport contract and the epoch-filtering outbound writer.
//!
//! The session never writes to the wire directly: pipeline tasks push
//! messages tagged with the epoch they were produced under onto a bounded
//! channel, and a single writer task forwards them in order, dropping
//! anything whose epoch is older than the session's current epoch. Stale
//! outputs are dropped, never buffered or reordered.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use eloquence_types::audio::AudioChunk;
use eloquence_types::{ClientFrame, ServerFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages arriving from the client.
#[derive(Debug)]
pub enum Inbound {
    Control(ClientFrame),
    /// Raw PCM16 bytes of one 20 ms frame.
    Audio(Vec<u8>),
    Closed,
}

/// Write half of a client connection. Implementations guarantee ordered
/// delivery within a session.
#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn send_frame(&self, frame: &ServerFrame) -> CoreResult<()>;
    async fn send_audio(&self, chunk: &AudioChunk) -> CoreResult<()>;
    /// Normal-closure shutdown of the connection.
    async fn close(&self) -> CoreResult<()>;
}

/// One outbound message with its epoch carried by the payload itself.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    Audio(AudioChunk),
}

impl Outbound {
    fn epoch(&self) -> u64 {
        match self {
            Outbound::Frame(f) => f.epoch(),
            Outbound::Audio(c) => c.epoch(),
        }
    }

    fn bypasses_filter(&self) -> bool {
        match self {
            Outbound::Frame(f) => f.bypasses_epoch_filter(),
            Outbound::Audio(_) => false,
        }
    }
}

/// Clonable handle the pipeline stages use to emit output.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<Outbound>,
    epoch: Arc<AtomicU64>,
}

impl OutboundHandle {
    /// The session's current interruption epoch.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Sends a control frame. Blocks when the writer is backed up, which is
    /// the pipeline's backpressure signal.
    pub async fn frame(&self, frame: ServerFrame) -> CoreResult<()> {
        self.tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| CoreError::Transport("outbound writer gone".into()))
    }

    pub async fn audio(&self, chunk: AudioChunk) -> CoreResult<()> {
        self.tx
            .send(Outbound::Audio(chunk))
            .await
            .map_err(|_| CoreError::Transport("outbound writer gone".into()))
    }
}

/// Spawns the writer task. Returns the pipeline-facing handle and the task
/// handle; the task ends when every `OutboundHandle` clone is dropped.
pub fn spawn_writer(
    sink: Arc<dyn TransportSink>,
    epoch: Arc<AtomicU64>,
    capacity: usize,
) -> (OutboundHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(capacity);
    let handle = OutboundHandle {
        tx,
        epoch: epoch.clone(),
    };

    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let current = epoch.load(Ordering::SeqCst);
            if message.epoch() < current && !message.bypasses_filter() {
                tracing::trace!(
                    message_epoch = message.epoch(),
                    current_epoch = current,
                    "dropping stale outbound message"
                );
                continue;
            }

            let result = match &message {
                Outbound::Frame(frame) => sink.send_frame(frame).await,
                Outbound::Audio(chunk) => sink.send_audio(chunk).await,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "outbound write failed, stopping writer");
                break;
            }
        }
    });

    (handle, task)
}

/// In-memory transport for tests and local tooling: everything written to
/// the sink is observable on a channel.
pub mod channel {
    use super::*;

    /// What a [`ChannelSink`] recorded.
    #[derive(Debug)]
    pub enum Sent {
        Frame(ServerFrame),
        Audio(AudioChunk),
        Closed,
    }

    pub struct ChannelSink {
        tx: mpsc::UnboundedSender<Sent>,
    }

    impl ChannelSink {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<Sent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx }, rx)
        }
    }

    #[async_trait]
    impl TransportSink for ChannelSink {
        async fn send_frame(&self, frame: &ServerFrame) -> CoreResult<()> {
            self.tx
                .send(Sent::Frame(frame.clone()))
                .map_err(|_| CoreError::Transport("receiver dropped".into()))
        }

        async fn send_audio(&self, chunk: &AudioChunk) -> CoreResult<()> {
            self.tx
                .send(Sent::Audio(chunk.clone()))
                .map_err(|_| CoreError::Transport("receiver dropped".into()))
        }

        async fn close(&self) -> CoreResult<()> {
            let _ = self.tx.send(Sent::Closed);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::channel::{ChannelSink, Sent};
    use super::*;

    #[tokio::test]
    async fn test_writer_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let epoch = Arc::new(AtomicU64::new(0));
        let (handle, _task) = spawn_writer(Arc::new(sink), epoch, 16);

        handle
            .frame(ServerFrame::AsrPartial {
                epoch: 0,
                text: "bon".into(),
            })
            .await
            .unwrap();
        handle
            .frame(ServerFrame::AsrPartial {
                epoch: 0,
                text: "bonjour".into(),
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Sent::Frame(ServerFrame::AsrPartial { text, .. }) => assert_eq!(text, "bon"),
            other => panic!("unexpected {:?}", other),
        }
        match rx.recv().await.unwrap() {
            Sent::Frame(ServerFrame::AsrPartial { text, .. }) => assert_eq!(text, "bonjour"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_epoch_messages_are_dropped() {
        let (sink, mut rx) = ChannelSink::new();
        let epoch = Arc::new(AtomicU64::new(0));
        let (handle, _task) = spawn_writer(Arc::new(sink), epoch.clone(), 16);

        // Advance the epoch as the arbiter would, then push a stale chunk.
        epoch.store(1, Ordering::SeqCst);
        handle
            .audio(AudioChunk::new(0, 0, vec![0u8; 4]))
            .await
            .unwrap();
        handle.frame(ServerFrame::TtsStop { epoch: 1 }).await.unwrap();

        // Only the stop frame comes through.
        match rx.recv().await.unwrap() {
            Sent::Frame(ServerFrame::TtsStop { epoch }) => assert_eq!(epoch, 1),
            other => panic!("stale chunk leaked: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_frame_bypasses_filter_even_when_stale() {
        let (sink, mut rx) = ChannelSink::new();
        let epoch = Arc::new(AtomicU64::new(5));
        let (handle, _task) = spawn_writer(Arc::new(sink), epoch, 16);

        handle.frame(ServerFrame::TtsStop { epoch: 4 }).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            Sent::Frame(ServerFrame::TtsStop { .. })
        ));
    }
}
