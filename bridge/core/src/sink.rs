//! Update Sinks
//!
//! Where protocol updates go. The translator publishes every update for a
//! task to one [`UpdateSink`] in dispatch order and signals `finished` once
//! after the terminal update.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::protocol::ProtocolUpdate;

/// Consumer of protocol updates
#[async_trait]
pub trait UpdateSink: Send + Sync {
    /// Deliver one update
    async fn publish(&self, update: ProtocolUpdate);

    /// No further updates will be published
    async fn finished(&self);
}

/// Messages delivered by a [`ChannelSink`]
#[derive(Clone, Debug, PartialEq)]
pub enum SinkMessage {
    /// A protocol update
    Update(ProtocolUpdate),
    /// The sink is finished
    Finished,
}

/// Sink that forwards into a tokio mpsc channel
///
/// A closed receiver is logged and otherwise ignored: the run keeps going and
/// still commits its terminal state.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl ChannelSink {
    /// Wrap an existing sender
    #[must_use]
    pub fn new(tx: mpsc::Sender<SinkMessage>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver for its messages
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl UpdateSink for ChannelSink {
    async fn publish(&self, update: ProtocolUpdate) {
        if self.tx.send(SinkMessage::Update(update)).await.is_err() {
            tracing::warn!("Update receiver dropped; discarding update");
        }
    }

    async fn finished(&self) {
        if self.tx.send(SinkMessage::Finished).await.is_err() {
            tracing::debug!("Update receiver dropped before finish");
        }
    }
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    updates: Mutex<Vec<ProtocolUpdate>>,
    finished: Mutex<usize>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates published so far
    #[must_use]
    pub fn updates(&self) -> Vec<ProtocolUpdate> {
        self.updates.lock().clone()
    }

    /// How many times `finished` was signaled
    #[must_use]
    pub fn finished_count(&self) -> usize {
        *self.finished.lock()
    }
}

#[async_trait]
impl UpdateSink for MemorySink {
    async fn publish(&self, update: ProtocolUpdate) {
        self.updates.lock().push(update);
    }

    async fn finished(&self) {
        *self.finished.lock() += 1;
    }
}
