//! Publishes committed transcripts to the room's chat topic.
//!
//! Callers enqueue without blocking; one worker task drains the queue and
//! publishes each packet in order.

use super::events::EventHandlers;
use super::room::RoomPublisher;
use crate::protocol::packets::{CHAT_TOPIC, ChatPacket, DataPacket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

pub const DEFAULT_RELAY_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Queued,
    /// Nothing to send (missing or empty content).
    Skipped,
    /// The queue was full or the worker has stopped.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<ChatPacket>,
}

impl RelayHandle {
    pub fn relay(&self, content: Option<&str>) -> RelayOutcome {
        let Some(message) = content.filter(|text| !text.is_empty()) else {
            return RelayOutcome::Skipped;
        };
        match self.tx.try_send(ChatPacket::now(message)) {
            Ok(()) => RelayOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("transcript relay queue full, dropping message");
                RelayOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("transcript relay stopped, dropping message");
                RelayOutcome::Dropped
            }
        }
    }

    /// Relay both user and agent commits from a session.
    #[must_use]
    pub fn attach(&self, handlers: EventHandlers) -> EventHandlers {
        let user = self.clone();
        let agent = self.clone();
        handlers
            .on_user_speech_committed(move |committed| {
                user.relay(committed.content.as_deref());
            })
            .on_agent_speech_committed(move |committed| {
                agent.relay(committed.content.as_deref());
            })
    }
}

#[derive(Debug)]
pub struct TranscriptRelay {
    handle: RelayHandle,
    worker: JoinHandle<()>,
}

impl TranscriptRelay {
    /// Start the worker. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(publisher: Arc<dyn RoomPublisher>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(publisher, rx));
        Self { handle: RelayHandle { tx }, worker }
    }

    #[must_use]
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Stop accepting new messages once all handles are gone, publish what is
    /// queued and wait for the worker.
    pub async fn shutdown(self) {
        drop(self.handle);
        if let Err(err) = self.worker.await {
            tracing::warn!(error = %err, "transcript relay worker failed");
        }
    }
}

async fn run_worker(publisher: Arc<dyn RoomPublisher>, mut rx: mpsc::Receiver<ChatPacket>) {
    while let Some(packet) = rx.recv().await {
        let payload = match packet.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode chat packet");
                continue;
            }
        };
        if let Err(err) = publisher.publish_data(DataPacket::reliable(payload, CHAT_TOPIC)).await {
            tracing::warn!(error = %err, "failed to publish transcript");
        }
    }
    tracing::debug!("transcript relay drained");
}
