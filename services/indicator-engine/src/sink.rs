//! Broadcast sink
//!
//! Narrow outbound interface for live results and replay progress. Delivery
//! is best effort: a slow or absent subscriber never blocks routing and
//! nothing is retried.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use types::ids::{InstanceKey, SessionId};
use types::result::ComputationResult;

use crate::replay::ReplayEvent;

pub trait BroadcastSink: Send + Sync {
    /// Publish a live result on the channel of its market context.
    fn publish_result(&self, channel: &str, key: &InstanceKey, result: &ComputationResult);

    /// Publish one replay progress event.
    fn publish_replay(&self, session_id: &SessionId, event: &ReplayEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl BroadcastSink for NullSink {
    fn publish_result(&self, _channel: &str, _key: &InstanceKey, _result: &ComputationResult) {}

    fn publish_replay(&self, _session_id: &SessionId, _event: &ReplayEvent) {}
}

/// Message carried by [`ChannelSink`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkMessage {
    Result {
        channel: String,
        key: InstanceKey,
        result: ComputationResult,
    },
    Replay {
        session_id: SessionId,
        event: ReplayEvent,
    },
}

/// Fan-out over a Tokio broadcast channel.
pub struct ChannelSink {
    tx: broadcast::Sender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, message: SinkMessage) {
        if self.tx.send(message).is_err() {
            trace!("No sink subscribers, message dropped");
        }
    }
}

impl BroadcastSink for ChannelSink {
    fn publish_result(&self, channel: &str, key: &InstanceKey, result: &ComputationResult) {
        self.send(SinkMessage::Result {
            channel: channel.to_string(),
            key: key.clone(),
            result: result.clone(),
        });
    }

    fn publish_replay(&self, session_id: &SessionId, event: &ReplayEvent) {
        self.send(SinkMessage::Replay {
            session_id: *session_id,
            event: event.clone(),
        });
    }
}
