//! In-process event bus over a tokio broadcast channel.

use super::{EventPublishError, EventPublisher, Topic};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// One message as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub topic: Topic,
    pub key: String,
    pub payload: serde_json::Value,
}

/// Broadcast-backed publisher. Clones share the channel.
///
/// Subscribers that fall behind by more than the channel capacity lose the
/// oldest events; a publish with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastEventPublisher {
    fn publish(
        &self,
        topic: Topic,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<(), EventPublishError> {
        let event = PublishedEvent {
            topic,
            key: key.to_string(),
            payload,
        };
        match self.sender.send(event) {
            Ok(receivers) => debug!(topic = %topic, key = %key, receivers, "Published event"),
            Err(_) => debug!(topic = %topic, key = %key, "No subscribers for event"),
        }
        Ok(())
    }
}
