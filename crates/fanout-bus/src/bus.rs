//! Bus traits and the subscription handle.

use crate::{BusMessage, BusResult};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Publishing and subscribing side of the bus.
///
/// The bus itself guarantees at-least-once delivery to each consumer group;
/// exactly-once is the consumer's job (dedup on `message_id`).
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// An Ok return is the broker's acknowledgment. Errors are transient
    /// broker conditions; callers retry with backoff.
    async fn publish(&self, topic: &str, message: BusMessage) -> BusResult<()>;

    /// Subscribe a consumer group to a topic.
    ///
    /// Every group receives every message published after it subscribed.
    async fn subscribe(&self, topic: &str, group: &str) -> BusResult<BusSubscription>;
}

/// Handler interface for consumed messages.
///
/// Replaces broker-specific listener registration with an explicit contract:
/// return Ok once the message is durably handled (including the duplicate
/// no-op path); return Err to signal a handling failure worth logging.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_message(&self, message: BusMessage) -> BusResult<()>;
}

/// A live subscription for one (topic, group) pair.
pub struct BusSubscription {
    topic: String,
    group: String,
    receiver: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    pub(crate) fn new(topic: &str, group: &str, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            topic: topic.to_string(),
            group: group.to_string(),
            receiver,
        }
    }

    /// Topic this subscription is attached to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group name.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Receive the next message, waiting until one arrives.
    ///
    /// Returns None once the bus side is closed and drained.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// Pump a subscription into a subscriber until shutdown.
///
/// Handler errors are logged and do not stop the pump; the message stays
/// unacknowledged at the dedup layer so a redelivery can complete it.
pub async fn drive_subscriber<S: Subscriber>(
    mut subscription: BusSubscription,
    subscriber: S,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = subscription.recv() => {
                let Some(message) = message else {
                    debug!(topic = %subscription.topic(), "Subscription closed");
                    break;
                };
                if let Err(e) = subscriber.on_message(message).await {
                    warn!(topic = %subscription.topic(), error = %e, "Subscriber failed to handle message");
                }
            }
            _ = shutdown.recv() => {
                debug!(topic = %subscription.topic(), "Subscriber shutting down");
                break;
            }
        }
    }
}
