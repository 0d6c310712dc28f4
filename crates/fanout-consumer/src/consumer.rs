//! Dedup-check-and-persist for a single bus message.

use crate::ConsumerResult;
use fanout_bus::BusMessage;
use fanout_database::{Database, NewDeadLetter, Notification};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// JSON envelope carried in every outbox payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Recipient user.
    pub user_id: String,
    /// Human-readable notification body.
    pub body: String,
}

/// Outcome of handling one bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// First sighting: the notification was persisted.
    Accepted(Notification),
    /// Message id already seen; idempotent no-op.
    Duplicate,
    /// Payload could not be handled; parked in dead letters.
    Parked,
}

/// Deduplicating consumer.
///
/// Accepted notifications are forwarded to the delivery router over the
/// `accepted` channel after the transaction commits, so a router crash can
/// at worst delay delivery (the notification is already durable and
/// undelivered, and replay picks it up on reconnect).
pub struct DedupConsumer {
    db: Arc<Database>,
    accepted: mpsc::Sender<Notification>,
}

impl DedupConsumer {
    /// Create a new consumer forwarding accepted notifications to `accepted`.
    pub fn new(db: Arc<Database>, accepted: mpsc::Sender<Notification>) -> Self {
        Self { db, accepted }
    }

    /// Handle one bus message.
    ///
    /// The dedup insert and the notification insert share one transaction:
    /// either both happen or neither does. A redelivered message id is
    /// discarded silently — a normal path, not an error.
    pub async fn on_message(&self, message: BusMessage) -> ConsumerResult<ConsumeOutcome> {
        let payload: NotificationPayload = match serde_json::from_slice(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Malformed payload, parking"
                );
                self.db.park_dead_letter(&NewDeadLetter {
                    sequence_id: sequence_from_message_id(&message.message_id),
                    aggregate_id: message.key.clone(),
                    event_type: "unknown".to_string(),
                    payload: message.payload.clone(),
                    error: format!("malformed payload: {}", e),
                    attempts: 1,
                })?;
                return Ok(ConsumeOutcome::Parked);
            }
        };

        match self.db.insert_notification_if_new(
            &message.message_id,
            &payload.user_id,
            &payload.body,
        )? {
            Some(notification) => {
                debug!(
                    message_id = %message.message_id,
                    user_id = %notification.user_id,
                    "Notification persisted"
                );
                // Router gone means delivery waits for replay; not an error here
                if self.accepted.send(notification.clone()).await.is_err() {
                    warn!(
                        message_id = %notification.id,
                        "Router channel closed, notification awaits replay"
                    );
                }
                Ok(ConsumeOutcome::Accepted(notification))
            }
            None => {
                debug!(message_id = %message.message_id, "Duplicate message discarded");
                Ok(ConsumeOutcome::Duplicate)
            }
        }
    }
}

/// Best-effort sequence extraction from a deterministic message id
/// (`<aggregate_id>:<sequence_id>`), for dead-letter context.
fn sequence_from_message_id(message_id: &str) -> i64 {
    message_id
        .rsplit(':')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (DedupConsumer, mpsc::Receiver<Notification>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (tx, rx) = mpsc::channel(16);
        (DedupConsumer::new(Arc::clone(&db), tx), rx, db)
    }

    fn message(id: &str, user_id: &str, body: &str) -> BusMessage {
        let payload = serde_json::to_vec(&NotificationPayload {
            user_id: user_id.to_string(),
            body: body.to_string(),
        })
        .unwrap();
        BusMessage::new(id, "order-7", payload)
    }

    #[tokio::test]
    async fn test_first_message_is_accepted_and_forwarded() {
        let (consumer, mut rx, db) = setup();

        let outcome = consumer
            .on_message(message("m1", "u1", "shipped"))
            .await
            .unwrap();

        match outcome {
            ConsumeOutcome::Accepted(n) => {
                assert_eq!(n.id, "m1");
                assert_eq!(n.user_id, "u1");
                assert!(!n.delivered);
            }
            other => panic!("expected Accepted, got {:?}", other),
        }

        // Forwarded to the router
        assert_eq!(rx.recv().await.unwrap().id, "m1");
        // And durable
        assert_eq!(db.undelivered_notifications("u1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_is_discarded_exactly_once_persisted() {
        let (consumer, mut rx, db) = setup();

        // Two rapid duplicate deliveries of the same message id
        let first = consumer
            .on_message(message("m1", "u1", "shipped"))
            .await
            .unwrap();
        let second = consumer
            .on_message(message("m1", "u1", "shipped"))
            .await
            .unwrap();

        assert!(matches!(first, ConsumeOutcome::Accepted(_)));
        assert_eq!(second, ConsumeOutcome::Duplicate);

        // Exactly one notification persisted and one forwarded
        assert_eq!(db.undelivered_notifications("u1").unwrap().len(), 1);
        assert_eq!(rx.recv().await.unwrap().id, "m1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_parked_not_dropped() {
        let (consumer, _rx, db) = setup();

        let bad = BusMessage::new("order-7:9", "order-7", b"not json".to_vec());
        let outcome = consumer.on_message(bad).await.unwrap();

        assert_eq!(outcome, ConsumeOutcome::Parked);
        let letters = db.list_dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].sequence_id, 9);
        assert_eq!(letters[0].aggregate_id, "order-7");
        assert_eq!(letters[0].payload, b"not json".to_vec());

        // Nothing persisted as a notification
        assert_eq!(db.undelivered_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_router_channel_still_persists() {
        let (consumer, rx, db) = setup();
        drop(rx);

        let outcome = consumer
            .on_message(message("m1", "u1", "shipped"))
            .await
            .unwrap();

        // Durability does not depend on the router being alive
        assert!(matches!(outcome, ConsumeOutcome::Accepted(_)));
        assert_eq!(db.undelivered_notifications("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_sequence_from_message_id() {
        assert_eq!(sequence_from_message_id("order-7:42"), 42);
        assert_eq!(sequence_from_message_id("a:b:17"), 17);
        assert_eq!(sequence_from_message_id("garbage"), 0);
    }
}
