//! Delivery router: persisted notification -> live connections.

use crate::{ConnectionRegistry, EnqueueOutcome, OutboundQueue, PushResult};
use fanout_database::{Database, Notification};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Routes accepted notifications to every live connection of the recipient.
///
/// A user with no connections is not an error: the notification stays
/// undelivered in storage and `replay` pushes it on the next connect.
pub struct DeliveryRouter {
    db: Arc<Database>,
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryRouter {
    /// Create a new router.
    pub fn new(db: Arc<Database>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { db, registry }
    }

    /// The registry this router consults.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Route one notification to all of the user's connections.
    pub async fn on_notification(&self, notification: Notification) {
        let handles = self.registry.lookup(&notification.user_id).await;

        if handles.is_empty() {
            debug!(
                id = %notification.id,
                user_id = %notification.user_id,
                "No live connections, notification awaits replay"
            );
            return;
        }

        for handle in handles {
            match handle.queue().push(notification.clone()).await {
                EnqueueOutcome::Queued => {}
                EnqueueOutcome::DroppedOldest => {
                    warn!(
                        user_id = %notification.user_id,
                        connection_id = %handle.connection_id(),
                        "Slow client, dropped oldest queued frame"
                    );
                }
                EnqueueOutcome::Rejected => {
                    // Overflow under the disconnect policy, or a connection
                    // torn down between lookup and push
                    warn!(
                        user_id = %notification.user_id,
                        connection_id = %handle.connection_id(),
                        "Outbound queue rejected frame, unregistering connection"
                    );
                    self.registry
                        .unregister(&notification.user_id, handle.connection_id())
                        .await;
                }
            }
        }
    }

    /// Replay all undelivered notifications for a user into one queue,
    /// oldest first. Called on connect, after registration, so a fresh push
    /// racing the replay can at worst show the client a notification twice.
    pub async fn replay(&self, user_id: &str, queue: &Arc<OutboundQueue>) -> PushResult<usize> {
        let undelivered = self.db.undelivered_notifications(user_id)?;
        let total = undelivered.len();

        for notification in undelivered {
            if queue.push(notification).await == EnqueueOutcome::Rejected {
                warn!(user_id = %user_id, "Queue closed during replay");
                break;
            }
        }

        if total > 0 {
            info!(user_id = %user_id, count = total, "Replayed undelivered notifications");
        }
        Ok(total)
    }

    /// Drain the accepted-notification channel until shutdown.
    pub async fn run(
        &self,
        mut accepted: mpsc::Receiver<Notification>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Delivery router started");
        loop {
            tokio::select! {
                notification = accepted.recv() => {
                    let Some(notification) = notification else {
                        debug!("Accepted channel closed");
                        break;
                    };
                    self.on_notification(notification).await;
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("Delivery router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::OverflowPolicy;

    fn notification(id: &str, user_id: &str) -> Notification {
        Notification {
            id: id.to_string(),
            user_id: user_id.to_string(),
            body: "body".to_string(),
            created_at: chrono::Utc::now(),
            delivered: false,
            delivered_at: None,
        }
    }

    fn setup() -> (DeliveryRouter, Arc<ConnectionRegistry>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Arc::new(ConnectionRegistry::new());
        (
            DeliveryRouter::new(Arc::clone(&db), Arc::clone(&registry)),
            registry,
            db,
        )
    }

    #[tokio::test]
    async fn test_no_connections_leaves_notification_for_replay() {
        let (router, _registry, db) = setup();
        db.insert_notification_if_new("m1", "u1", "body").unwrap();

        router.on_notification(notification("m1", "u1")).await;

        // Still undelivered; nothing crashed
        assert_eq!(db.undelivered_notifications("u1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_devices() {
        let (router, registry, _db) = setup();
        let queue_a = Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest));
        let queue_b = Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest));
        registry.register("u1", Arc::clone(&queue_a)).await;
        registry.register("u1", Arc::clone(&queue_b)).await;

        router.on_notification(notification("m1", "u1")).await;

        assert_eq!(queue_a.pop().await.unwrap().id, "m1");
        assert_eq!(queue_b.pop().await.unwrap().id, "m1");
    }

    #[tokio::test]
    async fn test_overflow_disconnect_unregisters() {
        let (router, registry, _db) = setup();
        let queue = Arc::new(OutboundQueue::new(1, OverflowPolicy::Disconnect));
        registry.register("u1", Arc::clone(&queue)).await;

        router.on_notification(notification("m1", "u1")).await;
        router.on_notification(notification("m2", "u1")).await;

        // The overflowing connection was dropped from the registry
        assert!(registry.lookup("u1").await.is_empty());
        assert!(queue.is_closed().await);
    }

    #[tokio::test]
    async fn test_replay_pushes_oldest_first() {
        let (router, _registry, db) = setup();
        for i in 1..=3 {
            db.insert_notification_if_new(&format!("m{}", i), "u1", "body")
                .unwrap();
        }

        let queue = Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest));
        let replayed = router.replay("u1", &queue).await.unwrap();

        assert_eq!(replayed, 3);
        for i in 1..=3 {
            assert_eq!(queue.pop().await.unwrap().id, format!("m{}", i));
        }
    }

    #[tokio::test]
    async fn test_replay_skips_delivered() {
        let (router, _registry, db) = setup();
        db.insert_notification_if_new("m1", "u1", "body").unwrap();
        db.insert_notification_if_new("m2", "u1", "body").unwrap();
        db.mark_notification_delivered("m1").unwrap();

        let queue = Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest));
        let replayed = router.replay("u1", &queue).await.unwrap();

        assert_eq!(replayed, 1);
        assert_eq!(queue.pop().await.unwrap().id, "m2");
    }
}
