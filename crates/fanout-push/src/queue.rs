//! Bounded per-connection outbound queue.

use fanout_core::OverflowPolicy;
use fanout_database::Notification;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Outcome of enqueuing a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued normally.
    Queued,
    /// Queue was full; the oldest frame was dropped to make room.
    DroppedOldest,
    /// Queue is closed (or overflowed under the disconnect policy).
    Rejected,
}

struct QueueState {
    items: VecDeque<Notification>,
    closed: bool,
}

/// Bounded outbound queue for one connection.
///
/// The writer task drains it to the socket; the router fills it. A full
/// queue either drops the oldest frame or closes the connection, per the
/// configured policy — either way a slow client never blocks the router.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    /// Create a queue with the given capacity and overflow policy.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Enqueue a notification. Never blocks on a slow consumer.
    pub async fn push(&self, notification: Notification) -> EnqueueOutcome {
        let outcome = {
            let mut state = self.state.lock().await;
            if state.closed {
                return EnqueueOutcome::Rejected;
            }

            if state.items.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        let dropped = state.items.pop_front();
                        if let Some(dropped) = dropped {
                            // Still undelivered in storage; replay recovers it
                            debug!(id = %dropped.id, "Outbound queue full, dropped oldest");
                        }
                        state.items.push_back(notification);
                        EnqueueOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => {
                        state.closed = true;
                        EnqueueOutcome::Rejected
                    }
                }
            } else {
                state.items.push_back(notification);
                EnqueueOutcome::Queued
            }
        };

        match outcome {
            EnqueueOutcome::Rejected => self.notify.notify_waiters(),
            _ => self.notify.notify_one(),
        }
        outcome
    }

    /// Dequeue the next notification, waiting until one is available.
    ///
    /// A closed queue drains its remaining items first (final flush), then
    /// returns None.
    pub async fn pop(&self) -> Option<Notification> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(notification) = state.items.pop_front() {
                    return Some(notification);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Dequeue without waiting.
    pub async fn try_pop(&self) -> Option<Notification> {
        self.state.lock().await.items.pop_front()
    }

    /// Close the queue; pending items remain poppable.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Whether the queue has been closed.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Number of queued notifications.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notification(id: &str) -> Notification {
        Notification {
            id: id.to_string(),
            user_id: "u1".to_string(),
            body: "body".to_string(),
            created_at: Utc::now(),
            delivered: false,
            delivered_at: None,
        }
    }

    #[tokio::test]
    async fn test_push_pop_preserves_order() {
        let queue = OutboundQueue::new(8, OverflowPolicy::DropOldest);

        for i in 1..=3 {
            assert_eq!(
                queue.push(notification(&format!("n{}", i))).await,
                EnqueueOutcome::Queued
            );
        }

        for i in 1..=3 {
            assert_eq!(queue.pop().await.unwrap().id, format!("n{}", i));
        }
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest));

        let popper = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push(notification("n1")).await;

        let popped = tokio::time::timeout(std::time::Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.unwrap().id, "n1");
    }

    #[tokio::test]
    async fn test_drop_oldest_policy() {
        let queue = OutboundQueue::new(2, OverflowPolicy::DropOldest);

        queue.push(notification("n1")).await;
        queue.push(notification("n2")).await;
        let outcome = queue.push(notification("n3")).await;

        assert_eq!(outcome, EnqueueOutcome::DroppedOldest);
        assert_eq!(queue.len().await, 2);
        // n1 was sacrificed; n2 and n3 remain in order
        assert_eq!(queue.pop().await.unwrap().id, "n2");
        assert_eq!(queue.pop().await.unwrap().id, "n3");
    }

    #[tokio::test]
    async fn test_disconnect_policy_closes_queue() {
        let queue = OutboundQueue::new(1, OverflowPolicy::Disconnect);

        assert_eq!(queue.push(notification("n1")).await, EnqueueOutcome::Queued);
        assert_eq!(
            queue.push(notification("n2")).await,
            EnqueueOutcome::Rejected
        );

        assert!(queue.is_closed().await);
        // Pending item drains, then the closed queue reports None
        assert_eq!(queue.pop().await.unwrap().id, "n1");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_push() {
        let queue = OutboundQueue::new(4, OverflowPolicy::DropOldest);
        queue.close().await;
        assert_eq!(
            queue.push(notification("n1")).await,
            EnqueueOutcome::Rejected
        );
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_pop() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4, OverflowPolicy::DropOldest));

        let popper = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.close().await;

        let popped = tokio::time::timeout(std::time::Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
    }
}
