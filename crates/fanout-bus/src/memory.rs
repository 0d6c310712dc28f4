//! In-memory bus implementation.

use crate::{Bus, BusError, BusMessage, BusResult, BusSubscription};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Default per-group channel capacity.
const DEFAULT_GROUP_CAPACITY: usize = 1024;

/// In-memory bus for single-node operation.
///
/// Each (topic, group) pair gets its own bounded queue; publishing fans the
/// message out to every group subscribed on the topic. A full group queue
/// exerts backpressure on the publisher instead of dropping, which preserves
/// the at-least-once contract.
pub struct InMemoryBus {
    /// topic -> group -> sender.
    groups: RwLock<HashMap<String, HashMap<String, mpsc::Sender<BusMessage>>>>,
    capacity: usize,
}

impl InMemoryBus {
    /// Create a bus with the default group queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_GROUP_CAPACITY)
    }

    /// Create a bus with a specific group queue capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Number of groups currently subscribed on a topic.
    pub async fn group_count(&self, topic: &str) -> usize {
        let groups = self.groups.read().await;
        groups.get(topic).map(|g| g.len()).unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> BusResult<()> {
        // Snapshot the senders so the lock is not held across sends
        let senders: Vec<(String, mpsc::Sender<BusMessage>)> = {
            let groups = self.groups.read().await;
            match groups.get(topic) {
                Some(topic_groups) => topic_groups
                    .iter()
                    .map(|(name, tx)| (name.clone(), tx.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        if senders.is_empty() {
            debug!(topic = %topic, message_id = %message.message_id, "No groups subscribed, message not delivered");
            return Ok(());
        }

        let mut stale = Vec::new();
        for (group, sender) in &senders {
            if sender.send(message.clone()).await.is_err() {
                warn!(topic = %topic, group = %group, "Group receiver dropped");
                stale.push(group.clone());
            }
        }

        if !stale.is_empty() {
            let mut groups = self.groups.write().await;
            if let Some(topic_groups) = groups.get_mut(topic) {
                for group in &stale {
                    topic_groups.remove(group);
                }
            }
            // All groups gone mid-publish means nobody acknowledged
            if stale.len() == senders.len() {
                return Err(BusError::Closed(format!(
                    "all groups on topic {} are gone",
                    topic
                )));
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> BusResult<BusSubscription> {
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut groups = self.groups.write().await;
        let topic_groups = groups.entry(topic.to_string()).or_default();
        if topic_groups.insert(group.to_string(), tx).is_some() {
            // One live subscription per group; the previous receiver closes
            warn!(topic = %topic, group = %group, "Replacing existing group subscription");
        }

        debug!(topic = %topic, group = %group, "Group subscribed");
        Ok(BusSubscription::new(topic, group, rx))
    }
}
