//! Process-wide table of active client connections.

use crate::OutboundQueue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Unique id for one live connection.
pub type ConnectionId = Uuid;

/// A registered connection: a queue reference, never the transport itself.
///
/// The socket is owned by the connection task; when the transport closes,
/// dropping the handle from the registry cannot leak it.
#[derive(Clone)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    user_id: String,
    queue: Arc<OutboundQueue>,
}

impl ConnectionHandle {
    /// Connection id.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// User this connection belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The connection's outbound queue.
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }
}

/// Thread-safe registry of active connections, many per user (multi-device).
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user. Returns its handle.
    pub async fn register(&self, user_id: &str, queue: Arc<OutboundQueue>) -> ConnectionHandle {
        let handle = ConnectionHandle {
            connection_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            queue,
        };

        let mut connections = self.connections.write().await;
        connections
            .entry(user_id.to_string())
            .or_default()
            .insert(handle.connection_id, handle.clone());

        info!(user_id = %user_id, connection_id = %handle.connection_id, "Connection registered");
        handle
    }

    /// Remove a connection. Returns false if it was already gone.
    pub async fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let Some(user_connections) = connections.get_mut(user_id) else {
            return false;
        };

        let removed = user_connections.remove(&connection_id).is_some();
        if user_connections.is_empty() {
            connections.remove(user_id);
        }
        if removed {
            info!(user_id = %user_id, connection_id = %connection_id, "Connection unregistered");
        } else {
            debug!(user_id = %user_id, connection_id = %connection_id, "Connection already gone");
        }
        removed
    }

    /// All live connections for a user.
    pub async fn lookup(&self, user_id: &str) -> Vec<ConnectionHandle> {
        let connections = self.connections.read().await;
        connections
            .get(user_id)
            .map(|user_connections| user_connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total live connections.
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.values().map(|c| c.len()).sum()
    }

    /// Users with at least one live connection.
    pub async fn user_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::OverflowPolicy;

    fn queue() -> Arc<OutboundQueue> {
        Arc::new(OutboundQueue::new(8, OverflowPolicy::DropOldest))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("u1", queue()).await;

        let found = registry.lookup("u1").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].connection_id(), handle.connection_id());
        assert_eq!(found[0].user_id(), "u1");

        assert!(registry.lookup("u2").await.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_devices_per_user() {
        let registry = ConnectionRegistry::new();
        registry.register("u1", queue()).await;
        registry.register("u1", queue()).await;
        registry.register("u2", queue()).await;

        assert_eq!(registry.lookup("u1").await.len(), 2);
        assert_eq!(registry.connection_count().await, 3);
        assert_eq!(registry.user_count().await, 2);
    }

    #[tokio::test]
    async fn test_unregister_removes_connection() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("u1", queue()).await;

        assert!(registry.unregister("u1", handle.connection_id()).await);
        assert!(registry.lookup("u1").await.is_empty());
        assert_eq!(registry.user_count().await, 0);

        // Unregistering again is a harmless no-op
        assert!(!registry.unregister("u1", handle.connection_id()).await);
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let user = format!("u{}", i % 4);
                    let handle = registry.register(&user, queue()).await;
                    let _ = registry.lookup(&user).await;
                    registry.unregister(&user, handle.connection_id()).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(registry.connection_count().await, 0);
    }
}
