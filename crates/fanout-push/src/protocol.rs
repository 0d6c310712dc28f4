//! Push protocol definitions.
//!
//! NDJSON over a Unix domain socket: the client opens with `subscribe`,
//! then the connection switches to streaming mode and the server pushes
//! `notification` frames until `unsubscribe` or EOF.

use chrono::{DateTime, Utc};
use fanout_database::Notification;
use serde::{Deserialize, Serialize};

/// Client-to-server request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Open a notification stream for a user.
    Subscribe { user_id: String },
    /// Close the stream.
    Unsubscribe,
    /// Liveness probe.
    Ping,
}

impl Request {
    /// Serialize to a JSON line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from a JSON line.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Server-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Subscription accepted; `replayed` undelivered notifications follow.
    Subscribed { user_id: String, replayed: usize },
    /// A notification push. Clients must tolerate seeing the same id twice
    /// (replay can race a concurrent fresh push).
    Notification {
        id: String,
        user_id: String,
        body: String,
        created_at: DateTime<Utc>,
    },
    /// Stream closed at the client's request.
    Unsubscribed,
    /// Liveness response.
    Pong,
    /// Request could not be honored.
    Error { message: String },
}

impl Frame {
    /// Build a notification frame.
    pub fn notification(notification: &Notification) -> Self {
        Self::Notification {
            id: notification.id.clone(),
            user_id: notification.user_id.clone(),
            body: notification.body.clone(),
            created_at: notification.created_at,
        }
    }

    /// Serialize to a JSON line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from a JSON line.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
