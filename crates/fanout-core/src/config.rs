//! Configuration management for the daemon.

use crate::{CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default bus topic for notification traffic.
pub const DEFAULT_TOPIC: &str = "notifications";

/// Policy applied when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest queued frame to make room (client catches up via replay).
    DropOldest,
    /// Close the connection; the client receives a full replay on reconnect.
    Disconnect,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Bus topic the relay publishes to and the consumer group subscribes on.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Outbox poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum records fetched per outbox poll.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: usize,
    /// Maximum publish attempts before a record is parked.
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    /// Number of key-partitioned consumer workers.
    #[serde(default = "default_consumer_workers")]
    pub consumer_workers: usize,
    /// Dedup entry retention in seconds.
    #[serde(default = "default_dedup_retention_secs")]
    pub dedup_retention_secs: u64,
    /// Per-connection outbound queue capacity.
    #[serde(default = "default_connection_queue_capacity")]
    pub connection_queue_capacity: usize,
    /// Policy when a connection's outbound queue overflows.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Seconds to wait for in-flight publishes to drain on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_poll_batch_size() -> usize {
    64
}

fn default_publish_max_attempts() -> u32 {
    10
}

fn default_consumer_workers() -> usize {
    4
}

fn default_dedup_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_connection_queue_capacity() -> usize {
    256
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            topic: default_topic(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_batch_size: default_poll_batch_size(),
            publish_max_attempts: default_publish_max_attempts(),
            consumer_workers: default_consumer_workers(),
            dedup_retention_secs: default_dedup_retention_secs(),
            connection_queue_capacity: default_connection_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults.
    ///
    /// Environment variables override file values afterwards.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("FANOUT_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(topic) = std::env::var("FANOUT_TOPIC") {
            self.topic = topic;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.topic, DEFAULT_TOPIC);
        assert_eq!(config.poll_batch_size, 64);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "consumer_workers": 8,
            "overflow_policy": "disconnect"
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.consumer_workers, 8);
        assert_eq!(config.overflow_policy, OverflowPolicy::Disconnect);
        // Unspecified fields fall back to defaults
        assert_eq!(config.topic, DEFAULT_TOPIC);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.log_level = "trace".to_string();
        config.poll_batch_size = 16;

        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.poll_batch_size, 16);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
    }
}
