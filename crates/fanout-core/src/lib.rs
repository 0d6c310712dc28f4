//! Core types, configuration, and utilities for the fanout daemon.

mod backoff;
mod config;
mod error;
mod logging;
mod paths;

pub use backoff::Backoff;
pub use config::{Config, OverflowPolicy, DEFAULT_LOG_LEVEL, DEFAULT_TOPIC};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
