//! Outbox relay: tails the change log and publishes it to the bus.
//!
//! This crate provides:
//! - OutboxReader: cursor-resuming poller over the append-only log
//! - Publisher: per-record publish with bounded retry and dead-letter parking
//! - OutboxRelay: the loop tying both together, sole owner of cursor advance

mod error;
mod publisher;
mod reader;
mod relay;

pub use error::{OutboxError, OutboxResult};
pub use publisher::{PublishOutcome, Publisher, PublisherConfig};
pub use reader::OutboxReader;
pub use relay::{OutboxRelay, RelayConfig};
