//! Message bus seam for the fanout pipeline.
//!
//! The bus is modeled as an explicit trait so the pipeline never depends on a
//! concrete broker: `publish(topic, key, payload)` on one side,
//! `subscribe(topic, group)` plus `Subscriber::on_message` on the other.
//! `InMemoryBus` provides per-group at-least-once queues for single-node
//! operation; distributed deployments would plug in a different
//! implementation behind the same trait.

mod bus;
mod error;
mod memory;
mod message;

pub use bus::{drive_subscriber, Bus, BusSubscription, Subscriber};
pub use error::{BusError, BusResult};
pub use memory::InMemoryBus;
pub use message::BusMessage;
