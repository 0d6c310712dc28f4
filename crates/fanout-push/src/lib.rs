//! Push layer: delivery router, connection registry, and the NDJSON socket
//! server that streams notifications to live clients.
//!
//! Each connection owns a bounded outbound queue; a slow client can only
//! fill its own queue and never stalls delivery to anyone else. Undelivered
//! notifications stay durable and are replayed oldest-first on reconnect.

mod error;
mod protocol;
mod queue;
mod registry;
mod router;
mod server;

pub use error::{PushError, PushResult};
pub use protocol::{Frame, Request};
pub use queue::{EnqueueOutcome, OutboundQueue};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use router::DeliveryRouter;
pub use server::{PushClient, PushConfig, PushServer, PushSubscription};
