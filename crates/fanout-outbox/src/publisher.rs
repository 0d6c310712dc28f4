//! Per-record publisher with bounded retry.

use fanout_bus::{Bus, BusMessage};
use fanout_core::Backoff;
use fanout_database::ChangeRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Maximum publish attempts before a record is parked.
    pub max_attempts: u32,
    /// Initial retry delay.
    pub retry_base: Duration,
    /// Maximum retry delay.
    pub retry_max: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

/// Outcome of publishing a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The bus acknowledged the message.
    Published,
    /// Retries exhausted; the record must be parked, never dropped.
    Parked { error: String, attempts: u32 },
}

/// Publishes change records to the bus with retry.
///
/// The bus message id is derived deterministically from the record, so a
/// republish after a crash or retry carries the same id and the consumer's
/// dedup makes redelivery harmless.
pub struct Publisher {
    bus: Arc<dyn Bus>,
    topic: String,
    config: PublisherConfig,
    backoff: Backoff,
}

impl Publisher {
    /// Create a new publisher for a topic.
    pub fn new(bus: Arc<dyn Bus>, topic: &str, config: PublisherConfig) -> Self {
        let backoff = Backoff::new(config.retry_base, config.retry_max);
        Self {
            bus,
            topic: topic.to_string(),
            config,
            backoff,
        }
    }

    /// Publish one record, retrying transient failures with backoff.
    ///
    /// Never returns an error: exhaustion is reported as `Parked` so the
    /// caller can record the dead letter and keep the pipeline moving.
    pub async fn publish(&self, record: &ChangeRecord) -> PublishOutcome {
        let message = BusMessage::new(
            record.message_id(),
            record.aggregate_id.clone(),
            record.payload.clone(),
        );

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.bus.publish(&self.topic, message.clone()).await {
                Ok(()) => {
                    debug!(
                        sequence_id = record.sequence_id,
                        message_id = %message.message_id,
                        attempt,
                        "Record published"
                    );
                    return PublishOutcome::Published;
                }
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        warn!(
                            sequence_id = record.sequence_id,
                            attempts = attempt,
                            error = %e,
                            "Publish retries exhausted"
                        );
                        return PublishOutcome::Parked {
                            error: e.to_string(),
                            attempts: attempt,
                        };
                    }

                    let delay = self.backoff.jittered_delay_for(attempt);
                    debug!(
                        sequence_id = record.sequence_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
