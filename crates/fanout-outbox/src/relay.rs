//! The relay loop: poll, publish, advance the cursor.

use crate::{OutboxReader, OutboxResult, Publisher, PublishOutcome, PublisherConfig};
use fanout_bus::Bus;
use fanout_core::Backoff;
use fanout_database::{Database, NewDeadLetter};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bus topic to publish on.
    pub topic: String,
    /// Sleep between polls when the log is drained.
    pub poll_interval: Duration,
    /// Maximum records fetched (and in flight) per poll cycle.
    pub batch_size: usize,
    /// Publisher retry settings.
    pub publisher: PublisherConfig,
    /// Backoff for log read failures (retried indefinitely).
    pub read_retry_base: Duration,
    pub read_retry_max: Duration,
    /// How long in-flight publishes may drain on shutdown.
    pub drain_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic: "notifications".to_string(),
            poll_interval: Duration::from_millis(250),
            batch_size: 64,
            publisher: PublisherConfig::default(),
            read_retry_base: Duration::from_millis(500),
            read_retry_max: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Single sequential relay over the outbox log.
///
/// Exactly one relay may run per database: it is the only writer of the
/// cursor, and cursor advance is strictly ordered. Publishes within one
/// batch run concurrently, but the cursor only moves once every earlier
/// record in the batch is resolved (published or parked).
pub struct OutboxRelay {
    db: Arc<Database>,
    reader: OutboxReader,
    publisher: Publisher,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Create a new relay.
    pub fn new(db: Arc<Database>, bus: Arc<dyn Bus>, config: RelayConfig) -> Self {
        let reader = OutboxReader::new(Arc::clone(&db), config.batch_size);
        let publisher = Publisher::new(bus, &config.topic, config.publisher.clone());
        Self {
            db,
            reader,
            publisher,
            config,
        }
    }

    /// Run the relay loop until shutdown.
    ///
    /// On shutdown, the in-flight batch is given `drain_timeout` to finish;
    /// anything still unresolved is left unacknowledged and re-relayed on the
    /// next start (dedup downstream absorbs the redelivery).
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(topic = %self.config.topic, "Outbox relay started");
        let read_backoff = Backoff::new(self.config.read_retry_base, self.config.read_retry_max);
        let mut read_failures: u32 = 0;

        loop {
            let batch = match self.reader.poll() {
                Ok(batch) => {
                    read_failures = 0;
                    batch
                }
                Err(e) => {
                    read_failures += 1;
                    let delay = read_backoff.jittered_delay_for(read_failures);
                    warn!(error = %e, failures = read_failures, "Log read failed, backing off");
                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                if sleep_or_shutdown(self.config.poll_interval, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let batch_fut = self.relay_batch(batch);
            tokio::pin!(batch_fut);

            tokio::select! {
                result = &mut batch_fut => {
                    if let Err(e) = result {
                        warn!(error = %e, "Relay batch failed, backing off");
                        read_failures += 1;
                        if sleep_or_shutdown(
                            read_backoff.jittered_delay_for(read_failures),
                            &mut shutdown,
                        )
                        .await
                        {
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown received, draining in-flight publishes");
                    match tokio::time::timeout(self.config.drain_timeout, &mut batch_fut).await {
                        Ok(Ok(())) => debug!("In-flight batch drained"),
                        Ok(Err(e)) => warn!(error = %e, "In-flight batch failed during drain"),
                        Err(_) => warn!(
                            "Drain timeout; unacknowledged records will be re-relayed on restart"
                        ),
                    }
                    break;
                }
            }
        }

        info!("Outbox relay stopped");
    }

    /// Publish one polled batch and advance the cursor in sequence order.
    async fn relay_batch(
        &self,
        batch: Vec<fanout_database::ChangeRecord>,
    ) -> OutboxResult<()> {
        debug!(records = batch.len(), "Relaying batch");

        let outcomes = join_all(batch.iter().map(|record| self.publisher.publish(record))).await;

        // Every record is resolved; advance strictly in log order so the
        // cursor never passes a record that was not acknowledged or parked.
        for (record, outcome) in batch.iter().zip(outcomes) {
            if let PublishOutcome::Parked { error, attempts } = outcome {
                warn!(
                    sequence_id = record.sequence_id,
                    aggregate_id = %record.aggregate_id,
                    attempts,
                    "Parking record in dead letters"
                );
                self.db
                    .park_dead_letter(&NewDeadLetter::from_record(record, &error, attempts))?;
            }
            self.db.advance_cursor(record.sequence_id)?;
        }

        Ok(())
    }
}

/// Sleep, returning true if shutdown fired first.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.recv() => true,
    }
}
