//! Key-partitioned consumer worker pool.

use crate::DedupConsumer;
use async_trait::async_trait;
use fanout_bus::{drive_subscriber, BusError, BusMessage, BusResult, BusSubscription, Subscriber};
use fanout_database::{Database, Notification};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consumer pool configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of partitioned workers.
    pub workers: usize,
    /// Per-worker queue capacity.
    pub queue_capacity: usize,
    /// Dedup entry retention.
    pub dedup_retention: Duration,
    /// How often expired dedup entries are purged.
    pub purge_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            dedup_retention: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(60),
        }
    }
}

/// Runs the deduplicating consumer across partitioned workers.
///
/// The dispatcher routes each message to `hash(key) % workers`, so messages
/// for one aggregate always land on the same worker in arrival order, while
/// different aggregates proceed in parallel. The per-message dedup
/// transaction is the serialization point.
pub struct ConsumerPool {
    db: Arc<Database>,
    config: ConsumerConfig,
    accepted: mpsc::Sender<Notification>,
}

impl ConsumerPool {
    /// Create a new pool forwarding accepted notifications to `accepted`.
    pub fn new(
        db: Arc<Database>,
        config: ConsumerConfig,
        accepted: mpsc::Sender<Notification>,
    ) -> Self {
        Self {
            db,
            config,
            accepted,
        }
    }

    /// Run dispatcher, workers, and the dedup purge loop until shutdown.
    pub async fn run(&self, subscription: BusSubscription, shutdown: broadcast::Sender<()>) {
        let workers = self.config.workers.max(1);
        info!(workers, topic = %subscription.topic(), "Consumer pool started");

        let mut worker_txs: Vec<mpsc::Sender<BusMessage>> = Vec::with_capacity(workers);
        let mut worker_handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel(self.config.queue_capacity);
            worker_txs.push(tx);
            let consumer = DedupConsumer::new(Arc::clone(&self.db), self.accepted.clone());
            worker_handles.push(tokio::spawn(worker_loop(worker_id, rx, consumer)));
        }

        let purge_handle = tokio::spawn(purge_loop(
            Arc::clone(&self.db),
            self.config.dedup_retention,
            self.config.purge_interval,
            shutdown.subscribe(),
        ));

        // The dispatcher is the bus-facing Subscriber; it only routes
        let dispatcher = Dispatcher {
            worker_txs: worker_txs.clone(),
        };
        drive_subscriber(subscription, dispatcher, shutdown.subscribe()).await;

        // Closing the queues lets workers drain what they already hold
        drop(worker_txs);
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = purge_handle.await;

        info!("Consumer pool stopped");
    }
}

/// Bus-facing side of the pool: routes each message to its partition.
struct Dispatcher {
    worker_txs: Vec<mpsc::Sender<BusMessage>>,
}

#[async_trait]
impl Subscriber for Dispatcher {
    async fn on_message(&self, message: BusMessage) -> BusResult<()> {
        let partition = partition_for(&message.key, self.worker_txs.len());
        self.worker_txs[partition]
            .send(message)
            .await
            .map_err(|_| BusError::Closed(format!("worker {} queue closed", partition)))
    }
}

/// Stable partition for a message key.
fn partition_for(key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

/// One partitioned worker: drains its queue through the dedup consumer.
async fn worker_loop(worker_id: usize, mut rx: mpsc::Receiver<BusMessage>, consumer: DedupConsumer) {
    debug!(worker_id, "Consumer worker started");
    while let Some(message) = rx.recv().await {
        let message_id = message.message_id.clone();
        if let Err(e) = consumer.on_message(message).await {
            // Left unacknowledged at the dedup layer; a redelivery completes it
            warn!(worker_id, message_id = %message_id, error = %e, "Failed to handle message");
        }
    }
    debug!(worker_id, "Consumer worker stopped");
}

/// Periodically expire dedup entries past the retention window.
async fn purge_loop(
    db: Arc<Database>,
    retention: Duration,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let retention = chrono::Duration::from_std(retention)
        .unwrap_or_else(|_| chrono::Duration::hours(24));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match db.purge_dedup_entries(retention) {
                    Ok(removed) if removed > 0 => {
                        debug!(removed, "Purged expired dedup entries");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Dedup purge failed"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
