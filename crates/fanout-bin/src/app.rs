//! Daemon wiring and lifecycle.
//!
//! Every component is constructed here with its dependencies passed
//! explicitly: database -> bus -> relay -> consumer pool -> router -> push
//! server. One broadcast channel fans the shutdown signal out to all of them.

use anyhow::Context;
use fanout_bus::{Bus, InMemoryBus};
use fanout_consumer::{ConsumerConfig, ConsumerPool, NotificationPayload};
use fanout_core::{Config, Paths};
use fanout_database::{Database, NewChangeEvent, PoolConfig};
use fanout_outbox::{OutboxRelay, PublisherConfig, RelayConfig};
use fanout_push::{ConnectionRegistry, DeliveryRouter, PushClient, PushConfig, PushServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Consumer group the daemon's own pipeline subscribes as.
const CONSUMER_GROUP: &str = "notification-writers";

/// Capacity of the accepted-notification channel between consumer and router.
const ACCEPTED_CHANNEL_CAPACITY: usize = 1024;

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run_daemon(config: Config, paths: Paths) -> anyhow::Result<()> {
    paths.ensure_dirs()?;
    info!(base_dir = %paths.base_dir().display(), "Starting fanout daemon");

    let db = Arc::new(
        Database::open(&paths.database_file(), PoolConfig::default())
            .context("failed to open database")?,
    );
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(DeliveryRouter::new(Arc::clone(&db), registry));

    let (accepted_tx, accepted_rx) = mpsc::channel(ACCEPTED_CHANNEL_CAPACITY);
    let (shutdown_tx, _) = broadcast::channel(1);

    // Subscribe before the relay starts so no published record is missed
    let subscription = bus
        .subscribe(&config.topic, CONSUMER_GROUP)
        .await
        .context("failed to subscribe consumer group")?;

    let relay = Arc::new(OutboxRelay::new(
        Arc::clone(&db),
        Arc::clone(&bus),
        relay_config(&config),
    ));
    let consumer_pool = Arc::new(ConsumerPool::new(
        Arc::clone(&db),
        consumer_config(&config),
        accepted_tx,
    ));
    let push_server = Arc::new(PushServer::new(
        push_config(&config, &paths),
        Arc::clone(&db),
        Arc::clone(&router),
    ));

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn({
        let relay = Arc::clone(&relay);
        let shutdown = shutdown_tx.subscribe();
        async move { relay.run(shutdown).await }
    }));

    tasks.push(tokio::spawn({
        let pool = Arc::clone(&consumer_pool);
        let shutdown = shutdown_tx.clone();
        async move { pool.run(subscription, shutdown).await }
    }));

    tasks.push(tokio::spawn({
        let router = Arc::clone(&router);
        let shutdown = shutdown_tx.subscribe();
        async move { router.run(accepted_rx, shutdown).await }
    }));

    tasks.push(tokio::spawn({
        let server = Arc::clone(&push_server);
        let shutdown = shutdown_tx.clone();
        async move {
            if let Err(e) = server.run(shutdown).await {
                error!(error = %e, "Push server failed");
            }
        }
    }));

    info!("Fanout daemon started");
    wait_for_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());

    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    for task in tasks {
        if tokio::time::timeout(drain, task).await.is_err() {
            warn!("Component did not stop within the drain timeout");
        }
    }

    info!("Fanout daemon stopped");
    Ok(())
}

/// Print daemon liveness and pipeline counters.
pub async fn check_status(paths: &Paths) -> anyhow::Result<()> {
    let client = PushClient::new(paths.socket_file());
    let alive = client.ping().await;
    println!("daemon: {}", if alive { "running" } else { "not running" });

    if !paths.database_file().exists() {
        println!("database: not created yet");
        return Ok(());
    }

    let db = Database::open(&paths.database_file(), PoolConfig::default())?;
    println!("cursor: {}", db.cursor()?);
    println!("outbox backlog: {}", db.outbox_backlog()?);
    println!("undelivered notifications: {}", db.undelivered_count()?);
    println!("dead letters: {}", db.dead_letter_count()?);

    Ok(())
}

/// Append a change event to the outbox log.
///
/// The running daemon's relay picks it up on its next poll, so this doubles
/// as an end-to-end smoke test of the pipeline.
pub fn emit_event(
    paths: &Paths,
    user_id: &str,
    body: &str,
    aggregate_id: Option<&str>,
    event_type: &str,
) -> anyhow::Result<()> {
    let db = Database::open(&paths.database_file(), PoolConfig::default())?;

    let payload = serde_json::to_vec(&NotificationPayload {
        user_id: user_id.to_string(),
        body: body.to_string(),
    })?;

    let record = db.append_outbox_event(&NewChangeEvent {
        aggregate_id: aggregate_id.unwrap_or(user_id).to_string(),
        event_type: event_type.to_string(),
        payload,
    })?;

    println!("appended sequence_id={}", record.sequence_id);
    Ok(())
}

fn relay_config(config: &Config) -> RelayConfig {
    RelayConfig {
        topic: config.topic.clone(),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        batch_size: config.poll_batch_size,
        publisher: PublisherConfig {
            max_attempts: config.publish_max_attempts,
            ..PublisherConfig::default()
        },
        drain_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        ..RelayConfig::default()
    }
}

fn consumer_config(config: &Config) -> ConsumerConfig {
    ConsumerConfig {
        workers: config.consumer_workers,
        dedup_retention: Duration::from_secs(config.dedup_retention_secs),
        ..ConsumerConfig::default()
    }
}

fn push_config(config: &Config, paths: &Paths) -> PushConfig {
    PushConfig {
        socket_path: paths.socket_file(),
        queue_capacity: config.connection_queue_capacity,
        overflow_policy: config.overflow_policy,
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
