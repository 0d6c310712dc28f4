//! Push server: NDJSON notification streaming over a Unix domain socket.
//!
//! A client sends `subscribe` with its user id; the server registers the
//! connection, replays undelivered notifications oldest-first, then streams
//! live pushes until `unsubscribe` or EOF.

use crate::{
    DeliveryRouter, Frame, OutboundQueue, PushError, PushResult, Request,
};
use fanout_core::OverflowPolicy;
use fanout_database::Database;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Push server configuration.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Unix socket the server listens on.
    pub socket_path: PathBuf,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
    /// Policy when a connection's queue overflows.
    pub overflow_policy: OverflowPolicy,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/fanoutd.sock"),
            queue_capacity: 256,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Push server listening on a Unix domain socket.
pub struct PushServer {
    config: PushConfig,
    db: Arc<Database>,
    router: Arc<DeliveryRouter>,
}

impl PushServer {
    /// Create a new push server.
    pub fn new(config: PushConfig, db: Arc<Database>, router: Arc<DeliveryRouter>) -> Self {
        Self { config, db, router }
    }

    /// Start the server and accept connections until shutdown.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> PushResult<()> {
        // Remove existing socket file
        let socket_path = Path::new(&self.config.socket_path);
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)?;
        info!(path = %self.config.socket_path.display(), "Push server listening");

        let mut shutdown_rx = shutdown.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let db = Arc::clone(&self.db);
                            let router = Arc::clone(&self.router);
                            let config = self.config.clone();
                            let conn_shutdown = shutdown.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, db, router, config, conn_shutdown).await
                                {
                                    error!(error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Push server shutting down");
                    break;
                }
            }
        }

        // Cleanup socket file
        let _ = std::fs::remove_file(&self.config.socket_path);

        Ok(())
    }
}

/// Handle a single client connection.
async fn handle_connection(
    stream: UnixStream,
    db: Arc<Database>,
    router: Arc<DeliveryRouter>,
    config: PushConfig,
    shutdown: broadcast::Receiver<()>,
) -> PushResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    debug!("Client connected");

    // Request phase: answer pings until the client subscribes
    let user_id = loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            debug!("Client disconnected before subscribing");
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match Request::from_json(trimmed) {
            Ok(Request::Subscribe { user_id }) => break user_id,
            Ok(Request::Ping) => {
                write_frame(&mut writer, &Frame::Pong).await?;
            }
            Ok(Request::Unsubscribe) => {
                write_frame(&mut writer, &Frame::Unsubscribed).await?;
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse request");
                write_frame(
                    &mut writer,
                    &Frame::Error {
                        message: format!("parse error: {}", e),
                    },
                )
                .await?;
            }
        }
    };

    // Register first so no notification accepted from here on can be missed;
    // the replay query below may then overlap a racing live push, which the
    // client is required to tolerate (same id seen twice).
    let queue = Arc::new(OutboundQueue::new(
        config.queue_capacity,
        config.overflow_policy,
    ));
    let registry = router.registry();
    let handle = registry.register(&user_id, Arc::clone(&queue)).await;

    let replayed = match router.replay(&user_id, &queue).await {
        Ok(count) => count,
        Err(e) => {
            registry.unregister(&user_id, handle.connection_id()).await;
            return Err(e);
        }
    };

    write_frame(
        &mut writer,
        &Frame::Subscribed {
            user_id: user_id.clone(),
            replayed,
        },
    )
    .await?;

    info!(user_id = %user_id, replayed, "Client subscribed, entering streaming mode");
    let result =
        stream_notifications(reader, writer, &db, &queue, &user_id, shutdown).await;

    registry.unregister(&user_id, handle.connection_id()).await;
    info!(user_id = %user_id, "Streaming ended");

    result
}

/// Streaming phase: drain the outbound queue to the socket.
async fn stream_notifications(
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    db: &Database,
    queue: &Arc<OutboundQueue>,
    user_id: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> PushResult<()> {
    let mut line = String::new();

    loop {
        tokio::select! {
            // Deliver queued notifications
            notification = queue.pop() => {
                match notification {
                    Some(notification) => {
                        let id = notification.id.clone();
                        if let Err(e) = write_frame(&mut writer, &Frame::notification(&notification)).await {
                            // Stale handle: the transport is gone
                            debug!(user_id = %user_id, error = %e, "Write failed, client disconnected");
                            break;
                        }
                        // The flushed write is the transport acknowledgment;
                        // first device to receive it flips the flag
                        if let Err(e) = db.mark_notification_delivered(&id) {
                            warn!(id = %id, error = %e, "Failed to mark delivered");
                        }
                    }
                    None => {
                        // Queue closed: overflow under the disconnect policy
                        let _ = write_frame(&mut writer, &Frame::Error {
                            message: "outbound queue overflow, disconnecting".to_string(),
                        }).await;
                        warn!(user_id = %user_id, "Disconnecting slow client");
                        break;
                    }
                }
            }

            // Handle client commands (unsubscribe or disconnect)
            read_result = reader.read_line(&mut line) => {
                match read_result {
                    Ok(0) => {
                        debug!(user_id = %user_id, "Client disconnected");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            match Request::from_json(trimmed) {
                                Ok(Request::Unsubscribe) => {
                                    let _ = write_frame(&mut writer, &Frame::Unsubscribed).await;
                                    debug!(user_id = %user_id, "Client unsubscribed");
                                    break;
                                }
                                Ok(Request::Ping) => {
                                    let _ = write_frame(&mut writer, &Frame::Pong).await;
                                }
                                _ => {}
                            }
                        }
                        line.clear();
                    }
                    Err(e) => {
                        debug!(user_id = %user_id, error = %e, "Read error in stream");
                        break;
                    }
                }
            }

            // Graceful shutdown: one final flush attempt, then close
            _ = shutdown.recv() => {
                while let Some(notification) = queue.try_pop().await {
                    let id = notification.id.clone();
                    if write_frame(&mut writer, &Frame::notification(&notification)).await.is_err() {
                        break;
                    }
                    let _ = db.mark_notification_delivered(&id);
                }
                debug!(user_id = %user_id, "Connection closed on shutdown");
                break;
            }
        }
    }

    Ok(())
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> PushResult<()> {
    let json = frame.to_json()?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Client for the push socket.
pub struct PushClient {
    socket_path: PathBuf,
}

impl PushClient {
    /// Create a new client.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Check the server is alive.
    pub async fn ping(&self) -> bool {
        let Ok(stream) = UnixStream::connect(&self.socket_path).await else {
            return false;
        };
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let Ok(json) = Request::Ping.to_json() else {
            return false;
        };
        if writer.write_all(json.as_bytes()).await.is_err()
            || writer.write_all(b"\n").await.is_err()
            || writer.flush().await.is_err()
        {
            return false;
        }

        let mut line = String::new();
        matches!(reader.read_line(&mut line).await, Ok(n) if n > 0)
            && matches!(Frame::from_json(line.trim()), Ok(Frame::Pong))
    }

    /// Subscribe to a user's notification stream.
    pub async fn subscribe(&self, user_id: &str) -> PushResult<PushSubscription> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request = Request::Subscribe {
            user_id: user_id.to_string(),
        };
        writer.write_all(request.to_json()?.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(PushError::ConnectionClosed);
        }

        match Frame::from_json(line.trim())? {
            Frame::Subscribed { replayed, .. } => Ok(PushSubscription {
                user_id: user_id.to_string(),
                replayed,
                reader,
                writer,
                line_buffer: String::new(),
            }),
            Frame::Error { message } => Err(PushError::Protocol(message)),
            other => Err(PushError::Protocol(format!(
                "unexpected frame: {:?}",
                other
            ))),
        }
    }
}

/// A live notification stream for one user.
pub struct PushSubscription {
    user_id: String,
    replayed: usize,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line_buffer: String,
}

impl PushSubscription {
    /// User this stream is for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// How many undelivered notifications the server replayed on connect.
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    /// Receive the next frame. Returns None when the stream closes.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            self.line_buffer.clear();
            match self.reader.read_line(&mut self.line_buffer).await {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = self.line_buffer.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match Frame::from_json(trimmed) {
                        Ok(frame) => return Some(frame),
                        Err(e) => {
                            warn!(error = %e, "Failed to parse frame");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Read error in subscription");
                    return None;
                }
            }
        }
    }

    /// Unsubscribe and close the stream.
    pub async fn unsubscribe(mut self) -> PushResult<()> {
        let request = Request::Unsubscribe;
        self.writer.write_all(request.to_json()?.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectionRegistry;
    use fanout_database::Notification;
    use std::time::Duration;

    struct TestServer {
        _dir: tempfile::TempDir,
        socket_path: PathBuf,
        db: Arc<Database>,
        router: Arc<DeliveryRouter>,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Sender<()>,
    }

    async fn start_server(policy: OverflowPolicy) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("push.sock");

        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(DeliveryRouter::new(Arc::clone(&db), Arc::clone(&registry)));

        let config = PushConfig {
            socket_path: socket_path.clone(),
            queue_capacity: 16,
            overflow_policy: policy,
        };
        let server = PushServer::new(config, Arc::clone(&db), Arc::clone(&router));
        let (shutdown, _) = broadcast::channel(1);
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.run(shutdown).await });
        }

        // Wait for the socket to appear
        for _ in 0..50 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        TestServer {
            _dir: dir,
            socket_path,
            db,
            router,
            registry,
            shutdown,
        }
    }

    fn persisted(db: &Database, id: &str, user_id: &str, body: &str) -> Notification {
        db.insert_notification_if_new(id, user_id, body)
            .unwrap()
            .expect("fresh message id")
    }

    #[tokio::test]
    async fn test_ping() {
        let server = start_server(OverflowPolicy::DropOldest).await;
        let client = PushClient::new(&server.socket_path);
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn test_live_push_marks_delivered() {
        let server = start_server(OverflowPolicy::DropOldest).await;
        let client = PushClient::new(&server.socket_path);

        let mut subscription = client.subscribe("u1").await.unwrap();
        assert_eq!(subscription.replayed(), 0);

        // Wait for the registration to land before routing
        for _ in 0..50 {
            if server.registry.connection_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let notification = persisted(&server.db, "m1", "u1", "shipped");
        server.router.on_notification(notification).await;

        let frame = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        match frame {
            Frame::Notification { id, body, .. } => {
                assert_eq!(id, "m1");
                assert_eq!(body, "shipped");
            }
            other => panic!("expected Notification, got {:?}", other),
        }

        // The flushed write flips the delivered flag
        for _ in 0..50 {
            if server.db.undelivered_count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.db.undelivered_count().unwrap(), 0);

        server.shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_replay_on_connect_oldest_first() {
        let server = start_server(OverflowPolicy::DropOldest).await;

        // Notifications accumulated while the user had no connections
        for i in 1..=3 {
            persisted(&server.db, &format!("m{}", i), "u1", &format!("n{}", i));
        }

        let client = PushClient::new(&server.socket_path);
        let mut subscription = client.subscribe("u1").await.unwrap();
        assert_eq!(subscription.replayed(), 3);

        for i in 1..=3 {
            let frame = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
                .await
                .unwrap()
                .unwrap();
            match frame {
                Frame::Notification { id, .. } => assert_eq!(id, format!("m{}", i)),
                other => panic!("expected Notification, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_unregisters() {
        let server = start_server(OverflowPolicy::DropOldest).await;
        let client = PushClient::new(&server.socket_path);

        let subscription = client.subscribe("u1").await.unwrap();
        for _ in 0..50 {
            if server.registry.connection_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        subscription.unsubscribe().await.unwrap();

        for _ in 0..50 {
            if server.registry.connection_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_client_drop_unregisters() {
        let server = start_server(OverflowPolicy::DropOldest).await;
        let client = PushClient::new(&server.socket_path);

        let subscription = client.subscribe("u1").await.unwrap();
        for _ in 0..50 {
            if server.registry.connection_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Abrupt disconnect, no unsubscribe
        drop(subscription);

        for _ in 0..50 {
            if server.registry.connection_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_undelivered_survives_for_next_connect() {
        let server = start_server(OverflowPolicy::DropOldest).await;

        // Delivered while nobody is connected
        persisted(&server.db, "m1", "u1", "first");
        server
            .router
            .on_notification(server.db.undelivered_notifications("u1").unwrap()[0].clone())
            .await;
        assert_eq!(server.db.undelivered_count().unwrap(), 1);

        // The next connect replays it
        let client = PushClient::new(&server.socket_path);
        let mut subscription = client.subscribe("u1").await.unwrap();
        assert_eq!(subscription.replayed(), 1);

        let frame = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Frame::Notification { id, .. } if id == "m1"));
    }
}
