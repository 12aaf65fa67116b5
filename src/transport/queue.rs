//! Single-flight request queue over one TCP connection.
//!
//! The controller protocol has no correlation id, so the next chunk read after
//! a write is taken as the reply to that write. To keep that true, one worker
//! task owns the socket and serves queued requests strictly one at a time.
//!
//! ```text
//! callers ──request()──► mpsc ──► worker ──write──► controller
//!                          ▲         │◄──read───┘
//!                          └─oneshot─┘
//!                                    └─idle reads──► broadcast (unsolicited)
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use crate::core::error::{GatewayError, Result};
use crate::core::logging::{ErrorContext, LogContext, PacketDirection, TracingLogHandler, TransportLogEvent};
use crate::core::traits::{ConnectionState, Diagnostics, FrameTransport};

/// Default controller TCP port.
pub const DEFAULT_PORT: u16 = 10001;

/// Default connect and request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

const DEFAULT_QUEUE_SIZE: usize = 64;
const UNSOLICITED_CAPACITY: usize = 64;
const READ_BUFFER_SIZE: usize = 1024;

/// Silence that ends a drain once late data has started arriving.
const DRAIN_QUIET: Duration = Duration::from_millis(20);

/// Transport queue configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Controller host.
    pub host: String,

    /// Controller TCP port.
    pub port: u16,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Reply deadline per request.
    pub request_timeout: Duration,

    /// Pending request capacity.
    pub queue_size: usize,
}

impl TransportConfig {
    /// Create a configuration with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the pending request capacity.
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    /// `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Inbound traffic nobody asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsolicitedEvent {
    /// Data read while no request was waiting for it, late replies included.
    Data(Vec<u8>),

    /// The connection failed.
    Error(String),
}

struct PendingRequest {
    frame: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// Counters shared between the queue handle and its worker.
#[derive(Default)]
struct SharedStats {
    state: AtomicU8,
    request_count: AtomicU64,
    reply_count: AtomicU64,
    timeout_count: AtomicU64,
    error_count: AtomicU64,
    unsolicited_count: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl SharedStats {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Handle to the transport worker.
///
/// Cheap to share behind an `Arc`. Dropping the last handle stops the worker
/// and closes the socket.
pub struct TransportQueue {
    endpoint: String,
    request_tx: mpsc::Sender<PendingRequest>,
    unsolicited_tx: broadcast::Sender<UnsolicitedEvent>,
    stats: Arc<SharedStats>,
    worker: JoinHandle<()>,
}

impl TransportQueue {
    /// Spawn a queue that logs through `tracing`.
    ///
    /// Must be called from within a tokio runtime. No connection is made
    /// until the first request.
    pub fn new(config: TransportConfig) -> Self {
        let log = LogContext::new(config.endpoint()).with_handler(Arc::new(TracingLogHandler));
        Self::with_log_context(config, log)
    }

    /// Spawn a queue with a custom log context.
    pub fn with_log_context(config: TransportConfig, log: LogContext) -> Self {
        let endpoint = config.endpoint();
        let (request_tx, request_rx) = mpsc::channel(config.queue_size.max(1));
        let (unsolicited_tx, _) = broadcast::channel(UNSOLICITED_CAPACITY);
        let stats = Arc::new(SharedStats::default());

        let worker = Worker {
            endpoint: endpoint.clone(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            request_rx,
            unsolicited_tx: unsolicited_tx.clone(),
            stats: Arc::clone(&stats),
            log,
            stream: None,
            needs_drain: false,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            endpoint,
            request_tx,
            unsolicited_tx,
            stats,
            worker,
        }
    }

    /// Controller endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a frame and wait for its reply.
    ///
    /// Requests are served in submission order, one at a time.
    pub async fn request(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(PendingRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GatewayError::Internal("transport worker stopped".into()))?;

        reply_rx
            .await
            .map_err(|_| GatewayError::Internal("transport worker dropped the request".into()))?
    }

    /// Subscribe to unsolicited data and connection errors.
    pub fn subscribe_unsolicited(&self) -> broadcast::Receiver<UnsolicitedEvent> {
        self.unsolicited_tx.subscribe()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.stats.state()
    }

    /// Snapshot of link counters.
    pub async fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            endpoint: self.endpoint.clone(),
            connection_state: self.stats.state(),
            request_count: self.stats.request_count.load(Ordering::Relaxed),
            reply_count: self.stats.reply_count.load(Ordering::Relaxed),
            timeout_count: self.stats.timeout_count.load(Ordering::Relaxed),
            error_count: self.stats.error_count.load(Ordering::Relaxed),
            unsolicited_count: self.stats.unsolicited_count.load(Ordering::Relaxed),
            last_error: self.stats.last_error.read().await.clone(),
        }
    }
}

impl Drop for TransportQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[async_trait]
impl FrameTransport for TransportQueue {
    async fn request(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        TransportQueue::request(self, frame).await
    }
}

// ============================================================================
// Worker
// ============================================================================

enum Idle {
    Request(Option<PendingRequest>),
    Read(io::Result<usize>),
}

struct Worker {
    endpoint: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    request_rx: mpsc::Receiver<PendingRequest>,
    unsolicited_tx: broadcast::Sender<UnsolicitedEvent>,
    stats: Arc<SharedStats>,
    log: LogContext,
    stream: Option<TcpStream>,
    /// A request timed out and its reply may still be in flight.
    needs_drain: bool,
}

impl Worker {
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let idle = match self.stream.as_mut() {
                Some(stream) => tokio::select! {
                    request = self.request_rx.recv() => Idle::Request(request),
                    read = stream.read(&mut buf) => Idle::Read(read),
                },
                None => Idle::Request(self.request_rx.recv().await),
            };

            match idle {
                Idle::Request(Some(request)) => {
                    let result = self.exchange(request.frame).await;
                    // The caller may have given up; nothing to do then.
                    let _ = request.reply.send(result);
                }
                Idle::Request(None) => break,
                Idle::Read(Ok(0)) => {
                    self.fail(GatewayError::ConnectionClosed, ErrorContext::Read).await;
                }
                Idle::Read(Ok(n)) => {
                    self.needs_drain = false;
                    self.unsolicited(buf[..n].to_vec()).await;
                }
                Idle::Read(Err(e)) => {
                    self.fail(e.into(), ErrorContext::Read).await;
                }
            }
        }

        if self.stream.take().is_some() {
            self.stats.set_state(ConnectionState::Disconnected);
            self.log.log(TransportLogEvent::disconnected(None)).await;
        }
        debug!(endpoint = %self.endpoint, "Transport worker stopped");
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        self.stats.set_state(ConnectionState::Connecting);
        let started = Instant::now();

        let stream = match timeout(self.connect_timeout, TcpStream::connect(self.endpoint.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let err = GatewayError::Connection(format!("connect to {} failed: {}", self.endpoint, e));
                return Err(self.fail(err, ErrorContext::Connect).await);
            }
            Err(_) => {
                let err = GatewayError::Connection(format!(
                    "connect to {} timed out after {}ms",
                    self.endpoint,
                    self.connect_timeout.as_millis()
                ));
                return Err(self.fail(err, ErrorContext::Connect).await);
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(endpoint = %self.endpoint, error = %e, "Failed to set TCP_NODELAY");
        }

        self.stream = Some(stream);
        self.stats.set_state(ConnectionState::Connected);
        self.log.log(TransportLogEvent::connected(started.elapsed())).await;
        Ok(())
    }

    async fn exchange(&mut self, frame: Vec<u8>) -> Result<Vec<u8>> {
        if self.needs_drain {
            self.drain().await;
        }
        self.connect().await?;

        let deadline = Instant::now() + self.request_timeout;
        self.stats.request_count.fetch_add(1, Ordering::Relaxed);
        self.log
            .log(TransportLogEvent::raw_packet(PacketDirection::Send, &frame))
            .await;

        let Some(stream) = self.stream.as_mut() else {
            return Err(GatewayError::Internal("no connection after connect".into()));
        };

        match timeout_at(deadline, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(e.into(), ErrorContext::Write).await),
            Err(_) => {
                // Part of the frame may be on the wire; the link can't be trusted.
                let err = GatewayError::RequestTimeout(self.request_timeout);
                self.stats.timeout_count.fetch_add(1, Ordering::Relaxed);
                return Err(self.fail(err, ErrorContext::Write).await);
            }
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        match timeout_at(deadline, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Err(self.fail(GatewayError::ConnectionClosed, ErrorContext::Read).await),
            Ok(Ok(n)) => {
                buf.truncate(n);
                self.stats.reply_count.fetch_add(1, Ordering::Relaxed);
                self.log
                    .log(TransportLogEvent::raw_packet(PacketDirection::Receive, &buf))
                    .await;
                Ok(buf)
            }
            Ok(Err(e)) => Err(self.fail(e.into(), ErrorContext::Read).await),
            Err(_) => {
                // The connection stays up. A late reply is drained before the next write.
                self.needs_drain = true;
                self.stats.timeout_count.fetch_add(1, Ordering::Relaxed);
                self.log
                    .log(TransportLogEvent::timeout(self.request_timeout))
                    .await;
                Err(GatewayError::RequestTimeout(self.request_timeout))
            }
        }
    }

    /// Read out whatever a timed-out request still had coming.
    ///
    /// Waits up to one request timeout for the first chunk, then until the
    /// socket has been quiet for [`DRAIN_QUIET`]. Everything read goes to the
    /// unsolicited stream so it is never taken as the next request's reply.
    async fn drain(&mut self) {
        self.needs_drain = false;
        let mut wait = self.request_timeout;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return;
            };
            match timeout(wait, stream.read(&mut buf)).await {
                Err(_) => return,
                Ok(Ok(0)) => {
                    self.fail(GatewayError::ConnectionClosed, ErrorContext::Read).await;
                    return;
                }
                Ok(Ok(n)) => {
                    debug!(endpoint = %self.endpoint, size = n, "Drained late reply");
                    self.unsolicited(buf[..n].to_vec()).await;
                    wait = DRAIN_QUIET;
                }
                Ok(Err(e)) => {
                    self.fail(e.into(), ErrorContext::Read).await;
                    return;
                }
            }
        }
    }

    async fn unsolicited(&self, data: Vec<u8>) {
        self.stats.unsolicited_count.fetch_add(1, Ordering::Relaxed);
        self.log
            .log(TransportLogEvent::raw_packet(PacketDirection::Receive, &data))
            .await;
        let _ = self.unsolicited_tx.send(UnsolicitedEvent::Data(data));
    }

    /// Drop the connection and report `err` everywhere it needs to go.
    async fn fail(&mut self, err: GatewayError, context: ErrorContext) -> GatewayError {
        let message = err.to_string();
        let had_stream = self.stream.take().is_some();
        self.needs_drain = false;

        self.stats.set_state(ConnectionState::Error);
        self.stats.error_count.fetch_add(1, Ordering::Relaxed);
        *self.stats.last_error.write().await = Some(message.clone());

        self.log.log(TransportLogEvent::error(message.clone(), context)).await;
        if had_stream {
            self.log
                .log(TransportLogEvent::disconnected(Some(message.clone())))
                .await;
        }
        let _ = self.unsolicited_tx.send(UnsolicitedEvent::Error(message));

        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Capture {
        events: Mutex<Vec<TransportLogEvent>>,
    }

    #[async_trait]
    impl crate::core::logging::TransportLogHandler for Capture {
        async fn on_log(&self, _endpoint: &str, event: TransportLogEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    async fn listener() -> (TcpListener, TransportConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = TransportConfig::new("127.0.0.1", port)
            .with_connect_timeout(Duration::from_millis(500))
            .with_request_timeout(Duration::from_millis(200));
        (listener, config)
    }

    #[test]
    fn test_config_builder() {
        let config = TransportConfig::new("10.0.0.5", DEFAULT_PORT)
            .with_request_timeout(Duration::from_millis(100))
            .with_queue_size(0);
        assert_eq!(config.endpoint(), "10.0.0.5:10001");
        assert_eq!(config.connect_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.request_timeout, Duration::from_millis(100));
        assert_eq!(config.queue_size, 1);
    }

    #[tokio::test]
    async fn test_lazy_connect_and_reply() {
        let (listener, config) = listener().await;
        let queue = TransportQueue::new(config);
        assert_eq!(queue.connection_state(), ConnectionState::Disconnected);

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
            socket
        });

        let reply = queue.request(vec![0xAF, 0x01]).await.unwrap();
        assert_eq!(reply, vec![0xAF, 0x01]);
        assert!(queue.connection_state().is_connected());

        let diag = queue.diagnostics().await;
        assert_eq!(diag.request_count, 1);
        assert_eq!(diag.reply_count, 1);
        drop(server);
    }

    #[tokio::test]
    async fn test_timeout_keeps_connection() {
        let (listener, config) = listener().await;
        let queue = TransportQueue::new(config);

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            // Ignore the first request, answer the second.
            let _ = socket.read(&mut buf).await.unwrap();
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
            socket
        });

        let err = queue.request(vec![0x01]).await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestTimeout(_)));
        assert!(queue.connection_state().is_connected());

        let reply = queue.request(vec![0x02]).await.unwrap();
        assert_eq!(reply, vec![0x02]);
        assert_eq!(queue.diagnostics().await.timeout_count, 1);
        drop(server);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (listener, config) = listener().await;
        drop(listener);
        let queue = TransportQueue::new(config);
        let mut unsolicited = queue.subscribe_unsolicited();

        let err = queue.request(vec![0x01]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Connection(_)));
        assert_eq!(queue.connection_state(), ConnectionState::Error);
        assert!(matches!(unsolicited.recv().await.unwrap(), UnsolicitedEvent::Error(_)));
        assert!(queue.diagnostics().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let (listener, config) = listener().await;
        let queue = TransportQueue::new(config);

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await.unwrap();
            drop(socket);
            // Accept the reconnect and answer it.
            let (mut socket, _) = listener.accept().await.unwrap();
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
            socket
        });

        let err = queue.request(vec![0x01]).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionClosed));

        let reply = queue.request(vec![0x03]).await.unwrap();
        assert_eq!(reply, vec![0x03]);
        drop(server);
    }

    #[tokio::test]
    async fn test_late_reply_is_not_paired_with_next_request() {
        let (listener, config) = listener().await;
        let queue = TransportQueue::new(config);
        let mut unsolicited = queue.subscribe_unsolicited();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            // First reply comes after the 200ms deadline, the rest are echoed.
            let _ = socket.read(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            socket.write_all(&[0xA1, 0xA1]).await.unwrap();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(&buf[..n]).await.unwrap();
            }
        });

        let (first, second, third, fourth) = tokio::join!(
            queue.request(vec![0x01]),
            queue.request(vec![0x02]),
            queue.request(vec![0x03]),
            queue.request(vec![0x04]),
        );

        assert!(matches!(first, Err(GatewayError::RequestTimeout(_))));
        assert_eq!(second.unwrap(), vec![0x02]);
        assert_eq!(third.unwrap(), vec![0x03]);
        assert_eq!(fourth.unwrap(), vec![0x04]);

        assert_eq!(unsolicited.recv().await.unwrap(), UnsolicitedEvent::Data(vec![0xA1, 0xA1]));
        assert!(queue.connection_state().is_connected());

        let diag = queue.diagnostics().await;
        assert_eq!(diag.timeout_count, 1);
        assert_eq!(diag.reply_count, 3);
        assert_eq!(diag.unsolicited_count, 1);
        drop(queue);
        let _ = server.await;
    }

    #[tokio::test]
    async fn test_raw_frames_reach_log_handler() {
        let (listener, config) = listener().await;
        let capture = Arc::new(Capture::default());
        let log = LogContext::new(config.endpoint()).with_handler(capture.clone());
        let queue = TransportQueue::with_log_context(config, log);

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
            socket
        });

        queue.request(vec![0xAF, 0x02]).await.unwrap();

        let events = capture.events.lock().unwrap();
        let frames: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                TransportLogEvent::RawPacket { direction, data, .. } => Some((*direction, data.clone())),
                _ => None,
            })
            .collect();
        assert!(matches!(events[0], TransportLogEvent::Connected { .. }));
        assert_eq!(
            frames,
            vec![
                (PacketDirection::Send, vec![0xAF, 0x02]),
                (PacketDirection::Receive, vec![0xAF, 0x02]),
            ]
        );
        drop(events);
        drop(server);
    }
}
