//! Stream connection lifecycle management.
//!
//! [`Connection::open`] spawns a supervisor task that connects,
//! authenticates, streams feed messages into the order book, and on any
//! failure discards the book and reconnects with exponential backoff.
//! The supervisor moves through [`ConnectionState`]; `Closed` is only
//! reached through [`Connection::close`] and is final.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tungstenite::Message as WsMessage;

use super::backoff::Backoff;
use super::handler::{FeedProcessor, Processed};
use super::notifier::{ConnectCallback, Notifier, UpdateCallback};
use super::{WsReader, WsWriter, connect, send_credentials, send_keepalive, stream_url};
use crate::Result;
use crate::book::{OrderBook, Snapshot};
use crate::config::{DEFAULT_WEBSOCKET_URL, StreamSettings};
use crate::error::StreambookError;
use crate::models::Credentials;
use crate::models::update::Update;

/// Upper bound on sending the close frame during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opened, supervisor not yet running.
    Idle,
    /// Handshake and authentication in progress.
    Connecting,
    /// Authenticated and reading feed messages.
    Streaming,
    /// Waiting before the next connection attempt.
    Backoff,
    /// Closed by the consumer. Terminal.
    Closed,
}

/// Options accepted by [`Connection::open`].
#[derive(Clone)]
pub struct StreamOptions {
    websocket_url: String,
    settings: StreamSettings,
    update_callback: Option<UpdateCallback>,
    connect_callback: Option<ConnectCallback>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            settings: StreamSettings::default(),
            update_callback: None,
            connect_callback: None,
        }
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("websocket_url", &self.websocket_url)
            .field("settings", &self.settings)
            .field("update_callback", &self.update_callback.is_some())
            .field("connect_callback", &self.connect_callback.is_some())
            .finish()
    }
}

impl StreamOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the endpoint. The pair is appended as `/api/1/stream/{pair}`.
    #[must_use]
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Registers a callback invoked once per applied diff, off the reader task.
    #[must_use]
    pub fn with_update_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        self.update_callback = Some(Arc::new(callback));
        self
    }

    /// Registers a callback invoked each time a connection starts streaming.
    #[must_use]
    pub fn with_connect_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.connect_callback = Some(Arc::new(callback));
        self
    }
}

/// State shared between the handle and the supervisor task.
struct Shared {
    state: Mutex<ConnectionState>,
    close_signal: Notify,
    book: Arc<OrderBook>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Moves to `next` unless closed. Returns `false` if closed.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.lock_state();
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = next;
        true
    }

    fn close(&self) {
        {
            let mut state = self.lock_state();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        // Stores a permit if the supervisor is between awaits.
        self.close_signal.notify_one();
    }

    /// Runs `fut` unless the connection is closed first.
    async fn until_closed<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_closed() {
            return None;
        }
        tokio::select! {
            out = fut => Some(out),
            () = self.close_signal.notified() => None,
        }
    }
}

/// Handle to a supervised stream.
///
/// Dropping the handle closes the stream.
pub struct Connection {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Validates the credentials and starts the supervisor on the current
    /// tokio runtime. Returns without waiting for the first connection.
    ///
    /// # Errors
    ///
    /// Returns [`StreambookError::MissingCredentials`] if either credential
    /// is empty, and [`StreambookError::Config`] if `pair` is empty, a
    /// setting is out of range, or no tokio runtime is running.
    pub fn open(credentials: Credentials, pair: &str, options: StreamOptions) -> Result<Self> {
        if !credentials.is_complete() {
            return Err(StreambookError::MissingCredentials);
        }
        if pair.is_empty() {
            return Err(StreambookError::Config("pair must not be empty".to_string()));
        }
        options.settings.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            StreambookError::Config(format!("open requires a tokio runtime: {e}"))
        })?;

        crate::tls::install_crypto_provider();

        let book = Arc::new(OrderBook::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Idle),
            close_signal: Notify::new(),
            book: book.clone(),
        });

        let notifier = options.update_callback.map(|callback| {
            Notifier::spawn(
                &runtime,
                callback,
                options.settings.notify_queue,
                options.settings.notify_timeout,
            )
        });

        let supervisor = Supervisor {
            shared: shared.clone(),
            url: stream_url(&options.websocket_url, pair),
            credentials,
            settings: options.settings,
            processor: FeedProcessor::new(book),
            notifier,
            on_connect: options.connect_callback,
        };
        let task = runtime.spawn(supervisor.run());

        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    /// Current copy of the book. Sequence `0` means resynchronising.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.book.snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stops the supervisor and tears down any live connection. Idempotent.
    pub fn close(&self) {
        if !self.shared.is_closed() {
            info!("Closing stream");
        }
        self.shared.close();
    }

    /// Closes and waits for the supervisor task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("Stream supervisor task failed: {e}");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("sequence", &self.shared.book.sequence())
            .finish()
    }
}

/// Owns the reconnect loop. Runs on its own task until closed.
struct Supervisor {
    shared: Arc<Shared>,
    url: String,
    credentials: Credentials,
    settings: StreamSettings,
    processor: FeedProcessor,
    notifier: Option<Notifier>,
    on_connect: Option<ConnectCallback>,
}

impl Supervisor {
    async fn run(self) {
        let mut backoff = Backoff::new(self.settings.backoff);

        loop {
            if !self.shared.transition(ConnectionState::Connecting) {
                break;
            }
            self.shared.book.reset();

            info!(url = %self.url, attempt = backoff.attempt(), "Connecting to stream");
            let mut streaming_since = None;
            match self.stream(&mut streaming_since).await {
                Ok(()) => debug!("Stream ended by close request"),
                Err(e) => warn!("Stream disconnected: {e}"),
            }
            self.shared.book.reset();

            if let Some(since) = streaming_since
                && since.elapsed() >= self.settings.healthy_after
            {
                debug!("Connection was healthy, resetting backoff");
                backoff.reset();
            }

            if !self.shared.transition(ConnectionState::Backoff) {
                break;
            }
            let delay = backoff.next_delay();
            info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                failures = backoff.attempt(),
                "Backing off before reconnect"
            );
            if self
                .shared
                .until_closed(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                break;
            }
        }

        self.shared.book.reset();
        info!("Stream supervisor stopped");
    }

    /// One connection: handshake, authenticate, stream until error or close.
    ///
    /// Returns `Ok(())` only when interrupted by a close request.
    async fn stream(&self, streaming_since: &mut Option<Instant>) -> Result<()> {
        let Some(connected) = self.shared.until_closed(connect(&self.url)).await else {
            return Ok(());
        };
        let (mut write, mut read) = connected?;
        send_credentials(&mut write, &self.credentials).await?;

        self.shared.book.reset();
        if !self.shared.transition(ConnectionState::Streaming) {
            close_writer(&mut write).await;
            return Ok(());
        }
        *streaming_since = Some(Instant::now());
        info!("Stream authenticated, waiting for snapshot");

        if let Some(callback) = &self.on_connect {
            let callback = callback.clone();
            tokio::task::spawn_blocking(move || callback());
        }

        let writer = Arc::new(tokio::sync::Mutex::new(write));
        let mut keepalive = tokio::spawn(keepalive_loop(
            writer.clone(),
            self.settings.keepalive_interval,
        ));

        let result = read_until_keepalive_fails(self.read_loop(&mut read), &mut keepalive).await;

        keepalive.abort();
        let mut write = writer.lock().await;
        close_writer(&mut write).await;

        result
    }

    /// Feeds frames to the processor until the stream fails or is closed.
    async fn read_loop(&self, read: &mut WsReader) -> Result<()> {
        loop {
            let Some(msg) = self.shared.until_closed(read.next()).await else {
                return Ok(());
            };

            let processed = match msg {
                Some(Ok(WsMessage::Text(text))) => self.processor.process_text(&text)?,
                Some(Ok(WsMessage::Binary(data))) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| StreambookError::MalformedMessage(e.to_string()))?;
                    self.processor.process_text(text)?
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(?frame, "Server closed the stream");
                    return Err(tungstenite::Error::ConnectionClosed.into());
                }
                Some(Ok(_)) => continue, // Ping/Pong/raw frames
                Some(Err(e)) => return Err(e.into()),
                None => return Err(tungstenite::Error::ConnectionClosed.into()),
            };

            match processed {
                Processed::Applied(update) => {
                    if let Some(notifier) = &self.notifier {
                        notifier.notify(update).await;
                    }
                }
                Processed::Snapshot { sequence } => {
                    info!(sequence, "Order book synchronised");
                }
                Processed::Ignored { .. } | Processed::KeepAlive => {}
            }
        }
    }
}

/// Sends a keep-alive every `every` until aborted. Returns the first send error.
async fn keepalive_loop(
    writer: Arc<tokio::sync::Mutex<WsWriter>>,
    every: Duration,
) -> StreambookError {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        ticker.tick().await;
        let mut write = writer.lock().await;
        if let Err(e) = send_keepalive(&mut write).await {
            return e;
        }
    }
}

/// Drives `read` until it finishes or the keep-alive task fails, whichever
/// comes first. A failed keep-alive means the transport is dead.
async fn read_until_keepalive_fails<F>(
    read: F,
    keepalive: &mut JoinHandle<StreambookError>,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        result = read => result,
        failed = keepalive => match failed {
            Ok(e) => {
                warn!("Keep-alive failed: {e}");
                Err(e)
            }
            Err(e) => {
                warn!("Keep-alive task stopped: {e}");
                Err(tungstenite::Error::ConnectionClosed.into())
            }
        },
    }
}

async fn close_writer(write: &mut WsWriter) {
    match tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await {
        Ok(Ok(())) => debug!("WebSocket closed"),
        Ok(Err(e)) => debug!("WebSocket close failed: {e}"),
        Err(_) => debug!("WebSocket close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::BackoffConfig;

    #[test]
    fn open_rejects_missing_credentials() {
        let err = Connection::open(Credentials::new("", "secret"), "XBTZAR", StreamOptions::new())
            .unwrap_err();
        assert!(matches!(err, StreambookError::MissingCredentials));

        let err = Connection::open(Credentials::new("id", ""), "XBTZAR", StreamOptions::new())
            .unwrap_err();
        assert!(matches!(err, StreambookError::MissingCredentials));
    }

    #[test]
    fn open_outside_runtime_is_config_error() {
        let err = Connection::open(Credentials::new("id", "secret"), "XBTZAR", StreamOptions::new())
            .unwrap_err();
        assert!(matches!(err, StreambookError::Config(_)));
    }

    #[test]
    fn closed_is_terminal() {
        let shared = Shared {
            state: Mutex::new(ConnectionState::Idle),
            close_signal: Notify::new(),
            book: Arc::new(OrderBook::new()),
        };
        assert!(shared.transition(ConnectionState::Connecting));
        shared.close();
        shared.close();
        assert!(!shared.transition(ConnectionState::Backoff));
        assert_eq!(shared.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn until_closed_returns_none_after_close() {
        let shared = Shared {
            state: Mutex::new(ConnectionState::Streaming),
            close_signal: Notify::new(),
            book: Arc::new(OrderBook::new()),
        };
        assert_eq!(shared.until_closed(async { 7 }).await, Some(7));

        shared.close();
        assert_eq!(shared.until_closed(std::future::pending::<()>()).await, None);
    }

    #[test]
    fn close_wakes_pending_wait() {
        let shared = Shared {
            state: Mutex::new(ConnectionState::Backoff),
            close_signal: Notify::new(),
            book: Arc::new(OrderBook::new()),
        };
        let mut wait = tokio_test::task::spawn(shared.until_closed(std::future::pending::<()>()));
        tokio_test::assert_pending!(wait.poll());

        shared.close();
        assert!(wait.is_woken());
        tokio_test::assert_ready_eq!(wait.poll(), None);
    }

    #[test]
    fn open_rejects_out_of_range_settings() {
        let settings = StreamSettings {
            backoff: BackoffConfig {
                base: Duration::from_millis(u64::MAX),
                ..BackoffConfig::default()
            },
            ..StreamSettings::default()
        };
        let err = Connection::open(
            Credentials::new("id", "secret"),
            "XBTZAR",
            StreamOptions::new().with_settings(settings),
        )
        .unwrap_err();
        assert!(matches!(err, StreambookError::Config(_)));
    }

    #[tokio::test]
    async fn keepalive_failure_ends_read() {
        let mut keepalive =
            tokio::spawn(async { StreambookError::from(tungstenite::Error::AlreadyClosed) });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            read_until_keepalive_fails(std::future::pending(), &mut keepalive),
        )
        .await
        .expect("read was not interrupted");

        assert!(matches!(
            result,
            Err(StreambookError::WebSocket(tungstenite::Error::AlreadyClosed))
        ));
    }

    #[tokio::test]
    async fn read_result_wins_while_keepalive_runs() {
        let mut keepalive = tokio::spawn(std::future::pending::<StreambookError>());

        let result = read_until_keepalive_fails(async { Ok(()) }, &mut keepalive).await;

        assert!(result.is_ok());
        keepalive.abort();
    }

    #[tokio::test]
    async fn close_while_connecting_stops_supervisor() {
        // Nothing listens on port 9 of the loopback; attempts fail fast.
        let conn = Connection::open(
            Credentials::new("id", "secret"),
            "XBTZAR",
            StreamOptions::new().with_websocket_url("ws://127.0.0.1:9"),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(5), conn.shutdown())
            .await
            .expect("supervisor did not stop");
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.snapshot().sequence, 0);
    }
}
