//! Async WebSocket client for the streaming order book feed.
//!
//! This module is organized by concern:
//! - [`handler`] - Feed message decoding and book reconciliation
//! - [`connection`] - Supervised connection lifecycle and public handle
//! - [`backoff`] - Reconnect delay policy
//! - [`notifier`] - Update callback dispatch

pub mod backoff;
pub mod connection;
pub mod handler;
pub mod notifier;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use tungstenite::Message;

use crate::Result;
use crate::models::Credentials;

pub use backoff::{Backoff, BackoffConfig};
pub use connection::{Connection, ConnectionState, StreamOptions};
pub use handler::{FeedMessage, FeedProcessor, Processed, decode};
pub use notifier::{ConnectCallback, Notifier, UpdateCallback};

/// Write half of a stream connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a stream connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Builds the connection target for `pair` under `base_url`.
pub fn stream_url(base_url: &str, pair: &str) -> String {
    format!("{}/api/1/stream/{pair}", base_url.trim_end_matches('/'))
}

/// Establishes a WebSocket connection to the given URL.
///
/// # Errors
///
/// Returns a [`StreambookError`](crate::StreambookError) if the connection or TLS handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// Sends the credentials frame. Must be the first frame after the handshake.
///
/// # Errors
///
/// Returns a [`StreambookError`](crate::StreambookError) if sending the message fails.
pub async fn send_credentials(write: &mut WsWriter, credentials: &Credentials) -> Result<()> {
    let json = serde_json::to_string(&credentials.request())?;
    write.send(Message::Text(json.into())).await?;
    debug!(key_id = credentials.key_id(), "Sent credentials");

    Ok(())
}

/// Sends an empty keep-alive frame.
///
/// # Errors
///
/// Returns a [`StreambookError`](crate::StreambookError) if sending the message fails.
pub async fn send_keepalive(write: &mut WsWriter) -> Result<()> {
    write.send(Message::Text(String::new().into())).await?;
    debug!("Sent keep-alive");

    Ok(())
}
