//! Shared test utilities: a loopback stream server.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::Message;

/// Stream endpoint for live tests.
pub const LIVE_WS_URL: &str = "wss://ws.luno.com";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A server-side connection accepted by [`MockFeed`].
pub struct FeedConn {
    pub path: String,
    ws: WebSocketStream<TcpStream>,
}

impl FeedConn {
    /// Sends a text frame.
    pub async fn send(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("Failed to send frame");
    }

    /// Receives the next text frame, skipping control frames.
    /// Returns `None` once the client has gone away.
    pub async fn recv_text(&mut self) -> Option<String> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    }

    /// Waits until the client closes or drops the connection.
    pub async fn wait_closed(&mut self) {
        tokio::time::timeout(WAIT, async { while self.recv_text().await.is_some() {} })
            .await
            .expect("Client did not close the connection");
    }
}

/// Loopback WebSocket server standing in for the venue.
pub struct MockFeed {
    pub url: String,
    conns: mpsc::UnboundedReceiver<FeedConn>,
}

impl MockFeed {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Listener has no address");
        let (tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let path = Arc::new(Mutex::new(String::new()));
                let seen = path.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *seen.lock().unwrap() = req.uri().path().to_string();
                    Ok(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };
                let path = path.lock().unwrap().clone();
                if tx.send(FeedConn { path, ws }).is_err() {
                    return;
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            conns,
        }
    }

    /// Waits for the next client connection.
    pub async fn accept(&mut self) -> FeedConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("Timed out waiting for a connection")
            .expect("Server task stopped")
    }

    /// Returns a connection if one arrives within `within`.
    pub async fn try_accept(&mut self, within: Duration) -> Option<FeedConn> {
        tokio::time::timeout(within, self.conns.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Polls `check` until it returns `true` or [`WAIT`] elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not met in time");
}
