//! Streaming order book synchronization client.
//!
//! Connects to a market's order book stream, applies the initial snapshot
//! and every subsequent diff in sequence, and keeps a thread-safe mirror
//! of the book that consumers can read at any time. Connection failures
//! and protocol violations are healed by discarding the book and
//! reconnecting with backoff.
//!
//! ```no_run
//! use streambook::models::Credentials;
//! use streambook::websocket::{Connection, StreamOptions};
//!
//! # async fn run() -> streambook::Result<()> {
//! let conn = Connection::open(
//!     Credentials::new("key-id", "key-secret"),
//!     "XBTZAR",
//!     StreamOptions::new().with_update_callback(|update| {
//!         println!("applied sequence {}", update.sequence);
//!     }),
//! )?;
//! let snapshot = conn.snapshot();
//! println!("{} bids, {} asks", snapshot.bids.len(), snapshot.asks.len());
//! conn.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod book;
pub mod config;
pub mod error;
pub mod models;
pub mod tls;
pub mod websocket;

pub use error::{ProtocolError, Result, StreambookError};
