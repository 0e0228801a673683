//! Crate-level error types.
//!
//! [`StreambookError`] unifies every error source (configuration,
//! WebSocket, JSON, feed protocol) behind a single enum so callers can
//! match on the variant they care about while still using the `?`
//! operator for easy propagation.
//!
//! [`ProtocolError`] covers the feed sequencing and validation failures.
//! Every one of them means the local book can no longer be trusted; the
//! connection supervisor answers them by discarding the book and
//! reconnecting.

use rust_decimal::Decimal;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreambookError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum StreambookError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The key id or key secret passed to `open` was empty.
    #[error("missing credentials: key id and key secret are both required")]
    MissingCredentials,

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An inbound frame was neither a snapshot, a diff, nor a keep-alive.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The feed violated the sequencing or validation rules.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Feed protocol violations detected while applying messages to the book.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A diff skipped one or more sequence numbers.
    #[error("out of sequence: expected {expected}, received {received}")]
    OutOfSequence { expected: u64, received: u64 },

    /// A create update carried a side other than `BID` or `ASK`.
    #[error("unknown order type {0:?}")]
    UnknownOrderType(String),

    /// A trade update carried a non-positive base volume.
    #[error("invalid trade for order {order_id}: volume {volume} is not positive")]
    InvalidTrade { order_id: String, volume: Decimal },

    /// A trade would leave the order with negative remaining volume.
    #[error("negative volume for order {order_id}: remaining {volume}, traded {traded}")]
    NegativeVolume {
        order_id: String,
        volume: Decimal,
        traded: Decimal,
    },

    /// A trade referenced an order present on neither side of the book.
    #[error("unknown order {0}")]
    UnknownOrder(String),
}
