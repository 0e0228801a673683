//! Order book snapshot models.

use rust_decimal::Decimal;
use serde::Deserialize;

use super::{MarketStatus, deserialize_sequence, null_as_empty};

/// Full order book sent as the first data message of every connection.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub asks: Vec<OrderEntry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub bids: Vec<OrderEntry>,
    #[serde(default)]
    pub status: MarketStatus,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// A single resting order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderEntry {
    pub id: String,
    pub price: Decimal,
    pub volume: Decimal,
}
