//! Incremental order book update (diff) models.

use rust_decimal::Decimal;
use serde::Deserialize;

use super::{MarketStatus, deserialize_sequence, null_as_empty};

/// One state transition of the order book.
///
/// Trades are applied first, in list order, then the create, then the
/// delete, then the status change.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub trade_updates: Vec<TradeUpdate>,
    pub create_update: Option<CreateUpdate>,
    pub delete_update: Option<DeleteUpdate>,
    pub status_update: Option<StatusUpdate>,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// A fill against a resting order.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeUpdate {
    /// Traded volume in the base currency.
    pub base: Decimal,
    /// Traded value in the counter currency.
    #[serde(default)]
    pub counter: Decimal,
    /// The resting order whose volume is reduced.
    #[serde(alias = "order_id")]
    pub maker_order_id: String,
    #[serde(default)]
    pub taker_order_id: String,
}

/// A new resting order.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUpdate {
    pub order_id: String,
    /// Wire side token, `BID` or `ASK`. Validated when applied.
    #[serde(rename = "type")]
    pub tpe: String,
    pub price: Decimal,
    pub volume: Decimal,
}

/// Removal of a resting order.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteUpdate {
    pub order_id: String,
}

/// Change of market trading status.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: MarketStatus,
}
