//! Feed message decoding and order book reconciliation.
//!
//! [`FeedProcessor`] classifies each inbound frame as a keep-alive, a
//! snapshot, or a diff, enforces sequence ordering, and applies the
//! result to the shared [`OrderBook`]. The book's sequence number is the
//! processor's only state: `0` means waiting for a snapshot, anything
//! else means synced.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::Result;
use crate::book::{BookState, Order, OrderBook};
use crate::error::{ProtocolError, StreambookError};
use crate::models::OrderSide;
use crate::models::book::OrderBookSnapshot;
use crate::models::update::Update;

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    KeepAlive,
    Snapshot(OrderBookSnapshot),
    Update(Update),
}

/// What processing a frame did to the book.
#[derive(Debug, Clone)]
pub enum Processed {
    KeepAlive,
    /// A snapshot replaced the book.
    Snapshot { sequence: u64 },
    /// A diff was applied and the sequence advanced.
    Applied(Update),
    /// A diff was dropped: stale, duplicate, or received before any snapshot.
    Ignored { sequence: u64 },
}

/// Decodes a raw text frame.
///
/// # Errors
///
/// Returns [`StreambookError::MalformedMessage`] if the frame is not
/// JSON or is neither a snapshot nor a diff.
pub fn decode(text: &str) -> Result<FeedMessage> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(FeedMessage::KeepAlive);
    }

    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| StreambookError::MalformedMessage(e.to_string()))?;

    if value.as_str() == Some("") {
        return Ok(FeedMessage::KeepAlive);
    }

    let parse_err = |e: serde_json::Error| StreambookError::MalformedMessage(e.to_string());

    if value.get("bids").is_some() || value.get("asks").is_some() {
        return serde_json::from_value(value)
            .map(FeedMessage::Snapshot)
            .map_err(parse_err);
    }

    if value.get("sequence").is_some() {
        return serde_json::from_value(value)
            .map(FeedMessage::Update)
            .map_err(parse_err);
    }

    Err(StreambookError::MalformedMessage(format!(
        "unrecognised message: {}",
        truncate(text, 120)
    )))
}

/// Applies feed messages to an order book.
#[derive(Debug, Clone)]
pub struct FeedProcessor {
    book: Arc<OrderBook>,
}

impl FeedProcessor {
    #[must_use]
    pub fn new(book: Arc<OrderBook>) -> Self {
        Self { book }
    }

    pub fn book(&self) -> &Arc<OrderBook> {
        &self.book
    }

    /// Decodes and applies one raw frame.
    ///
    /// # Errors
    ///
    /// Malformed frames and every [`ProtocolError`] are returned; the caller
    /// is expected to drop the connection and resynchronise.
    pub fn process_text(&self, text: &str) -> Result<Processed> {
        let message = decode(text)?;
        Ok(self.process(message)?)
    }

    /// Applies one decoded message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::OutOfSequence`] on a sequence gap, or the
    /// validation error of the first failing step of a diff.
    pub fn process(&self, message: FeedMessage) -> std::result::Result<Processed, ProtocolError> {
        match message {
            FeedMessage::KeepAlive => Ok(Processed::KeepAlive),
            FeedMessage::Snapshot(snapshot) => {
                let sequence = snapshot.sequence;
                info!(
                    sequence,
                    bids = snapshot.bids.len(),
                    asks = snapshot.asks.len(),
                    status = ?snapshot.status,
                    "Applying order book snapshot"
                );
                self.book.apply_snapshot(
                    sequence,
                    snapshot.bids.into_iter().map(Order::from),
                    snapshot.asks.into_iter().map(Order::from),
                    snapshot.status,
                );
                Ok(Processed::Snapshot { sequence })
            }
            FeedMessage::Update(update) => {
                match self.book.write(|state| apply_update(state, &update))? {
                    DiffOutcome::Applied => Ok(Processed::Applied(update)),
                    DiffOutcome::BeforeSnapshot => {
                        debug!(sequence = update.sequence, "Dropping update received before snapshot");
                        Ok(Processed::Ignored {
                            sequence: update.sequence,
                        })
                    }
                    DiffOutcome::Stale { current } => {
                        debug!(sequence = update.sequence, current, "Dropping stale update");
                        Ok(Processed::Ignored {
                            sequence: update.sequence,
                        })
                    }
                }
            }
        }
    }
}

/// Result of checking a diff against the book's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffOutcome {
    Applied,
    BeforeSnapshot,
    Stale { current: u64 },
}

/// Applies `update` under the book lock. Logging is left to the caller.
///
/// On a validation error the diff may be partially applied; the sequence
/// number is never advanced in that case.
fn apply_update(
    state: &mut BookState,
    update: &Update,
) -> std::result::Result<DiffOutcome, ProtocolError> {
    let current = state.sequence();

    if current == 0 {
        return Ok(DiffOutcome::BeforeSnapshot);
    }
    if update.sequence <= current {
        return Ok(DiffOutcome::Stale { current });
    }
    if update.sequence != current + 1 {
        return Err(ProtocolError::OutOfSequence {
            expected: current + 1,
            received: update.sequence,
        });
    }

    for trade in &update.trade_updates {
        if trade.base <= Decimal::ZERO {
            return Err(ProtocolError::InvalidTrade {
                order_id: trade.maker_order_id.clone(),
                volume: trade.base,
            });
        }
        state.decrement_volume(&trade.maker_order_id, trade.base)?;
    }

    if let Some(create) = &update.create_update {
        let side = OrderSide::from_token(&create.tpe)
            .ok_or_else(|| ProtocolError::UnknownOrderType(create.tpe.clone()))?;
        state.upsert(
            side,
            Order {
                id: create.order_id.clone(),
                price: create.price,
                volume: create.volume,
            },
        );
    }

    if let Some(delete) = &update.delete_update {
        state.remove(&delete.order_id);
    }

    if let Some(status) = &update.status_update {
        state.set_status(status.status);
    }

    state.set_sequence(update.sequence);
    Ok(DiffOutcome::Applied)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::MarketStatus;

    fn synced_processor() -> FeedProcessor {
        let processor = FeedProcessor::new(Arc::new(OrderBook::new()));
        processor
            .process_text(
                r#"{"sequence":"1","bids":[{"id":"1","price":"120","volume":"0.1"}],
                    "asks":[{"id":"2","price":"150","volume":"0.5"}],"status":"ACTIVE"}"#,
            )
            .unwrap();
        processor
    }

    #[test]
    fn decode_keepalive_forms() {
        assert!(matches!(decode("").unwrap(), FeedMessage::KeepAlive));
        assert!(matches!(decode("  \n").unwrap(), FeedMessage::KeepAlive));
        assert!(matches!(decode("\"\"").unwrap(), FeedMessage::KeepAlive));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode("not json"),
            Err(StreambookError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(r#"{"hello":"world"}"#),
            Err(StreambookError::MalformedMessage(_))
        ));
    }

    #[test]
    fn decode_accepts_numeric_sequence() {
        match decode(r#"{"sequence":42}"#).unwrap() {
            FeedMessage::Update(update) => assert_eq!(update.sequence, 42),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn update_before_snapshot_is_ignored() {
        let processor = FeedProcessor::new(Arc::new(OrderBook::new()));
        let result = processor
            .process_text(r#"{"sequence":"5","delete_update":{"order_id":"1"}}"#)
            .unwrap();
        assert!(matches!(result, Processed::Ignored { sequence: 5 }));
        assert_eq!(processor.book().sequence(), 0);
    }

    #[test]
    fn keepalive_changes_nothing() {
        let processor = synced_processor();
        let before = processor.book().snapshot();
        processor.process_text("\"\"").unwrap();
        assert_eq!(processor.book().snapshot(), before);
    }

    #[test]
    fn status_update_is_applied() {
        let processor = synced_processor();
        processor
            .process_text(r#"{"sequence":"2","status_update":{"status":"POSTONLY"}}"#)
            .unwrap();
        assert_eq!(processor.book().status(), MarketStatus::PostOnly);
    }

    #[test]
    fn invalid_trade_aborts_without_advancing() {
        let processor = synced_processor();
        let err = processor
            .process_text(
                r#"{"sequence":"2","trade_updates":[{"base":"0","maker_order_id":"1"}]}"#,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StreambookError::Protocol(ProtocolError::InvalidTrade { .. })
        ));
        assert_eq!(processor.book().sequence(), 1);
        assert_eq!(processor.book().snapshot().bids[0].volume, dec!(0.1));
    }

    #[test]
    fn unknown_order_type_aborts() {
        let processor = synced_processor();
        let err = processor
            .process_text(
                r#"{"sequence":"2","create_update":{"order_id":"9","type":"SELL","price":"1","volume":"1"}}"#,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StreambookError::Protocol(ProtocolError::UnknownOrderType(ref t)) if t == "SELL"
        ));
        assert_eq!(processor.book().sequence(), 1);
    }

    #[test]
    fn apply_update_reports_skip_reason() {
        let update = |json: &str| -> Update { serde_json::from_str(json).unwrap() };

        let fresh = OrderBook::new();
        assert_eq!(
            fresh.write(|state| apply_update(state, &update(r#"{"sequence":"3"}"#))),
            Ok(DiffOutcome::BeforeSnapshot)
        );

        let processor = synced_processor();
        let book = processor.book();
        assert_eq!(
            book.write(|state| apply_update(state, &update(r#"{"sequence":"1"}"#))),
            Ok(DiffOutcome::Stale { current: 1 })
        );
        assert_eq!(
            book.write(|state| apply_update(state, &update(r#"{"sequence":"2"}"#))),
            Ok(DiffOutcome::Applied)
        );
        assert_eq!(book.sequence(), 2);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
