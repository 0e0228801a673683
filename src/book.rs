//! In-memory order book store.
//!
//! [`OrderBook`] holds the bid and ask orders of one market behind a
//! single mutex, together with the sequence number of the last applied
//! feed message. Sequence `0` means the book has not been initialised
//! from a snapshot on the current connection.
//!
//! Orders are kept individually, keyed by id. [`OrderBook::snapshot`]
//! returns them sorted by price without aggregating equal prices, so
//! two orders at the same price stay two entries.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;

use crate::error::ProtocolError;
use crate::models::book::OrderEntry;
use crate::models::{MarketStatus, OrderSide};

/// A resting order on one side of the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub price: Decimal,
    pub volume: Decimal,
}

impl From<OrderEntry> for Order {
    fn from(entry: OrderEntry) -> Self {
        Self {
            id: entry.id,
            price: entry.price,
            volume: entry.volume,
        }
    }
}

/// Point-in-time copy of the book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub sequence: u64,
    /// Highest price first.
    pub bids: Vec<Order>,
    /// Lowest price first.
    pub asks: Vec<Order>,
    pub status: MarketStatus,
}

impl Snapshot {
    /// Highest bid, if any.
    pub fn best_bid(&self) -> Option<&Order> {
        self.bids.first()
    }

    /// Lowest ask, if any.
    pub fn best_ask(&self) -> Option<&Order> {
        self.asks.first()
    }
}

/// Mutable book state. Only reachable through [`OrderBook`]'s lock.
#[derive(Debug, Default)]
pub struct BookState {
    sequence: u64,
    bids: HashMap<String, Order>,
    asks: HashMap<String, Order>,
    status: MarketStatus,
}

impl BookState {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn status(&self) -> MarketStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: MarketStatus) {
        self.status = status;
    }

    /// Clears both sides, the status, and the sequence number.
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.bids.clear();
        self.asks.clear();
        self.status = MarketStatus::Unknown;
    }

    /// Replaces the whole book.
    ///
    /// An id listed on both sides ends up on the ask side only.
    pub fn apply_snapshot(
        &mut self,
        sequence: u64,
        bids: impl IntoIterator<Item = Order>,
        asks: impl IntoIterator<Item = Order>,
        status: MarketStatus,
    ) {
        self.bids = bids.into_iter().map(|o| (o.id.clone(), o)).collect();
        self.asks = asks.into_iter().map(|o| (o.id.clone(), o)).collect();
        self.bids.retain(|id, _| !self.asks.contains_key(id));
        self.sequence = sequence;
        self.status = status;
    }

    /// Inserts or overwrites an order on `side`.
    ///
    /// Any order with the same id on the opposite side is removed.
    pub fn upsert(&mut self, side: OrderSide, order: Order) {
        let (this, other) = match side {
            OrderSide::Bid => (&mut self.bids, &mut self.asks),
            OrderSide::Ask => (&mut self.asks, &mut self.bids),
        };
        other.remove(&order.id);
        this.insert(order.id.clone(), order);
    }

    /// Removes an order from whichever side holds it. Returns the removed order.
    pub fn remove(&mut self, id: &str) -> Option<Order> {
        self.bids.remove(id).or_else(|| self.asks.remove(id))
    }

    /// Reduces the volume of order `id` by `amount`, removing it at zero.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownOrder`] if neither side holds `id`, and
    /// [`ProtocolError::NegativeVolume`] if `amount` exceeds the remaining
    /// volume. The order is left untouched on error.
    pub fn decrement_volume(&mut self, id: &str, amount: Decimal) -> Result<(), ProtocolError> {
        let side = if self.bids.contains_key(id) {
            &mut self.bids
        } else if self.asks.contains_key(id) {
            &mut self.asks
        } else {
            return Err(ProtocolError::UnknownOrder(id.to_string()));
        };

        let Some(order) = side.get_mut(id) else {
            return Err(ProtocolError::UnknownOrder(id.to_string()));
        };

        let remaining = order.volume - amount;
        if remaining < Decimal::ZERO {
            return Err(ProtocolError::NegativeVolume {
                order_id: id.to_string(),
                volume: order.volume,
                traded: amount,
            });
        }

        if remaining.is_zero() {
            side.remove(id);
        } else {
            order.volume = remaining;
        }
        Ok(())
    }

    /// Looks an order up on either side.
    pub fn get(&self, id: &str) -> Option<(OrderSide, &Order)> {
        self.bids
            .get(id)
            .map(|o| (OrderSide::Bid, o))
            .or_else(|| self.asks.get(id).map(|o| (OrderSide::Ask, o)))
    }

    /// Copies the book out, asks ascending and bids descending by price.
    ///
    /// Orders at the same price are ordered by id so repeated snapshots of
    /// an unchanged book compare equal.
    pub fn snapshot(&self) -> Snapshot {
        let mut bids: Vec<Order> = self.bids.values().cloned().collect();
        let mut asks: Vec<Order> = self.asks.values().cloned().collect();
        bids.sort_by(|a, b| b.price.cmp(&a.price).then_with(|| a.id.cmp(&b.id)));
        asks.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.id.cmp(&b.id)));

        Snapshot {
            sequence: self.sequence,
            bids,
            asks,
            status: self.status,
        }
    }
}

/// Thread-safe order book shared between the feed processor and readers.
#[derive(Debug, Default)]
pub struct OrderBook {
    state: Mutex<BookState>,
}

impl OrderBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the state.
    ///
    /// Keep `f` short: never block on I/O or user callbacks inside it.
    pub fn write<R>(&self, f: impl FnOnce(&mut BookState) -> R) -> R {
        f(&mut *self.lock())
    }

    /// Clears the book and sets the sequence number to 0.
    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Replaces the book wholesale and sets the sequence number.
    pub fn apply_snapshot(
        &self,
        sequence: u64,
        bids: impl IntoIterator<Item = Order>,
        asks: impl IntoIterator<Item = Order>,
        status: MarketStatus,
    ) {
        self.lock().apply_snapshot(sequence, bids, asks, status);
    }

    pub fn upsert(&self, side: OrderSide, order: Order) {
        self.lock().upsert(side, order);
    }

    pub fn remove(&self, id: &str) -> Option<Order> {
        self.lock().remove(id)
    }

    /// See [`BookState::decrement_volume`].
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the order is unknown or the trade
    /// would leave it with negative volume.
    pub fn decrement_volume(&self, id: &str, amount: Decimal) -> Result<(), ProtocolError> {
        self.lock().decrement_volume(id, amount)
    }

    /// Last applied sequence number; `0` while uninitialised.
    pub fn sequence(&self) -> u64 {
        self.lock().sequence()
    }

    pub fn status(&self) -> MarketStatus {
        self.lock().status()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, BookState> {
        // The state is plain data; a panic mid-mutation is caught by the
        // sequence checks and the next reset.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
