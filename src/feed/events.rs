//! Canonical event model.
//!
//! Venue adapters translate their native websocket vocabulary into these
//! variants; nothing venue-specific leaks past this boundary. One event per
//! effect: adapters split frames that bundle an open and a match.

use crate::model::{BookLevel, OrderType, Price, Qty, Side, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an order reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoneReason {
    /// Fully executed.
    Filled,
    /// Cancelled on request with remaining quantity released.
    Cancelled,
    /// Killed by the venue (IOC/FOK remainder, self-trade prevention).
    Killed,
    /// Rejected before resting (post-only crossing, bad parameters).
    Rejected,
}

/// A single event on a venue's canonical stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    /// Full book state; replaces everything known about the venue's book.
    /// `sequence` is the snapshot's high-water mark where supplied.
    OrderBookSnapshot {
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        sequence: Option<u64>,
    },

    /// Batch of L2 level changes. `qty == 0` deletes the level.
    OrderBookUpdate {
        changes: Vec<(Side, Price, Qty)>,
        sequence: Option<u64>,
    },

    /// The venue accepted our order for processing.
    OrderReceived {
        order_id: String,
        side: Side,
        order_type: OrderType,
        price: Option<Price>,
        qty: Qty,
        ts: DateTime<Utc>,
    },

    /// Our order is resting on the book.
    OrderOpen {
        order_id: String,
        side: Side,
        price: Price,
        qty: Qty,
        ts: DateTime<Utc>,
    },

    /// Our order (partially) executed at `price` for `qty`.
    OrderMatch {
        order_id: String,
        side: Side,
        price: Price,
        qty: Qty,
        ts: DateTime<Utc>,
    },

    /// Terminal state for our order.
    OrderDone {
        order_id: String,
        reason: DoneReason,
        remaining_qty: Qty,
        ts: DateTime<Utc>,
    },

    /// Venue liveness ping.
    Heartbeat,

    /// Subscription acknowledgment with the active channel names.
    Subscriptions { channels: Vec<String> },

    /// Terminal marker: the adapter's transport failed. The venue's book is
    /// invalid until a fresh snapshot arrives.
    Disconnected { reason: String },
}

impl CanonicalEvent {
    /// The order id, for order-lifecycle events.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            CanonicalEvent::OrderReceived { order_id, .. }
            | CanonicalEvent::OrderOpen { order_id, .. }
            | CanonicalEvent::OrderMatch { order_id, .. }
            | CanonicalEvent::OrderDone { order_id, .. } => Some(order_id),
            _ => None,
        }
    }

    pub fn is_book_event(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::OrderBookSnapshot { .. } | CanonicalEvent::OrderBookUpdate { .. }
        )
    }
}

/// A canonical event tagged with the engine-assigned venue id by the
/// multiplexer. Adapters themselves never know their id.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueEvent {
    pub venue: VenueId,
    pub event: CanonicalEvent,
}
