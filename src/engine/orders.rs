//! Locally tracked order lifecycle.
//!
//! Created on outbound submit, advanced only by inbound canonical events.
//! Submitting a cancel and receiving a match are both valid outcomes of the
//! same race; nothing is assumed until a terminal event arrives.

use crate::feed::DoneReason;
use crate::model::{OrderType, Price, Qty, Side, VenueId};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Sent, no ack observed yet.
    PendingAck,
    /// Resting on the venue's book.
    Open,
    /// Cancel requested, terminal event pending.
    Cancelling,
    /// Terminal.
    Done,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Done)
    }
}

/// Why the engine placed the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRole {
    /// The resting (or IOC first-leg) order of the active trade.
    Maker,
    /// The covering aggressive order.
    Taker,
    /// Same-venue flattening order for a fill too small to cover.
    Liquidation,
}

#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: String,
    pub venue: VenueId,
    pub role: OrderRole,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub size: Qty,
    pub filled: Qty,
    pub state: OrderState,
    pub done: Option<DoneReason>,
}

impl TrackedOrder {
    pub fn new(
        order_id: String,
        venue: VenueId,
        role: OrderRole,
        side: Side,
        order_type: OrderType,
        price: Option<Price>,
        size: Qty,
    ) -> Self {
        Self {
            order_id,
            venue,
            role,
            side,
            order_type,
            price,
            size,
            filled: Decimal::ZERO,
            state: OrderState::PendingAck,
            done: None,
        }
    }

    pub fn remaining(&self) -> Qty {
        (self.size - self.filled).max(Decimal::ZERO)
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Venue acked the order onto the book.
    pub fn apply_open(&mut self) -> bool {
        if self.state != OrderState::PendingAck {
            return false;
        }
        self.state = OrderState::Open;
        true
    }

    /// Apply a fill, clamped to the remaining size. Returns the quantity
    /// actually applied. Valid in every live state: a match can land while
    /// a cancel is in flight.
    pub fn apply_match(&mut self, qty: Qty) -> Qty {
        if self.state.is_terminal() {
            return Decimal::ZERO;
        }
        let actual = qty.min(self.remaining());
        if actual <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.filled += actual;
        actual
    }

    /// Mark that a cancel was submitted.
    pub fn request_cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = OrderState::Cancelling;
        true
    }

    /// A cancel attempt failed recoverably; the order is still resting.
    pub fn cancel_failed(&mut self) {
        if self.state == OrderState::Cancelling {
            self.state = OrderState::Open;
        }
    }

    /// Terminal event from the venue.
    pub fn apply_done(&mut self, reason: DoneReason) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = OrderState::Done;
        self.done = Some(reason);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> TrackedOrder {
        TrackedOrder::new(
            "o-1".to_string(),
            VenueId(0),
            OrderRole::Maker,
            Side::Buy,
            OrderType::Limit,
            Some(dec!(10.01)),
            dec!(5),
        )
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut o = order();
        assert_eq!(o.state, OrderState::PendingAck);
        assert!(o.apply_open());
        assert_eq!(o.apply_match(dec!(2.4)), dec!(2.4));
        assert_eq!(o.remaining(), dec!(2.6));
        assert_eq!(o.apply_match(dec!(2.6)), dec!(2.6));
        assert!(o.apply_done(DoneReason::Filled));
        assert!(!o.is_live());
        // Terminal state is sticky.
        assert!(!o.apply_done(DoneReason::Cancelled));
        assert_eq!(o.done, Some(DoneReason::Filled));
    }

    #[test]
    fn overfill_is_clamped() {
        let mut o = order();
        o.apply_open();
        assert_eq!(o.apply_match(dec!(9)), dec!(5));
        assert_eq!(o.remaining(), dec!(0));
        assert_eq!(o.apply_match(dec!(1)), dec!(0));
    }

    #[test]
    fn match_during_cancel_race_still_counts() {
        let mut o = order();
        o.apply_open();
        assert!(o.request_cancel());
        // The venue matched us before the cancel landed.
        assert_eq!(o.apply_match(dec!(1.5)), dec!(1.5));
        assert!(o.apply_done(DoneReason::Cancelled));
        assert_eq!(o.filled, dec!(1.5));
    }

    #[test]
    fn failed_cancel_returns_to_open() {
        let mut o = order();
        o.apply_open();
        o.request_cancel();
        o.cancel_failed();
        assert_eq!(o.state, OrderState::Open);
    }

    #[test]
    fn no_fill_after_terminal() {
        let mut o = order();
        o.apply_open();
        o.apply_done(DoneReason::Cancelled);
        assert_eq!(o.apply_match(dec!(1)), dec!(0));
    }
}
