//! Authoritative in-memory balances per (venue, asset).
//!
//! A pending maker order reserves funds logically; the wallet itself is
//! mutated only when a fill is observed. Available balance is wallet minus
//! outstanding reservations, so the evaluator can never size a strategy
//! into funds a resting order already claims.

use crate::model::VenueId;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient {asset} on {venue}: have {have}, need {need}")]
pub struct InsufficientBalance {
    pub venue: VenueId,
    pub asset: String,
    pub have: Decimal,
    pub need: Decimal,
}

/// Funds logically claimed by one outstanding order.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub venue: VenueId,
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Default)]
pub struct BalanceBook {
    wallets: HashMap<(VenueId, String), Decimal>,
    /// Keyed by order id.
    reservations: HashMap<String, Reservation>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&mut self, venue: VenueId, asset: &str, amount: Decimal) {
        self.wallets.insert((venue, asset.to_string()), amount);
    }

    pub fn balance(&self, venue: VenueId, asset: &str) -> Decimal {
        self.wallets
            .get(&(venue, asset.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn reserved(&self, venue: VenueId, asset: &str) -> Decimal {
        self.reservations
            .values()
            .filter(|r| r.venue == venue && r.asset == asset)
            .map(|r| r.amount)
            .sum()
    }

    /// Wallet balance minus outstanding reservations, floored at zero.
    pub fn available(&self, venue: VenueId, asset: &str) -> Decimal {
        (self.balance(venue, asset) - self.reserved(venue, asset)).max(Decimal::ZERO)
    }

    pub fn credit(&mut self, venue: VenueId, asset: &str, amount: Decimal) {
        let entry = self
            .wallets
            .entry((venue, asset.to_string()))
            .or_insert(Decimal::ZERO);
        *entry += amount;
    }

    /// Debit without ever letting the wallet go negative; failure leaves the
    /// wallet untouched and signals a bookkeeping inconsistency.
    pub fn debit(
        &mut self,
        venue: VenueId,
        asset: &str,
        amount: Decimal,
    ) -> Result<(), InsufficientBalance> {
        let have = self.balance(venue, asset);
        if amount > have {
            return Err(InsufficientBalance {
                venue,
                asset: asset.to_string(),
                have,
                need: amount,
            });
        }
        self.wallets.insert((venue, asset.to_string()), have - amount);
        Ok(())
    }

    /// Reserve funds for an order. Replaces any prior reservation under the
    /// same order id.
    pub fn reserve(&mut self, order_id: &str, venue: VenueId, asset: &str, amount: Decimal) {
        self.reservations.insert(
            order_id.to_string(),
            Reservation {
                venue,
                asset: asset.to_string(),
                amount,
            },
        );
    }

    /// Shrink a reservation as its order fills. No-op for unknown ids.
    pub fn consume_reservation(&mut self, order_id: &str, amount: Decimal) {
        if let Some(res) = self.reservations.get_mut(order_id) {
            res.amount = (res.amount - amount).max(Decimal::ZERO);
        }
    }

    /// Release whatever reservation remains for the order.
    pub fn release(&mut self, order_id: &str) -> Option<Reservation> {
        self.reservations.remove(order_id)
    }
}
