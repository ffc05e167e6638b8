//! Venue fee schedules.
//!
//! A profitable spread on paper must survive both legs' fees; every spread
//! computed by the evaluator is fee-adjusted with these rates.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-venue fee rates as fractions (0.0015 = 15 bps).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Rate charged on resting (post-only) executions.
    pub maker: Decimal,
    /// Rate charged on aggressive executions.
    pub taker: Decimal,
}

impl FeeSchedule {
    pub fn new(maker: Decimal, taker: Decimal) -> Self {
        Self { maker, taker }
    }

    /// Fee amount on a notional at the maker rate.
    pub fn maker_fee(&self, notional: Decimal) -> Decimal {
        notional * self.maker
    }

    /// Fee amount on a notional at the taker rate.
    pub fn taker_fee(&self, notional: Decimal) -> Decimal {
        notional * self.taker
    }
}
