//! Core market data model.
//!
//! Single source of truth for the money types: every price and quantity in
//! the engine is a `rust_decimal::Decimal`. Binary floats never touch money
//! math; they may appear only in ephemeral display formatting.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Price in quote currency. Exact decimal, venue tick-aligned before submit.
pub type Price = Decimal;

/// Quantity in base currency. Exact decimal, venue lot-aligned before submit.
pub type Qty = Decimal;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Resting limit order (optionally post-only / IOC / FOK via flags).
    Limit,
    /// Cross the book aggressively.
    Market,
}

/// Opaque venue identifier: an index into engine-owned tables.
///
/// Strategies and orders reference venues only through this id; they never
/// hold pointers back into venue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VenueId(pub usize);

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "venue#{}", self.0)
    }
}

/// Normalized trading pair. Each adapter converts to its native spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Parse the normalized `BASE/QUOTE` spelling.
    pub fn parse(s: &str) -> Option<Self> {
        let (base, quote) = s.split_once('/')?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some(Self::new(base, quote))
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Per (venue, pair) trading constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    /// Smallest price increment (quote currency).
    pub price_tick: Decimal,
    /// Smallest quantity increment (base currency).
    pub size_tick: Decimal,
    /// Smallest accepted `price * quantity`.
    pub min_notional: Decimal,
}

impl ProductInfo {
    /// True when `price` and `qty` are tick-aligned for this product.
    pub fn accepts(&self, price: Price, qty: Qty) -> bool {
        (price % self.price_tick).is_zero() && (qty % self.size_tick).is_zero()
    }
}

/// A single aggregate price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    /// Zero marks a tombstone (level removed).
    pub qty: Qty,
}

impl BookLevel {
    #[inline]
    pub fn new(price: Price, qty: Qty) -> Self {
        Self { price, qty }
    }
}

/// Round to the nearest tick multiple, half away from zero.
pub fn round_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    debug_assert!(tick > Decimal::ZERO);
    (value / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick
}

/// Round down to a tick multiple. Used for quantities and safety clamps.
pub fn floor_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    debug_assert!(tick > Decimal::ZERO);
    (value / tick).floor() * tick
}
