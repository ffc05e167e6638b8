//! Strategy set: six maker/taker shapes over an ordered venue pair.
//!
//! One evaluator parameterized by role assignment replaces per-shape code.
//! Strategies are pure functions of the current books, balances, and fees:
//! they are re-derived on every book update and hold nothing but venue ids.

pub mod fees;

use crate::book::OrderBook;
use crate::model::{floor_to_tick, Price, ProductInfo, Qty, Side, VenueId};
use crate::strategy::fees::FeeSchedule;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Headroom over the venue minimum notional. A leg sized right at the venue
/// minimum gets rejected after any adverse rounding, so both legs must
/// clear `min_notional * NOTIONAL_HEADROOM`.
pub const NOTIONAL_HEADROOM: Decimal = dec!(1.06);

/// The six shapes. "First"/"second" refer to the ordered venue pair the
/// engine was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyShape {
    /// Post a bid one tick above the first venue's best bid; cover with a
    /// market sell on the second.
    MakerBidFirst,
    MakerBidSecond,
    /// Post an ask one tick below the first venue's best ask; cover with a
    /// market buy on the second.
    MakerAskFirst,
    MakerAskSecond,
    /// Aggressive on both legs: IOC sell into the first venue's bid, market
    /// buy at the second venue's ask.
    TakerSellFirst,
    TakerSellSecond,
}

impl StrategyShape {
    pub const ALL: [StrategyShape; 6] = [
        StrategyShape::MakerBidFirst,
        StrategyShape::MakerBidSecond,
        StrategyShape::MakerAskFirst,
        StrategyShape::MakerAskSecond,
        StrategyShape::TakerSellFirst,
        StrategyShape::TakerSellSecond,
    ];

    /// Stable label for logs and the trade log.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyShape::MakerBidFirst => "maker-bid-a",
            StrategyShape::MakerBidSecond => "maker-bid-b",
            StrategyShape::MakerAskFirst => "maker-ask-a",
            StrategyShape::MakerAskSecond => "maker-ask-b",
            StrategyShape::TakerSellFirst => "taker-sell-a",
            StrategyShape::TakerSellSecond => "taker-sell-b",
        }
    }

    /// Maker/taker shapes rest one leg; both-taker shapes cross both.
    pub fn is_maker_taker(&self) -> bool {
        !matches!(
            self,
            StrategyShape::TakerSellFirst | StrategyShape::TakerSellSecond
        )
    }
}

/// Read-only view over one venue's engine-owned state.
#[derive(Debug, Clone, Copy)]
pub struct VenueSnapshot<'a> {
    pub id: VenueId,
    pub book: &'a OrderBook,
    pub product: &'a ProductInfo,
    pub fees: &'a FeeSchedule,
    /// Base balance net of engine reservations.
    pub base_available: Decimal,
    /// Quote balance net of engine reservations.
    pub quote_available: Decimal,
}

/// One shape scored against the current books.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub shape: StrategyShape,
    pub maker: VenueId,
    pub taker: VenueId,
    /// Side of the first (resting or IOC) leg.
    pub maker_side: Side,
    pub maker_price: Price,
    pub taker_price: Price,
    pub quantity: Qty,
    /// Fee-adjusted per-unit edge.
    pub spread: Decimal,
    /// `spread * quantity`, sign-flipped negative when a leg is under the
    /// notional floor (kept visible for diagnostics, never actionable).
    pub profit: Decimal,
    pub notional_ok: bool,
    /// Fee rate of the first leg as it will execute (maker rate for resting
    /// legs, taker rate for IOC legs).
    pub maker_leg_fee: Decimal,
    /// Fee rate of the covering leg.
    pub taker_leg_fee: Decimal,
}

impl Evaluation {
    /// Actionable: positive after fees with both notionals clear.
    pub fn viable(&self) -> bool {
        self.profit > Decimal::ZERO && self.notional_ok && self.quantity > Decimal::ZERO
    }
}

/// Score all six shapes. Shapes whose books are missing a side are skipped.
pub fn evaluate_all(first: &VenueSnapshot<'_>, second: &VenueSnapshot<'_>) -> Vec<Evaluation> {
    [
        eval_maker(StrategyShape::MakerBidFirst, first, second, Side::Buy),
        eval_maker(StrategyShape::MakerBidSecond, second, first, Side::Buy),
        eval_maker(StrategyShape::MakerAskFirst, first, second, Side::Sell),
        eval_maker(StrategyShape::MakerAskSecond, second, first, Side::Sell),
        eval_taker_taker(StrategyShape::TakerSellFirst, first, second),
        eval_taker_taker(StrategyShape::TakerSellSecond, second, first),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Highest profit wins; maker/taker shapes win ties.
pub fn select_best(evals: &[Evaluation]) -> Option<&Evaluation> {
    evals.iter().max_by(|a, b| {
        a.profit
            .cmp(&b.profit)
            .then_with(|| a.shape.is_maker_taker().cmp(&b.shape.is_maker_taker()))
    })
}

fn eval_maker(
    shape: StrategyShape,
    maker: &VenueSnapshot<'_>,
    taker: &VenueSnapshot<'_>,
    maker_side: Side,
) -> Option<Evaluation> {
    let (m_bid, m_bid_qty) = maker.book.best_bid()?;
    let (m_ask, m_ask_qty) = maker.book.best_ask()?;
    let tick = maker.product.price_tick;

    // Improve the touch by one tick unless that would cross the same book.
    let (maker_price, maker_best_qty) = match maker_side {
        Side::Buy => {
            let price = if m_ask - m_bid > tick { m_bid + tick } else { m_bid };
            (price, m_bid_qty)
        }
        Side::Sell => {
            let price = if m_ask - m_bid > tick { m_ask - tick } else { m_ask };
            (price, m_ask_qty)
        }
    };

    // The cover trades the opposite direction on the taker venue.
    let (taker_price, taker_qty) = match maker_side {
        Side::Buy => taker.book.best_bid()?,
        Side::Sell => taker.book.best_ask()?,
    };
    if maker_price <= Decimal::ZERO || taker_price <= Decimal::ZERO {
        return None;
    }

    let balance_cap = match maker_side {
        // Buy base with maker-venue quote; sell base held on the taker venue.
        Side::Buy => (maker.quote_available / maker_price).min(taker.base_available),
        // Sell base held on the maker venue; buy back with taker-venue quote.
        Side::Sell => maker.base_available.min(taker.quote_available / taker_price),
    };

    let step = maker.product.size_tick.max(taker.product.size_tick);
    let quantity = floor_to_tick(balance_cap.min(taker_qty).min(maker_best_qty), step);

    let one = Decimal::ONE;
    let spread = match maker_side {
        Side::Buy => {
            taker_price * (one - taker.fees.taker) - maker_price * (one + maker.fees.maker)
        }
        Side::Sell => {
            maker_price * (one - maker.fees.maker) - taker_price * (one + taker.fees.taker)
        }
    };

    Some(finish(
        shape,
        maker,
        taker,
        maker_side,
        maker_price,
        taker_price,
        quantity,
        spread,
        maker.fees.maker,
        taker.fees.taker,
    ))
}

fn eval_taker_taker(
    shape: StrategyShape,
    sell_venue: &VenueSnapshot<'_>,
    buy_venue: &VenueSnapshot<'_>,
) -> Option<Evaluation> {
    // IOC sell into the sell venue's bid; market buy at the buy venue's ask.
    let (sell_price, sell_qty) = sell_venue.book.best_bid()?;
    let (buy_price, buy_qty) = buy_venue.book.best_ask()?;
    if sell_price <= Decimal::ZERO || buy_price <= Decimal::ZERO {
        return None;
    }

    let balance_cap = sell_venue
        .base_available
        .min(buy_venue.quote_available / buy_price);
    let step = sell_venue.product.size_tick.max(buy_venue.product.size_tick);
    let quantity = floor_to_tick(balance_cap.min(sell_qty).min(buy_qty), step);

    let one = Decimal::ONE;
    let spread =
        sell_price * (one - sell_venue.fees.taker) - buy_price * (one + buy_venue.fees.taker);

    Some(finish(
        shape,
        sell_venue,
        buy_venue,
        Side::Sell,
        sell_price,
        buy_price,
        quantity,
        spread,
        sell_venue.fees.taker,
        buy_venue.fees.taker,
    ))
}

#[allow(clippy::too_many_arguments)]
fn finish(
    shape: StrategyShape,
    maker: &VenueSnapshot<'_>,
    taker: &VenueSnapshot<'_>,
    maker_side: Side,
    maker_price: Price,
    taker_price: Price,
    quantity: Qty,
    spread: Decimal,
    maker_leg_fee: Decimal,
    taker_leg_fee: Decimal,
) -> Evaluation {
    let mut profit = spread * quantity;
    let notional_ok = maker_price * quantity >= maker.product.min_notional * NOTIONAL_HEADROOM
        && taker_price * quantity >= taker.product.min_notional * NOTIONAL_HEADROOM;
    if !notional_ok {
        // Unattractive but sign-visible for diagnostics.
        profit = -profit.abs();
    }

    Evaluation {
        shape,
        maker: maker.id,
        taker: taker.id,
        maker_side,
        maker_price,
        taker_price,
        quantity,
        spread,
        profit,
        notional_ok,
        maker_leg_fee,
        taker_leg_fee,
    }
}

/// Fee-adjusted spread of a resting maker order at `our_price` against the
/// current taker top of book. Used while waiting for a match to decide
/// whether the position is still worth holding.
pub fn maker_hold_spread(
    maker_side: Side,
    our_price: Price,
    taker_price: Price,
    maker_fee: Decimal,
    taker_fee: Decimal,
) -> Decimal {
    let one = Decimal::ONE;
    match maker_side {
        Side::Buy => taker_price * (one - taker_fee) - our_price * (one + maker_fee),
        Side::Sell => our_price * (one - maker_fee) - taker_price * (one + taker_fee),
    }
}

/// Realized round-trip profit from executed totals (`sum(price * qty)` per
/// leg), net of both legs' fees.
pub fn round_trip_profit(
    maker_side: Side,
    maker_total: Decimal,
    taker_total: Decimal,
    maker_fee: Decimal,
    taker_fee: Decimal,
) -> Decimal {
    let gross = match maker_side {
        // Bought on the maker venue, sold on the taker venue.
        Side::Buy => taker_total - maker_total,
        // Sold on the maker venue, bought back on the taker venue.
        Side::Sell => maker_total - taker_total,
    };
    gross - maker_total * maker_fee - taker_total * taker_fee
}
