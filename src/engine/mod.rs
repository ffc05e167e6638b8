//! Engine: the top-level trading state machine.
//!
//! Consumes the merged canonical event stream, re-scores the strategy set on
//! every book update, places and cancels maker orders, covers fills on the
//! taker venue, reconciles balances, and appends completed round-trips to
//! the trade log. Single task; outbound REST calls are awaited inline so
//! submissions serialize with book state.

pub mod balance;
pub mod orders;
pub mod trade_log;

use crate::book::OrderBook;
use crate::feed::mux::DEFAULT_QUEUE_CAPACITY;
use crate::feed::{CanonicalEvent, DoneReason, EventMux, VenueEvent};
use crate::model::{round_to_tick, OrderType, Pair, Price, ProductInfo, Qty, Side, VenueId};
use crate::strategy::fees::FeeSchedule;
use crate::strategy::{
    evaluate_all, maker_hold_spread, round_trip_profit, select_best, Evaluation, StrategyShape,
    VenueSnapshot, NOTIONAL_HEADROOM,
};
use crate::venue::{OrderFlags, VenueAdapter, VenueError};
use anyhow::{anyhow, Context, Result};
use balance::BalanceBook;
use chrono::Utc;
use orders::{OrderRole, OrderState, TrackedOrder};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use trade_log::{TradeLog, TradeRecord};
use tracing::{debug, error, info, warn};

/// In-flight REST on shutdown gets this long to finish.
const SHUTDOWN_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pair: Pair,
    /// Liquidate-on-maker limit offset from the touch (0.05 = 5%).
    pub liquidation_offset: Decimal,
    pub queue_capacity: usize,
}

impl EngineConfig {
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            liquidation_offset: dec!(0.05),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Everything the engine needs to own one venue.
pub struct VenueSetup {
    pub name: String,
    pub adapter: Box<dyn VenueAdapter>,
    pub product: ProductInfo,
    pub fees: FeeSchedule,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
}

struct VenueState {
    name: String,
    book: OrderBook,
    book_valid: bool,
    /// Set on a protocol error; strategies referencing the venue stay dead
    /// until operator restart.
    disabled: bool,
    product: ProductInfo,
    fees: FeeSchedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Scoring strategies, nothing resting.
    WaitForArb,
    /// A maker order rests; watching for fills and decay.
    WaitForMatch,
    /// Draining terminal events for every outstanding order.
    CancelMake,
    /// Explicit shutdown.
    Done,
}

/// The trade currently being worked.
#[derive(Debug, Clone)]
pub struct ActiveTrade {
    pub shape: StrategyShape,
    pub maker: VenueId,
    pub taker: VenueId,
    pub maker_side: Side,
    pub maker_order_id: String,
    pub quantity: Qty,
    pub maker_price: Price,
    pub taker_price: Price,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    /// Sum of `price * qty` over maker-leg fills.
    pub maker_total: Decimal,
    /// Sum of `price * qty` over taker-leg fills.
    pub taker_total: Decimal,
    /// Residue left as open exposure after best-effort liquidation.
    pub unhedged: Qty,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub events: u64,
    pub evaluations: u64,
    pub orders_placed: u64,
    pub cancels: u64,
    pub round_trips: u64,
}

pub struct Engine {
    cfg: EngineConfig,
    venues: Vec<VenueState>,
    adapters: Vec<Box<dyn VenueAdapter>>,
    mux: EventMux,
    balances: BalanceBook,
    orders: HashMap<String, TrackedOrder>,
    phase: EnginePhase,
    trade: Option<ActiveTrade>,
    trade_log: TradeLog,
    stats: EngineStats,
}

impl Engine {
    pub fn new(cfg: EngineConfig, venues: Vec<VenueSetup>, trade_log: TradeLog) -> Self {
        let mut mux = EventMux::new(cfg.queue_capacity);
        let mut states = Vec::with_capacity(venues.len());
        let mut adapters = Vec::with_capacity(venues.len());
        let mut balances = BalanceBook::new();

        for (i, mut setup) in venues.into_iter().enumerate() {
            let id = VenueId(i);
            mux.attach(id, setup.adapter.events());
            balances.set_balance(id, &cfg.pair.base, setup.base_balance);
            balances.set_balance(id, &cfg.pair.quote, setup.quote_balance);
            states.push(VenueState {
                name: setup.name,
                book: OrderBook::new(),
                book_valid: false,
                disabled: false,
                product: setup.product,
                fees: setup.fees,
            });
            adapters.push(setup.adapter);
        }

        Self {
            cfg,
            venues: states,
            adapters,
            mux,
            balances,
            orders: HashMap::new(),
            phase: EnginePhase::WaitForArb,
            trade: None,
            trade_log,
            stats: EngineStats::default(),
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn balances(&self) -> &BalanceBook {
        &self.balances
    }

    pub fn trade(&self) -> Option<&ActiveTrade> {
        self.trade.as_ref()
    }

    pub fn live_orders(&self) -> usize {
        self.orders.values().filter(|o| o.is_live()).count()
    }

    /// Drive the engine until the shutdown future resolves or every feed
    /// ends.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<EngineStats>
    where
        F: Future<Output = ()>,
    {
        info!(pair = %self.cfg.pair, venues = self.venues.len(), "engine started");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    self.shutdown().await;
                    return Ok(self.stats);
                }
                event = self.mux.recv() => match event {
                    Some(event) => self.process(event).await?,
                    None => {
                        warn!("all venue feeds ended");
                        self.shutdown().await;
                        return Ok(self.stats);
                    }
                }
            }
        }
    }

    /// Apply a single canonical event. The run loop funnels everything
    /// through here; tests drive it directly.
    pub async fn process(&mut self, event: VenueEvent) -> Result<()> {
        self.stats.events += 1;
        let venue = event.venue;
        match event.event {
            CanonicalEvent::OrderBookSnapshot { bids, asks, sequence } => {
                let state = &mut self.venues[venue.0];
                state.book.reset_from_snapshot(&bids, &asks, sequence);
                state.book_valid = true;
                info!(
                    venue = %state.name,
                    bid_levels = bids.len(),
                    ask_levels = asks.len(),
                    "book rebuilt from snapshot"
                );
                self.tick().await?;
            }
            CanonicalEvent::OrderBookUpdate { changes, sequence } => {
                let applied = {
                    let state = &mut self.venues[venue.0];
                    if !state.book_valid {
                        // Waiting for a fresh snapshot; drop stale deltas.
                        return Ok(());
                    }
                    state.book.apply_update(&changes, sequence)
                };
                match applied {
                    Ok(()) => {
                        if self.venues[venue.0].book.is_crossed() {
                            warn!(venue = %self.venues[venue.0].name, "crossed book after update");
                            self.invalidate_book(venue, "crossed book").await;
                        } else {
                            self.tick().await?;
                        }
                    }
                    Err(gap) => {
                        warn!(
                            venue = %self.venues[venue.0].name,
                            expected = gap.expected,
                            got = gap.got,
                            "sequence gap; rebuilding book"
                        );
                        self.invalidate_book(venue, "sequence gap").await;
                    }
                }
            }
            CanonicalEvent::OrderReceived { order_id, .. } => {
                debug!(venue = %self.venues[venue.0].name, order_id = %order_id, "order received");
            }
            CanonicalEvent::OrderOpen { order_id, .. } => {
                if let Some(order) = self.orders.get_mut(&order_id) {
                    order.apply_open();
                }
            }
            CanonicalEvent::OrderMatch { order_id, price, qty, .. } => {
                self.on_match(order_id, price, qty).await?;
            }
            CanonicalEvent::OrderDone { order_id, reason, .. } => {
                self.on_done(order_id, reason)?;
            }
            CanonicalEvent::Heartbeat => {}
            CanonicalEvent::Subscriptions { channels } => {
                debug!(venue = %self.venues[venue.0].name, ?channels, "subscriptions active");
            }
            CanonicalEvent::Disconnected { reason } => {
                warn!(
                    venue = %self.venues[venue.0].name,
                    reason = %reason,
                    "venue feed down; book invalidated"
                );
                self.venues[venue.0].book_valid = false;
            }
        }
        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        match self.phase {
            EnginePhase::WaitForArb => self.seek_arb().await,
            EnginePhase::WaitForMatch => self.review_maker_order().await,
            EnginePhase::CancelMake | EnginePhase::Done => Ok(()),
        }
    }

    fn venue_snapshot(&self, id: VenueId) -> VenueSnapshot<'_> {
        let state = &self.venues[id.0];
        VenueSnapshot {
            id,
            book: &state.book,
            product: &state.product,
            fees: &state.fees,
            base_available: self.balances.available(id, &self.cfg.pair.base),
            quote_available: self.balances.available(id, &self.cfg.pair.quote),
        }
    }

    async fn seek_arb(&mut self) -> Result<()> {
        let ready = self
            .venues
            .iter()
            .all(|v| v.book_valid && !v.disabled);
        if !ready || self.venues.len() < 2 {
            return Ok(());
        }

        let best = {
            let first = self.venue_snapshot(VenueId(0));
            let second = self.venue_snapshot(VenueId(1));
            let evals = evaluate_all(&first, &second);
            for eval in &evals {
                debug!(
                    shape = eval.shape.label(),
                    profit = %eval.profit,
                    qty = %eval.quantity,
                    "evaluated"
                );
            }
            select_best(&evals).cloned()
        };
        self.stats.evaluations += 1;

        let Some(best) = best else { return Ok(()) };
        if !best.viable() {
            return Ok(());
        }
        if best.shape.is_maker_taker() {
            self.place_maker(best).await
        } else {
            self.execute_taker_taker(best).await
        }
    }

    async fn place_maker(&mut self, eval: Evaluation) -> Result<()> {
        let pair = self.cfg.pair.clone();
        let result = match eval.maker_side {
            Side::Buy => {
                self.adapters[eval.maker.0]
                    .limit_buy(&pair, eval.maker_price, eval.quantity, OrderFlags::post_only())
                    .await
            }
            Side::Sell => {
                self.adapters[eval.maker.0]
                    .limit_sell(&pair, eval.maker_price, eval.quantity, OrderFlags::post_only())
                    .await
            }
        };

        match result {
            Ok(placed) => {
                self.stats.orders_placed += 1;
                info!(
                    shape = eval.shape.label(),
                    maker = %self.venues[eval.maker.0].name,
                    taker = %self.venues[eval.taker.0].name,
                    side = %eval.maker_side,
                    price = %eval.maker_price,
                    qty = %eval.quantity,
                    profit = %eval.profit,
                    order_id = %placed.order_id,
                    "maker order placed"
                );
                match eval.maker_side {
                    Side::Buy => self.balances.reserve(
                        &placed.order_id,
                        eval.maker,
                        &pair.quote,
                        eval.maker_price * eval.quantity,
                    ),
                    Side::Sell => self.balances.reserve(
                        &placed.order_id,
                        eval.maker,
                        &pair.base,
                        eval.quantity,
                    ),
                }
                self.orders.insert(
                    placed.order_id.clone(),
                    TrackedOrder::new(
                        placed.order_id.clone(),
                        eval.maker,
                        OrderRole::Maker,
                        eval.maker_side,
                        OrderType::Limit,
                        Some(eval.maker_price),
                        eval.quantity,
                    ),
                );
                self.trade = Some(ActiveTrade {
                    shape: eval.shape,
                    maker: eval.maker,
                    taker: eval.taker,
                    maker_side: eval.maker_side,
                    maker_order_id: placed.order_id,
                    quantity: eval.quantity,
                    maker_price: eval.maker_price,
                    taker_price: eval.taker_price,
                    maker_fee: eval.maker_leg_fee,
                    taker_fee: eval.taker_leg_fee,
                    maker_total: Decimal::ZERO,
                    taker_total: Decimal::ZERO,
                    unhedged: Decimal::ZERO,
                });
                self.phase = EnginePhase::WaitForMatch;
                Ok(())
            }
            Err(VenueError::PostOnlyRejected) => {
                debug!(shape = eval.shape.label(), "post-only rejected; next tick");
                Ok(())
            }
            Err(e) => self.handle_submit_error(eval.maker, e),
        }
    }

    async fn execute_taker_taker(&mut self, eval: Evaluation) -> Result<()> {
        let pair = self.cfg.pair.clone();

        // First leg: IOC sell into the sell venue's bid.
        let sell = self.adapters[eval.maker.0]
            .limit_sell(
                &pair,
                eval.maker_price,
                eval.quantity,
                OrderFlags::immediate_or_cancel(),
            )
            .await;
        let sell = match sell {
            Ok(placed) => placed,
            Err(e) => return self.handle_submit_error(eval.maker, e),
        };
        self.stats.orders_placed += 1;
        self.orders.insert(
            sell.order_id.clone(),
            TrackedOrder::new(
                sell.order_id.clone(),
                eval.maker,
                OrderRole::Maker,
                Side::Sell,
                OrderType::Limit,
                Some(eval.maker_price),
                eval.quantity,
            ),
        );

        info!(
            shape = eval.shape.label(),
            sell_venue = %self.venues[eval.maker.0].name,
            buy_venue = %self.venues[eval.taker.0].name,
            sell_price = %eval.maker_price,
            buy_price = %eval.taker_price,
            qty = %eval.quantity,
            profit = %eval.profit,
            "taker/taker pair submitted"
        );

        // Second leg: market buy the same quantity on the other venue.
        let buy_result = self.adapters[eval.taker.0].market_buy(&pair, eval.quantity).await;

        self.trade = Some(ActiveTrade {
            shape: eval.shape,
            maker: eval.maker,
            taker: eval.taker,
            maker_side: Side::Sell,
            maker_order_id: sell.order_id,
            quantity: eval.quantity,
            maker_price: eval.maker_price,
            taker_price: eval.taker_price,
            maker_fee: eval.maker_leg_fee,
            taker_fee: eval.taker_leg_fee,
            maker_total: Decimal::ZERO,
            taker_total: Decimal::ZERO,
            unhedged: Decimal::ZERO,
        });
        // No resting phase: both legs drain straight to terminal events.
        self.phase = EnginePhase::CancelMake;

        match buy_result {
            Ok(placed) => {
                self.stats.orders_placed += 1;
                self.orders.insert(
                    placed.order_id.clone(),
                    TrackedOrder::new(
                        placed.order_id.clone(),
                        eval.taker,
                        OrderRole::Taker,
                        Side::Buy,
                        OrderType::Market,
                        None,
                        eval.quantity,
                    ),
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "taker/taker cover leg failed; sell leg may be unhedged");
                if let Some(trade) = self.trade.as_mut() {
                    trade.unhedged += eval.quantity;
                }
                self.handle_submit_error(eval.taker, e)
            }
        }
    }

    /// Re-check a resting maker order against the books it was priced from.
    async fn review_maker_order(&mut self) -> Result<()> {
        let Some(trade) = self.trade.as_ref() else { return Ok(()) };
        let order_id = trade.maker_order_id.clone();
        let Some(order) = self.orders.get(&order_id) else { return Ok(()) };
        if order.state == OrderState::Cancelling || order.state.is_terminal() {
            return Ok(());
        }
        let remaining = order.remaining();
        let (maker, taker) = (trade.maker, trade.taker);
        let (maker_side, our_price) = (trade.maker_side, trade.maker_price);
        let (maker_fee, taker_fee) = (trade.maker_fee, trade.taker_fee);

        let maker_state = &self.venues[maker.0];
        let taker_state = &self.venues[taker.0];

        let cancel_reason = if !maker_state.book_valid || !taker_state.book_valid {
            Some("book invalidated")
        } else {
            let touch = match maker_side {
                Side::Buy => maker_state.book.best_bid(),
                Side::Sell => maker_state.book.best_ask(),
            };
            let cover = match maker_side {
                Side::Buy => taker_state.book.best_bid(),
                Side::Sell => taker_state.book.best_ask(),
            };
            match (touch, cover) {
                (Some((touch_price, _)), Some((cover_price, cover_qty))) => {
                    let outbid = match maker_side {
                        Side::Buy => touch_price > our_price,
                        Side::Sell => touch_price < our_price,
                    };
                    let decayed = maker_hold_spread(
                        maker_side, our_price, cover_price, maker_fee, taker_fee,
                    ) <= Decimal::ZERO;
                    let starved = cover_qty < remaining;
                    if outbid {
                        Some("outbid at the touch")
                    } else if decayed {
                        Some("profit decayed")
                    } else if starved {
                        Some("taker liquidity below resting size")
                    } else {
                        None
                    }
                }
                _ => Some("top of book vanished"),
            }
        };

        if let Some(reason) = cancel_reason {
            info!(order_id = %order_id, reason, "cancelling maker order");
            self.cancel_maker(order_id).await?;
        }
        Ok(())
    }

    async fn cancel_maker(&mut self, order_id: String) -> Result<()> {
        let Some(order) = self.orders.get_mut(&order_id) else { return Ok(()) };
        let venue = order.venue;
        order.request_cancel();
        let pair = self.cfg.pair.clone();

        match self.adapters[venue.0].cancel(&order_id, &pair).await {
            Ok(()) => {
                self.stats.cancels += 1;
                self.phase = EnginePhase::CancelMake;
                Ok(())
            }
            Err(VenueError::UnknownOrder(_)) => {
                // Filled or already gone; the terminal event settles it.
                debug!(order_id = %order_id, "cancel target already gone");
                self.phase = EnginePhase::CancelMake;
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(order_id = %order_id, error = %e, "cancel failed; order still resting");
                if let Some(order) = self.orders.get_mut(&order_id) {
                    order.cancel_failed();
                }
                Ok(())
            }
            Err(e) => self.handle_submit_error(venue, e),
        }
    }

    async fn on_match(&mut self, order_id: String, price: Price, qty: Qty) -> Result<()> {
        let Some(order) = self.orders.get_mut(&order_id) else {
            debug!(order_id = %order_id, "match for untracked order ignored");
            return Ok(());
        };
        let actual = order.apply_match(qty);
        if actual.is_zero() {
            return Ok(());
        }
        let (venue, role, side) = (order.venue, order.role, order.side);
        info!(
            order_id = %order_id,
            venue = %self.venues[venue.0].name,
            role = ?role,
            side = %side,
            price = %price,
            qty = %actual,
            "fill"
        );

        match role {
            OrderRole::Maker => {
                self.apply_fill(venue, side, price, actual, Some(&order_id));
                if let Some(trade) = self.trade.as_mut() {
                    trade.maker_total += price * actual;
                }
                let covers = self
                    .trade
                    .as_ref()
                    .map(|t| t.shape.is_maker_taker())
                    .unwrap_or(false);
                if covers {
                    self.cover_fill(price, actual).await?;
                }
            }
            OrderRole::Taker => {
                self.apply_fill(venue, side, price, actual, None);
                if let Some(trade) = self.trade.as_mut() {
                    trade.taker_total += price * actual;
                }
            }
            OrderRole::Liquidation => {
                // Balances were backed out when the liquidation was placed;
                // this fill only flattens venue-side exposure.
                info!(order_id = %order_id, price = %price, qty = %actual, "liquidation fill");
            }
        }
        Ok(())
    }

    /// Wallet effect of one fill, plus reservation consumption for resting
    /// maker orders.
    fn apply_fill(
        &mut self,
        venue: VenueId,
        side: Side,
        price: Price,
        qty: Qty,
        reservation: Option<&str>,
    ) {
        let base = self.cfg.pair.base.clone();
        let quote = self.cfg.pair.quote.clone();
        let notional = price * qty;

        let outcome = match side {
            Side::Buy => match self.balances.debit(venue, &quote, notional) {
                Ok(()) => {
                    self.balances.credit(venue, &base, qty);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Side::Sell => match self.balances.debit(venue, &base, qty) {
                Ok(()) => {
                    self.balances.credit(venue, &quote, notional);
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = outcome {
            // Bookkeeping drift, not a venue rejection. Keep trading but
            // make the inconsistency impossible to miss.
            error!(error = %e, "fill debit failed; balances inconsistent");
        }

        if let Some(order_id) = reservation {
            let amount = match side {
                Side::Buy => notional,
                Side::Sell => qty,
            };
            self.balances.consume_reservation(order_id, amount);
        }
    }

    /// Inverse of [`Self::apply_fill`], used when a too-small fill is
    /// handed to a liquidation order instead of a cover.
    fn reverse_fill(&mut self, venue: VenueId, side: Side, price: Price, qty: Qty) {
        let base = self.cfg.pair.base.clone();
        let quote = self.cfg.pair.quote.clone();
        let notional = price * qty;

        let outcome = match side {
            Side::Buy => match self.balances.debit(venue, &base, qty) {
                Ok(()) => {
                    self.balances.credit(venue, &quote, notional);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Side::Sell => match self.balances.debit(venue, &quote, notional) {
                Ok(()) => {
                    self.balances.credit(venue, &base, qty);
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = outcome {
            error!(error = %e, "fill back-out failed; balances inconsistent");
        }
    }

    /// Decide how to flatten a maker fill: cover on the taker venue, or
    /// liquidate on the maker venue, or carry it as unhedged residue.
    async fn cover_fill(&mut self, fill_price: Price, fill_qty: Qty) -> Result<()> {
        let Some(trade) = self.trade.as_ref() else { return Ok(()) };
        let (maker, taker) = (trade.maker, trade.taker);
        let (maker_side, taker_price) = (trade.maker_side, trade.taker_price);
        let pair = self.cfg.pair.clone();
        let fill_notional = taker_price * fill_qty;

        if fill_notional >= self.venues[taker.0].product.min_notional {
            let result = match maker_side {
                Side::Buy => self.adapters[taker.0].market_sell(&pair, fill_qty).await,
                Side::Sell => self.adapters[taker.0].market_buy(&pair, fill_qty).await,
            };
            return match result {
                Ok(placed) => {
                    self.stats.orders_placed += 1;
                    info!(order_id = %placed.order_id, qty = %fill_qty, "cover order placed");
                    self.orders.insert(
                        placed.order_id.clone(),
                        TrackedOrder::new(
                            placed.order_id.clone(),
                            taker,
                            OrderRole::Taker,
                            maker_side.opposite(),
                            OrderType::Market,
                            None,
                            fill_qty,
                        ),
                    );
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, qty = %fill_qty, "cover submit failed; unhedged residue");
                    if let Some(trade) = self.trade.as_mut() {
                        trade.unhedged += fill_qty;
                    }
                    self.handle_submit_error(taker, e)
                }
            };
        }

        // Too small to cover; try to flatten where it filled.
        let maker_min = self.venues[maker.0].product.min_notional;
        if fill_notional >= maker_min * NOTIONAL_HEADROOM {
            let offset = self.cfg.liquidation_offset;
            let tick = self.venues[maker.0].product.price_tick;
            let raw = match maker_side {
                // Extra base on hand: dump it under the ask.
                Side::Buy => self.venues[maker.0]
                    .book
                    .best_ask()
                    .map(|(p, _)| p * (Decimal::ONE - offset)),
                // Short base: buy it back over the bid.
                Side::Sell => self.venues[maker.0]
                    .book
                    .best_bid()
                    .map(|(p, _)| p * (Decimal::ONE + offset)),
            };
            let Some(raw) = raw else {
                warn!(qty = %fill_qty, "no maker top of book to liquidate against; unhedged residue");
                if let Some(trade) = self.trade.as_mut() {
                    trade.unhedged += fill_qty;
                }
                return Ok(());
            };
            let liq_price = round_to_tick(raw, tick);
            let liq_side = maker_side.opposite();

            let result = match liq_side {
                Side::Sell => {
                    self.adapters[maker.0]
                        .limit_sell(&pair, liq_price, fill_qty, OrderFlags::default())
                        .await
                }
                Side::Buy => {
                    self.adapters[maker.0]
                        .limit_buy(&pair, liq_price, fill_qty, OrderFlags::default())
                        .await
                }
            };
            return match result {
                Ok(placed) => {
                    self.stats.orders_placed += 1;
                    warn!(
                        order_id = %placed.order_id,
                        price = %liq_price,
                        qty = %fill_qty,
                        "fill below taker minimum; liquidating on maker venue"
                    );
                    // The fill is treated as never having happened for the
                    // round trip: back out its wallet delta and totals.
                    self.reverse_fill(maker, maker_side, fill_price, fill_qty);
                    if let Some(trade) = self.trade.as_mut() {
                        trade.maker_total -= fill_price * fill_qty;
                        trade.unhedged += fill_qty;
                    }
                    self.orders.insert(
                        placed.order_id.clone(),
                        TrackedOrder::new(
                            placed.order_id.clone(),
                            maker,
                            OrderRole::Liquidation,
                            liq_side,
                            OrderType::Limit,
                            Some(liq_price),
                            fill_qty,
                        ),
                    );
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, qty = %fill_qty, "liquidation submit failed; unhedged residue");
                    if let Some(trade) = self.trade.as_mut() {
                        trade.unhedged += fill_qty;
                    }
                    self.handle_submit_error(maker, e)
                }
            };
        }

        warn!(
            qty = %fill_qty,
            notional = %fill_notional,
            "fill below both venue minimums; unhedged residue"
        );
        if let Some(trade) = self.trade.as_mut() {
            trade.unhedged += fill_qty;
        }
        Ok(())
    }

    fn on_done(&mut self, order_id: String, reason: DoneReason) -> Result<()> {
        let Some(order) = self.orders.get_mut(&order_id) else {
            debug!(order_id = %order_id, "done for untracked order ignored");
            return Ok(());
        };
        if !order.apply_done(reason) {
            return Ok(());
        }
        let role = order.role;
        debug!(order_id = %order_id, ?reason, "order done");

        // Whatever did not fill no longer needs its reservation.
        self.balances.release(&order_id);

        if role == OrderRole::Maker && self.phase == EnginePhase::WaitForMatch {
            self.phase = EnginePhase::CancelMake;
        }
        self.try_reconcile()
    }

    /// Close out the active trade once every outstanding order is terminal.
    fn try_reconcile(&mut self) -> Result<()> {
        if self.trade.is_none() {
            return Ok(());
        }
        if self.orders.values().any(|o| o.is_live()) {
            return Ok(());
        }
        let Some(trade) = self.trade.take() else { return Ok(()) };

        if trade.maker_total.is_zero() && trade.taker_total.is_zero() {
            // Cancelled clean; nothing executed, nothing to record.
            debug!(shape = trade.shape.label(), "trade ended with no executions");
        } else {
            let profit = round_trip_profit(
                trade.maker_side,
                trade.maker_total,
                trade.taker_total,
                trade.maker_fee,
                trade.taker_fee,
            );
            let record = TradeRecord {
                ts: Utc::now(),
                shape: trade.shape.label(),
                maker_venue: self.venues[trade.maker.0].name.clone(),
                maker_side: trade.maker_side,
                taker_venue: self.venues[trade.taker.0].name.clone(),
                taker_side: trade.maker_side.opposite(),
                maker_total: trade.maker_total,
                taker_total: trade.taker_total,
                profit,
            };
            self.trade_log
                .append(&record)
                .context("appending trade log")?;
            self.stats.round_trips += 1;
            info!(
                shape = trade.shape.label(),
                maker_total = %trade.maker_total,
                taker_total = %trade.taker_total,
                profit = %profit,
                unhedged = %trade.unhedged,
                "round trip complete"
            );
        }

        self.orders.clear();
        self.phase = EnginePhase::WaitForArb;
        Ok(())
    }

    fn handle_submit_error(&mut self, venue: VenueId, err: VenueError) -> Result<()> {
        match err {
            VenueError::Authentication(msg) => Err(anyhow!(
                "authentication failure on {}: {msg}",
                self.venues[venue.0].name
            )),
            VenueError::Protocol(msg) => {
                error!(
                    venue = %self.venues[venue.0].name,
                    error = %msg,
                    "protocol error; venue disabled until restart"
                );
                self.venues[venue.0].disabled = true;
                self.venues[venue.0].book_valid = false;
                Ok(())
            }
            e => {
                warn!(venue = %self.venues[venue.0].name, error = %e, "order submit failed");
                Ok(())
            }
        }
    }

    async fn invalidate_book(&mut self, venue: VenueId, reason: &str) {
        self.venues[venue.0].book_valid = false;
        let pair = self.cfg.pair.clone();
        match self.adapters[venue.0].subscribe_orderbook(&pair).await {
            Ok(()) => {
                info!(venue = %self.venues[venue.0].name, reason, "resubscribed for fresh snapshot");
            }
            Err(e) => {
                warn!(
                    venue = %self.venues[venue.0].name,
                    reason,
                    error = %e,
                    "resubscribe failed; waiting for adapter reconnect"
                );
            }
        }
    }

    async fn shutdown(&mut self) {
        self.phase = EnginePhase::Done;
        self.mux.shutdown();

        let pair = self.cfg.pair.clone();
        let live: Vec<(String, VenueId)> = self
            .orders
            .values()
            .filter(|o| o.is_live())
            .map(|o| (o.order_id.clone(), o.venue))
            .collect();
        for (order_id, venue) in live {
            match timeout(
                SHUTDOWN_CANCEL_TIMEOUT,
                self.adapters[venue.0].cancel(&order_id, &pair),
            )
            .await
            {
                Ok(Ok(())) => info!(order_id = %order_id, "cancelled on shutdown"),
                Ok(Err(e)) => {
                    warn!(order_id = %order_id, error = %e, "cancel on shutdown failed")
                }
                Err(_) => warn!(order_id = %order_id, "cancel on shutdown timed out"),
            }
        }
        info!(stats = ?self.stats, "engine stopped");
    }
}
