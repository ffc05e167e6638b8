//! End-to-end engine scenarios driven through a scripted in-memory venue.
//!
//! The mock adapter records every outbound command and hands back
//! deterministic order ids; tests feed canonical events directly into the
//! engine and assert on phase, balances, outbound calls, and the trade log.

use async_trait::async_trait;
use chrono::Utc;
use crossbot::engine::trade_log::TradeLog;
use crossbot::engine::{Engine, EngineConfig, EnginePhase, VenueSetup};
use crossbot::feed::{CanonicalEvent, DoneReason, VenueEvent};
use crossbot::model::{BookLevel, OrderType, Pair, Price, ProductInfo, Qty, Side, VenueId};
use crossbot::strategy::fees::FeeSchedule;
use crossbot::venue::{OrderFlags, PlacedOrder, VenueAdapter, VenueError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const A: VenueId = VenueId(0);
const B: VenueId = VenueId(1);

#[derive(Debug, Clone, PartialEq)]
enum VenueCall {
    LimitBuy {
        price: Decimal,
        qty: Decimal,
        flags: OrderFlags,
    },
    LimitSell {
        price: Decimal,
        qty: Decimal,
        flags: OrderFlags,
    },
    MarketBuy {
        qty: Decimal,
    },
    MarketSell {
        qty: Decimal,
    },
    Cancel {
        order_id: String,
    },
    SubscribeOrderbook,
}

#[derive(Clone, Default)]
struct MockHandle {
    calls: Arc<Mutex<Vec<VenueCall>>>,
    order_errors: Arc<Mutex<VecDeque<VenueError>>>,
    cancel_errors: Arc<Mutex<VecDeque<VenueError>>>,
    next_id: Arc<AtomicU64>,
}

impl MockHandle {
    fn calls(&self) -> Vec<VenueCall> {
        self.calls.lock().clone()
    }

    fn resubscribes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, VenueCall::SubscribeOrderbook))
            .count()
    }

    fn push_order_error(&self, err: VenueError) {
        self.order_errors.lock().push_back(err);
    }

    fn push_cancel_error(&self, err: VenueError) {
        self.cancel_errors.lock().push_back(err);
    }
}

struct MockVenue {
    name: &'static str,
    handle: MockHandle,
    event_rx: Option<mpsc::Receiver<CanonicalEvent>>,
    // Keeps the canonical stream open for the engine's multiplexer.
    _event_tx: mpsc::Sender<CanonicalEvent>,
}

fn mock_venue(name: &'static str) -> (MockVenue, MockHandle) {
    let (tx, rx) = mpsc::channel(8);
    let handle = MockHandle::default();
    (
        MockVenue {
            name,
            handle: handle.clone(),
            event_rx: Some(rx),
            _event_tx: tx,
        },
        handle,
    )
}

impl MockVenue {
    fn place(
        &self,
        call: VenueCall,
        side: Side,
        order_type: OrderType,
        price: Option<Price>,
        qty: Qty,
    ) -> Result<PlacedOrder, VenueError> {
        self.handle.calls.lock().push(call);
        if let Some(err) = self.handle.order_errors.lock().pop_front() {
            return Err(err);
        }
        let n = self.handle.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PlacedOrder {
            order_id: format!("{}-{}", self.name, n),
            side,
            order_type,
            price,
            qty,
        })
    }
}

#[async_trait]
impl VenueAdapter for MockVenue {
    fn name(&self) -> &str {
        self.name
    }

    async fn connect(&mut self) -> Result<(), VenueError> {
        Ok(())
    }

    async fn subscribe_orderbook(&mut self, _pair: &Pair) -> Result<(), VenueError> {
        self.handle.calls.lock().push(VenueCall::SubscribeOrderbook);
        Ok(())
    }

    async fn subscribe_user(&mut self, _pair: &Pair) -> Result<(), VenueError> {
        Ok(())
    }

    fn events(&mut self) -> mpsc::Receiver<CanonicalEvent> {
        self.event_rx.take().unwrap_or_else(|| {
            let (_, rx) = mpsc::channel(1);
            rx
        })
    }

    async fn limit_buy(
        &self,
        _pair: &Pair,
        price: Price,
        qty: Qty,
        flags: OrderFlags,
    ) -> Result<PlacedOrder, VenueError> {
        self.place(
            VenueCall::LimitBuy { price, qty, flags },
            Side::Buy,
            OrderType::Limit,
            Some(price),
            qty,
        )
    }

    async fn limit_sell(
        &self,
        _pair: &Pair,
        price: Price,
        qty: Qty,
        flags: OrderFlags,
    ) -> Result<PlacedOrder, VenueError> {
        self.place(
            VenueCall::LimitSell { price, qty, flags },
            Side::Sell,
            OrderType::Limit,
            Some(price),
            qty,
        )
    }

    async fn market_buy(&self, _pair: &Pair, qty: Qty) -> Result<PlacedOrder, VenueError> {
        self.place(
            VenueCall::MarketBuy { qty },
            Side::Buy,
            OrderType::Market,
            None,
            qty,
        )
    }

    async fn market_sell(&self, _pair: &Pair, qty: Qty) -> Result<PlacedOrder, VenueError> {
        self.place(
            VenueCall::MarketSell { qty },
            Side::Sell,
            OrderType::Market,
            None,
            qty,
        )
    }

    async fn cancel(&self, order_id: &str, _pair: &Pair) -> Result<(), VenueError> {
        self.handle.calls.lock().push(VenueCall::Cancel {
            order_id: order_id.to_string(),
        });
        if let Some(err) = self.handle.cancel_errors.lock().pop_front() {
            return Err(err);
        }
        Ok(())
    }

    async fn get_wallet(&self, _asset: &str) -> Result<Decimal, VenueError> {
        Ok(Decimal::ZERO)
    }

    async fn get_products(&self, _pair: &Pair) -> Result<ProductInfo, VenueError> {
        Ok(std_product())
    }

    async fn get_fees(&self) -> Result<FeeSchedule, VenueError> {
        Ok(FeeSchedule::new(Decimal::ZERO, Decimal::ZERO))
    }
}

fn std_product() -> ProductInfo {
    ProductInfo {
        price_tick: dec!(0.01),
        size_tick: dec!(0.01),
        min_notional: dec!(10),
    }
}

struct Harness {
    engine: Engine,
    a: MockHandle,
    b: MockHandle,
    log_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn harness_with(
    product_a: ProductInfo,
    product_b: ProductInfo,
    fees: FeeSchedule,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("trades.log");
    let (venue_a, a) = mock_venue("alpha");
    let (venue_b, b) = mock_venue("beta");

    let venues = vec![
        VenueSetup {
            name: "alpha".to_string(),
            adapter: Box::new(venue_a),
            product: product_a,
            fees,
            base_balance: dec!(100),
            quote_balance: dec!(10000),
        },
        VenueSetup {
            name: "beta".to_string(),
            adapter: Box::new(venue_b),
            product: product_b,
            fees,
            base_balance: dec!(100),
            quote_balance: dec!(10000),
        },
    ];
    let trade_log = TradeLog::open(&log_path).unwrap();
    let engine = Engine::new(EngineConfig::new(Pair::new("REP", "USD")), venues, trade_log);

    Harness {
        engine,
        a,
        b,
        log_path,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(
        std_product(),
        std_product(),
        FeeSchedule::new(dec!(0.0015), dec!(0.0025)),
    )
}

fn snapshot(venue: VenueId, bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> VenueEvent {
    snapshot_seq(venue, bids, asks, None)
}

fn snapshot_seq(
    venue: VenueId,
    bids: &[(Decimal, Decimal)],
    asks: &[(Decimal, Decimal)],
    sequence: Option<u64>,
) -> VenueEvent {
    VenueEvent {
        venue,
        event: CanonicalEvent::OrderBookSnapshot {
            bids: bids.iter().map(|&(p, q)| BookLevel::new(p, q)).collect(),
            asks: asks.iter().map(|&(p, q)| BookLevel::new(p, q)).collect(),
            sequence,
        },
    }
}

fn update(
    venue: VenueId,
    changes: Vec<(Side, Decimal, Decimal)>,
    sequence: Option<u64>,
) -> VenueEvent {
    VenueEvent {
        venue,
        event: CanonicalEvent::OrderBookUpdate { changes, sequence },
    }
}

fn opened(venue: VenueId, order_id: &str, side: Side, price: Decimal, qty: Decimal) -> VenueEvent {
    VenueEvent {
        venue,
        event: CanonicalEvent::OrderOpen {
            order_id: order_id.to_string(),
            side,
            price,
            qty,
            ts: Utc::now(),
        },
    }
}

fn fill(venue: VenueId, order_id: &str, side: Side, price: Decimal, qty: Decimal) -> VenueEvent {
    VenueEvent {
        venue,
        event: CanonicalEvent::OrderMatch {
            order_id: order_id.to_string(),
            side,
            price,
            qty,
            ts: Utc::now(),
        },
    }
}

fn done(venue: VenueId, order_id: &str, reason: DoneReason, remaining: Decimal) -> VenueEvent {
    VenueEvent {
        venue,
        event: CanonicalEvent::OrderDone {
            order_id: order_id.to_string(),
            reason,
            remaining_qty: remaining,
            ts: Utc::now(),
        },
    }
}

/// Standard opening books: venue A 10.00/10.05, venue B 10.08/10.10 with
/// qty 5 at every touch. Maker-bid on A covering into B's bid is the one
/// viable shape.
async fn seed_books(h: &mut Harness) {
    h.engine
        .process(snapshot(A, &[(dec!(10.00), dec!(5))], &[(dec!(10.05), dec!(5))]))
        .await
        .unwrap();
    h.engine
        .process(snapshot(B, &[(dec!(10.08), dec!(5))], &[(dec!(10.10), dec!(5))]))
        .await
        .unwrap();
}

#[tokio::test]
async fn happy_path_maker_buy_covered_on_taker() {
    let mut h = harness();
    seed_books(&mut h).await;

    // The engine posted a post-only bid one tick over A's best bid.
    assert_eq!(h.engine.phase(), EnginePhase::WaitForMatch);
    assert_eq!(
        h.a.calls(),
        vec![VenueCall::LimitBuy {
            price: dec!(10.01),
            qty: dec!(5),
            flags: OrderFlags::post_only(),
        }]
    );
    // Quote is reserved but not spent.
    assert_eq!(h.engine.balances().balance(A, "USD"), dec!(10000));
    assert_eq!(h.engine.balances().available(A, "USD"), dec!(10000) - dec!(50.05));

    // Full fill, then cover on B.
    h.engine
        .process(opened(A, "alpha-1", Side::Buy, dec!(10.01), dec!(5)))
        .await
        .unwrap();
    h.engine
        .process(fill(A, "alpha-1", Side::Buy, dec!(10.01), dec!(5)))
        .await
        .unwrap();
    assert_eq!(h.b.calls(), vec![VenueCall::MarketSell { qty: dec!(5) }]);

    h.engine
        .process(done(A, "alpha-1", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();
    h.engine
        .process(fill(B, "beta-1", Side::Sell, dec!(10.08), dec!(5)))
        .await
        .unwrap();
    h.engine
        .process(done(B, "beta-1", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();

    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    assert_eq!(h.engine.stats().round_trips, 1);
    assert_eq!(h.engine.live_orders(), 0);

    // Balances moved by exactly the fills; base is flat across venues.
    let balances = h.engine.balances();
    assert_eq!(balances.balance(A, "REP"), dec!(105));
    assert_eq!(balances.balance(B, "REP"), dec!(95));
    assert_eq!(balances.balance(A, "USD"), dec!(10000) - dec!(50.05));
    assert_eq!(balances.balance(B, "USD"), dec!(10000) + dec!(50.40));
    let base_delta = (balances.balance(A, "REP") - dec!(100))
        + (balances.balance(B, "REP") - dec!(100));
    assert_eq!(base_delta, dec!(0));

    let log = std::fs::read_to_string(&h.log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with(",maker-bid-a,alpha,buy,beta,sell,50.05,50.40,0.148925"));
}

#[tokio::test]
async fn cancel_and_retry_when_profit_decays() {
    let mut h = harness();
    seed_books(&mut h).await;
    assert_eq!(h.engine.phase(), EnginePhase::WaitForMatch);

    // B's bid collapses before any match; profit at our price goes negative.
    h.engine
        .process(update(
            B,
            vec![(Side::Buy, dec!(10.08), dec!(0)), (Side::Buy, dec!(10.02), dec!(5))],
            None,
        ))
        .await
        .unwrap();

    assert!(h
        .a
        .calls()
        .contains(&VenueCall::Cancel { order_id: "alpha-1".to_string() }));
    assert_eq!(h.engine.phase(), EnginePhase::CancelMake);

    h.engine
        .process(done(A, "alpha-1", DoneReason::Cancelled, dec!(5)))
        .await
        .unwrap();

    // Back to scanning with no balance change and nothing logged.
    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    assert_eq!(h.engine.balances().balance(A, "USD"), dec!(10000));
    assert_eq!(h.engine.balances().available(A, "USD"), dec!(10000));
    assert_eq!(h.engine.balances().balance(A, "REP"), dec!(100));
    assert_eq!(h.engine.stats().round_trips, 0);
    assert_eq!(std::fs::read_to_string(&h.log_path).unwrap(), "");
}

#[tokio::test]
async fn partial_fill_covered_and_remainder_cancelled() {
    let mut h = harness();
    seed_books(&mut h).await;

    h.engine
        .process(fill(A, "alpha-1", Side::Buy, dec!(10.01), dec!(2.4)))
        .await
        .unwrap();
    // 2.4 * 10.08 clears B's minimum; covered immediately.
    assert_eq!(h.b.calls(), vec![VenueCall::MarketSell { qty: dec!(2.4) }]);

    // Taker liquidity drops under the remaining 2.6; the rest is cancelled.
    h.engine
        .process(update(B, vec![(Side::Buy, dec!(10.08), dec!(2.0))], None))
        .await
        .unwrap();
    assert!(h
        .a
        .calls()
        .contains(&VenueCall::Cancel { order_id: "alpha-1".to_string() }));

    h.engine
        .process(done(A, "alpha-1", DoneReason::Cancelled, dec!(2.6)))
        .await
        .unwrap();
    h.engine
        .process(fill(B, "beta-1", Side::Sell, dec!(10.08), dec!(2.4)))
        .await
        .unwrap();
    h.engine
        .process(done(B, "beta-1", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();

    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    let balances = h.engine.balances();
    assert_eq!(balances.balance(A, "REP"), dec!(102.4));
    assert_eq!(balances.balance(B, "REP"), dec!(97.6));
    assert_eq!(balances.balance(A, "USD"), dec!(10000) - dec!(24.024));
    assert_eq!(balances.balance(B, "USD"), dec!(10000) + dec!(24.192));
    // Reservation for the cancelled remainder is fully released.
    assert_eq!(balances.available(A, "USD"), dec!(10000) - dec!(24.024));

    let log = std::fs::read_to_string(&h.log_path).unwrap();
    // 0.168 gross - 0.036036 maker fee - 0.06048 taker fee.
    assert!(log.trim().ends_with(",24.024,24.192,0.0714840"));
}

#[tokio::test]
async fn tiny_fill_liquidates_on_maker_venue() {
    // Maker venue accepts small orders; taker venue does not.
    let product_a = ProductInfo {
        price_tick: dec!(0.01),
        size_tick: dec!(0.01),
        min_notional: dec!(0.4),
    };
    let mut h = harness_with(
        product_a,
        std_product(),
        FeeSchedule::new(dec!(0.0015), dec!(0.0025)),
    );
    seed_books(&mut h).await;
    assert_eq!(h.engine.phase(), EnginePhase::WaitForMatch);

    // 0.05 fills: 0.504 notional, under B's minimum but over A's.
    h.engine
        .process(fill(A, "alpha-1", Side::Buy, dec!(10.01), dec!(0.05)))
        .await
        .unwrap();

    // Liquidation sell on A at ask * 0.95, tick-rounded.
    assert!(h.a.calls().contains(&VenueCall::LimitSell {
        price: dec!(9.55),
        qty: dec!(0.05),
        flags: OrderFlags::default(),
    }));
    assert!(h.b.calls().is_empty());

    // The fill's wallet delta was backed out.
    assert_eq!(h.engine.balances().balance(A, "REP"), dec!(100));
    assert_eq!(h.engine.balances().balance(A, "USD"), dec!(10000));

    // Remainder cancelled; liquidation fills and completes.
    h.engine
        .process(done(A, "alpha-1", DoneReason::Cancelled, dec!(4.95)))
        .await
        .unwrap();
    h.engine
        .process(fill(A, "alpha-2", Side::Sell, dec!(9.55), dec!(0.05)))
        .await
        .unwrap();
    h.engine
        .process(done(A, "alpha-2", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();

    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    assert_eq!(h.engine.live_orders(), 0);
    // Nothing round-tripped, so nothing was logged.
    assert_eq!(std::fs::read_to_string(&h.log_path).unwrap(), "");
}

#[tokio::test]
async fn sequence_gap_invalidates_book_until_fresh_snapshot() {
    let mut h = harness();
    // Flat books: nothing viable, engine just tracks.
    h.engine
        .process(snapshot_seq(
            A,
            &[(dec!(10.00), dec!(5))],
            &[(dec!(10.05), dec!(5))],
            Some(100),
        ))
        .await
        .unwrap();
    h.engine
        .process(snapshot(B, &[(dec!(10.00), dec!(5))], &[(dec!(10.05), dec!(5))]))
        .await
        .unwrap();
    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    assert!(h.a.calls().is_empty());

    h.engine
        .process(update(A, vec![(Side::Buy, dec!(10.01), dec!(1))], Some(101)))
        .await
        .unwrap();

    // Sequence skips ahead: book invalidated, resubscribe requested.
    h.engine
        .process(update(A, vec![(Side::Buy, dec!(10.02), dec!(1))], Some(105)))
        .await
        .unwrap();
    assert_eq!(h.a.resubscribes(), 1);

    // Updates are dropped while the book is invalid; even a profitable B
    // book must not produce an order.
    h.engine
        .process(update(A, vec![(Side::Buy, dec!(10.03), dec!(1))], Some(106)))
        .await
        .unwrap();
    h.engine
        .process(update(
            B,
            vec![
                (Side::Sell, dec!(10.05), dec!(0)),
                (Side::Sell, dec!(10.12), dec!(5)),
                (Side::Buy, dec!(10.08), dec!(5)),
            ],
            None,
        ))
        .await
        .unwrap();
    assert!(!h
        .a
        .calls()
        .iter()
        .any(|c| matches!(c, VenueCall::LimitBuy { .. })));

    // Fresh snapshot restores the venue; the engine trades again.
    h.engine
        .process(snapshot_seq(
            A,
            &[(dec!(10.00), dec!(5))],
            &[(dec!(10.05), dec!(5))],
            Some(200),
        ))
        .await
        .unwrap();
    assert_eq!(h.engine.phase(), EnginePhase::WaitForMatch);
    assert!(h
        .a
        .calls()
        .iter()
        .any(|c| matches!(c, VenueCall::LimitBuy { .. })));
}

#[tokio::test]
async fn taker_taker_pair_skips_wait_for_match() {
    // A's bid crosses B's ask; both maker routes are starved of touch
    // quantity, so the both-taker sweep wins.
    let mut h = harness_with(
        std_product(),
        std_product(),
        FeeSchedule::new(dec!(0.0005), dec!(0.0005)),
    );
    h.engine
        .process(snapshot(A, &[(dec!(10.12), dec!(5))], &[(dec!(10.14), dec!(0.01))]))
        .await
        .unwrap();
    h.engine
        .process(snapshot(B, &[(dec!(10.05), dec!(0.01))], &[(dec!(10.10), dec!(5))]))
        .await
        .unwrap();

    // Both legs fired without a resting phase.
    assert_eq!(h.engine.phase(), EnginePhase::CancelMake);
    assert_eq!(
        h.a.calls(),
        vec![VenueCall::LimitSell {
            price: dec!(10.12),
            qty: dec!(5),
            flags: OrderFlags::immediate_or_cancel(),
        }]
    );
    assert_eq!(h.b.calls(), vec![VenueCall::MarketBuy { qty: dec!(5) }]);

    h.engine
        .process(fill(A, "alpha-1", Side::Sell, dec!(10.12), dec!(5)))
        .await
        .unwrap();
    h.engine
        .process(done(A, "alpha-1", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();
    h.engine
        .process(fill(B, "beta-1", Side::Buy, dec!(10.10), dec!(5)))
        .await
        .unwrap();
    h.engine
        .process(done(B, "beta-1", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();

    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    assert_eq!(h.engine.stats().round_trips, 1);

    // Base flat: sold 5 on A, bought 5 on B.
    let balances = h.engine.balances();
    assert_eq!(balances.balance(A, "REP"), dec!(95));
    assert_eq!(balances.balance(B, "REP"), dec!(105));

    let log = std::fs::read_to_string(&h.log_path).unwrap();
    // (50.60 - 50.50) - 50.60 * 0.0005 - 50.50 * 0.0005 = 0.04945.
    assert!(log.trim().ends_with(",taker-sell-a,alpha,sell,beta,buy,50.60,50.50,0.049450"));
}

#[tokio::test]
async fn outbid_at_touch_triggers_cancel() {
    let mut h = harness();
    seed_books(&mut h).await;

    // Someone posts a better bid on A than our 10.01.
    h.engine
        .process(update(A, vec![(Side::Buy, dec!(10.02), dec!(1))], None))
        .await
        .unwrap();

    assert!(h
        .a
        .calls()
        .contains(&VenueCall::Cancel { order_id: "alpha-1".to_string() }));
    assert_eq!(h.engine.phase(), EnginePhase::CancelMake);
}

#[tokio::test]
async fn late_fill_in_cancel_race_is_still_covered() {
    let mut h = harness();
    seed_books(&mut h).await;

    // Cancel races a fill: the venue no longer knows the order.
    h.a.push_cancel_error(VenueError::UnknownOrder("alpha-1".to_string()));
    h.engine
        .process(update(
            B,
            vec![(Side::Buy, dec!(10.08), dec!(0)), (Side::Buy, dec!(10.02), dec!(5))],
            None,
        ))
        .await
        .unwrap();
    assert_eq!(h.engine.phase(), EnginePhase::CancelMake);

    // The fill that beat the cancel arrives late and is still honored: it
    // gets covered at the trade's taker price basis.
    h.engine
        .process(fill(A, "alpha-1", Side::Buy, dec!(10.01), dec!(5)))
        .await
        .unwrap();
    assert_eq!(h.b.calls(), vec![VenueCall::MarketSell { qty: dec!(5) }]);

    h.engine
        .process(done(A, "alpha-1", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();
    h.engine
        .process(fill(B, "beta-1", Side::Sell, dec!(10.08), dec!(5)))
        .await
        .unwrap();
    h.engine
        .process(done(B, "beta-1", DoneReason::Filled, dec!(0)))
        .await
        .unwrap();

    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    assert_eq!(h.engine.stats().round_trips, 1);
}

#[tokio::test]
async fn recoverable_submit_error_keeps_scanning() {
    let mut h = harness();
    h.a.push_order_error(VenueError::InsufficientFunds);
    seed_books(&mut h).await;

    // Submit failed; engine stays in scan phase with no trade state.
    assert_eq!(h.engine.phase(), EnginePhase::WaitForArb);
    assert!(h.engine.trade().is_none());

    // The next tick retries and succeeds.
    h.engine
        .process(update(A, vec![(Side::Buy, dec!(10.00), dec!(4))], None))
        .await
        .unwrap();
    assert_eq!(h.engine.phase(), EnginePhase::WaitForMatch);
}
