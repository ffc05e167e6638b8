//! Per-venue L2 order book.
//!
//! Each side is a lazy max-heap over price keys plus an occupancy map from
//! price to the live (quantity, version). Updates push a fresh heap entry and
//! bump the map; reads pop stale entries until the top agrees with the map.
//! L2 semantics: an update replaces the aggregate quantity at a level, it
//! never adds to it, and quantity zero deletes the level.

use crate::model::{BookLevel, Price, Qty, Side};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;

/// Discontinuity in venue-supplied sequence numbers. The book is unusable
/// until rebuilt from a fresh snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sequence gap: expected {expected}, got {got}")]
pub struct Gap {
    pub expected: u64,
    pub got: u64,
}

/// One price-ordered side. Bids store prices directly (heap max = best bid);
/// asks store negated prices so the heap max is the lowest ask.
#[derive(Debug, Clone)]
struct LazySide {
    heap: BinaryHeap<(Decimal, u64)>,
    levels: HashMap<Price, (Qty, u64)>,
    invert: bool,
    version: u64,
}

impl LazySide {
    fn new(invert: bool) -> Self {
        Self {
            heap: BinaryHeap::new(),
            levels: HashMap::new(),
            invert,
            version: 0,
        }
    }

    #[inline]
    fn key(invert: bool, price: Price) -> Decimal {
        if invert {
            -price
        } else {
            price
        }
    }

    fn set(&mut self, price: Price, qty: Qty) {
        self.version += 1;
        if qty.is_zero() {
            // Venues may delete a level we never saw; that is not an error.
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, (qty, self.version));
            self.heap.push((Self::key(self.invert, price), self.version));
        }
    }

    /// Pop heap entries superseded by newer writes or deleted levels.
    fn prune(&mut self) {
        while let Some(&(key, version)) = self.heap.peek() {
            let price = Self::key(self.invert, key);
            match self.levels.get(&price) {
                Some(&(_, live)) if live == version => return,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    fn best(&self) -> Option<(Price, Qty)> {
        if let Some(&(key, version)) = self.heap.peek() {
            let price = Self::key(self.invert, key);
            if let Some(&(qty, live)) = self.levels.get(&price) {
                if live == version {
                    return Some((price, qty));
                }
            }
        }
        // Mutation paths prune before returning, so the top is normally live.
        let invert = self.invert;
        self.levels
            .iter()
            .max_by_key(|(price, _)| Self::key(invert, **price))
            .map(|(price, (qty, _))| (*price, *qty))
    }

    fn enforce_depth(&mut self, depth: usize) {
        if self.levels.len() <= depth {
            return;
        }
        let invert = self.invert;
        let mut prices: Vec<Price> = self.levels.keys().copied().collect();
        prices.sort_by_key(|price| Reverse(Self::key(invert, *price)));
        for price in prices.drain(depth..) {
            self.levels.remove(&price);
        }
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.levels.clear();
        self.version = 0;
    }

    fn len(&self) -> usize {
        self.levels.len()
    }

    /// Levels sorted best-first.
    fn sorted(&self) -> Vec<BookLevel> {
        let invert = self.invert;
        let mut out: Vec<BookLevel> = self
            .levels
            .iter()
            .map(|(price, (qty, _))| BookLevel::new(*price, *qty))
            .collect();
        out.sort_by_key(|level| Reverse(Self::key(invert, level.price)));
        out
    }
}

/// L2 order book for one (venue, pair).
#[derive(Debug, Clone)]
pub struct OrderBook {
    bids: LazySide,
    asks: LazySide,
    last_sequence: Option<u64>,
    max_depth: Option<usize>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: LazySide::new(false),
            asks: LazySide::new(true),
            last_sequence: None,
            max_depth: None,
        }
    }

    /// Cap each side to `depth` levels after every mutation. Mirrors the
    /// subscribed depth so venue-side truncation cannot leave ghost levels.
    pub fn with_depth(depth: usize) -> Self {
        let mut book = Self::new();
        book.max_depth = Some(depth);
        book
    }

    /// Initialize from a deep snapshot. `sequence` is the snapshot's
    /// high-water mark; earlier deltas are ignored on replay.
    pub fn from_snapshot(bids: &[BookLevel], asks: &[BookLevel], sequence: Option<u64>) -> Self {
        let mut book = Self::new();
        book.reset_from_snapshot(bids, asks, sequence);
        book
    }

    /// Rebuild both sides in place, keeping the configured depth cap.
    pub fn reset_from_snapshot(
        &mut self,
        bids: &[BookLevel],
        asks: &[BookLevel],
        sequence: Option<u64>,
    ) {
        self.bids.clear();
        self.asks.clear();
        for level in bids {
            if !level.qty.is_zero() {
                self.bids.set(level.price, level.qty);
            }
        }
        for level in asks {
            if !level.qty.is_zero() {
                self.asks.set(level.price, level.qty);
            }
        }
        self.last_sequence = sequence;
        self.finish_mutation();
    }

    /// Atomically apply a batch of `(side, price, qty)` changes.
    ///
    /// Replace semantics: the level is set to `qty`; zero deletes it.
    /// Where the venue supplies sequences, a replayed update
    /// (`sequence <= last`) is ignored and a forward discontinuity is a
    /// [`Gap`]; the batch is not applied on a gap.
    pub fn apply_update(
        &mut self,
        changes: &[(Side, Price, Qty)],
        sequence: Option<u64>,
    ) -> Result<(), Gap> {
        if let Some(seq) = sequence {
            if let Some(last) = self.last_sequence {
                if seq <= last {
                    return Ok(());
                }
                if seq != last + 1 {
                    return Err(Gap {
                        expected: last + 1,
                        got: seq,
                    });
                }
            }
            self.last_sequence = Some(seq);
        }

        for &(side, price, qty) in changes {
            match side {
                Side::Buy => self.bids.set(price, qty),
                Side::Sell => self.asks.set(price, qty),
            }
        }
        self.finish_mutation();
        Ok(())
    }

    fn finish_mutation(&mut self) {
        if let Some(depth) = self.max_depth {
            self.bids.enforce_depth(depth);
            self.asks.enforce_depth(depth);
        }
        self.bids.prune();
        self.asks.prune();
    }

    /// Best live bid level, if any.
    #[inline]
    pub fn best_bid(&self) -> Option<(Price, Qty)> {
        self.bids.best()
    }

    /// Best live ask level, if any.
    #[inline]
    pub fn best_ask(&self) -> Option<(Price, Qty)> {
        self.asks.best()
    }

    /// A consistent venue never crosses; a crossed book means we lost an
    /// update and must resnapshot, same as a sequence gap.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn depth(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    /// Levels of one side sorted best-first.
    pub fn levels(&self, side: Side) -> Vec<BookLevel> {
        match side {
            Side::Buy => self.bids.sorted(),
            Side::Sell => self.asks.sorted(),
        }
    }
}
