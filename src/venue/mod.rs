//! Venue capability boundary.
//!
//! Each exchange implements [`VenueAdapter`]: an inbound websocket surface
//! that yields canonical events and an outbound REST surface for orders and
//! account queries. The engine depends only on this trait; venue vocabulary,
//! signing schemes, and wire quirks stay behind it.

pub mod binance;
pub mod coinbase;

use crate::feed::CanonicalEvent;
use crate::model::{OrderType, Pair, Price, ProductInfo, Qty, Side};
use crate::strategy::fees::FeeSchedule;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error taxonomy surfaced to the engine. Everything below `Protocol` is
/// locally recoverable; `Protocol` halts the adapter session and
/// `Authentication` is fatal for the run.
#[derive(Debug, Error)]
pub enum VenueError {
    /// The post-only order would have crossed the book.
    #[error("post-only order would cross")]
    PostOnlyRejected,

    /// Cancel target already gone (filled or never existed).
    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("rate limited")]
    RateLimited,

    /// Retryable network failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected venue response; this adapter session is done.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl VenueError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        VenueError::Transport(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        VenueError::Protocol(err.to_string())
    }

    /// Whether the engine may keep the adapter session after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            VenueError::Protocol(_) | VenueError::Authentication(_)
        )
    }
}

/// Order submission flags. Venues reject unsupported combinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderFlags {
    /// Rest or reject: never take liquidity.
    pub post_only: bool,
    /// Fill what crosses immediately, cancel the remainder.
    pub immediate_or_cancel: bool,
    /// Fill the whole size immediately or cancel everything.
    pub fill_or_kill: bool,
}

impl OrderFlags {
    pub fn post_only() -> Self {
        Self {
            post_only: true,
            ..Self::default()
        }
    }

    pub fn immediate_or_cancel() -> Self {
        Self {
            immediate_or_cancel: true,
            ..Self::default()
        }
    }

    pub fn fill_or_kill() -> Self {
        Self {
            fill_or_kill: true,
            ..Self::default()
        }
    }
}

/// REST acknowledgment for a submitted order. Fills arrive later on the
/// user channel; this only confirms acceptance and carries the venue id.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub qty: Qty,
}

/// Uniform bidirectional venue contract.
///
/// Inbound: `connect` + `subscribe_*` start the websocket machinery;
/// `events` hands over the single canonical stream (one take; the stream is
/// infinite except on terminal error, and adapters reconnect internally).
/// Outbound: signed REST calls, serialized by the engine with event
/// consumption.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Stable lowercase venue name, used in logs and the trade log.
    fn name(&self) -> &str;

    /// Establish transport and negotiate auth for private channels.
    async fn connect(&mut self) -> Result<(), VenueError>;

    /// Idempotent; a repeated call forces a fresh snapshot emission.
    async fn subscribe_orderbook(&mut self, pair: &Pair) -> Result<(), VenueError>;

    /// Idempotent subscription to our own order lifecycle.
    async fn subscribe_user(&mut self, pair: &Pair) -> Result<(), VenueError>;

    /// The canonical event stream. Single consumer; a second call returns a
    /// closed stream.
    fn events(&mut self) -> mpsc::Receiver<CanonicalEvent>;

    async fn limit_buy(
        &self,
        pair: &Pair,
        price: Price,
        qty: Qty,
        flags: OrderFlags,
    ) -> Result<PlacedOrder, VenueError>;

    async fn limit_sell(
        &self,
        pair: &Pair,
        price: Price,
        qty: Qty,
        flags: OrderFlags,
    ) -> Result<PlacedOrder, VenueError>;

    async fn market_buy(&self, pair: &Pair, qty: Qty) -> Result<PlacedOrder, VenueError>;

    async fn market_sell(&self, pair: &Pair, qty: Qty) -> Result<PlacedOrder, VenueError>;

    async fn cancel(&self, order_id: &str, pair: &Pair) -> Result<(), VenueError>;

    /// Current balance for one asset.
    async fn get_wallet(&self, asset: &str) -> Result<Decimal, VenueError>;

    /// Tick sizes and minimum notional for the pair.
    async fn get_products(&self, pair: &Pair) -> Result<ProductInfo, VenueError>;

    /// Current fee rates for our account tier.
    async fn get_fees(&self) -> Result<FeeSchedule, VenueError>;
}
