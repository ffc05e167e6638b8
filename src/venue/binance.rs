//! Binance venue adapter.
//!
//! Inbound quirk: the depth stream carries only deltas, so the adapter
//! bootstraps with a REST depth snapshot and replays buffered deltas whose
//! final update id is newer, renumbering them onto a contiguous canonical
//! sequence. A venue-side id gap re-bootstraps inside the adapter; the
//! engine only ever sees snapshot-then-contiguous-updates. The user stream
//! bundles open/fill/done effects in one `executionReport` frame; the
//! adapter splits them into one canonical event per effect.
//! Outbound: signed REST (HMAC-SHA256 over the query string, hex).

use crate::config::VenueCredentials;
use crate::feed::{CanonicalEvent, DoneReason};
use crate::model::{BookLevel, OrderType, Pair, Price, ProductInfo, Qty, Side};
use crate::strategy::fees::FeeSchedule;
use crate::venue::{OrderFlags, PlacedOrder, VenueAdapter, VenueError};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const API_URL: &str = "https://api.binance.com";
const WS_URL: &str = "wss://stream.binance.com:9443";

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const REST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const RATE_LIMIT_ATTEMPTS: u32 = 3;
const RECV_WINDOW_MS: u64 = 5000;
const SNAPSHOT_DEPTH: u32 = 1000;
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug)]
enum BookCommand {
    Resync,
}

enum StreamEnd {
    Shutdown,
    Remote,
}

pub struct BinanceAdapter {
    creds: VenueCredentials,
    http: reqwest::Client,
    api_url: String,
    ws_url: String,
    event_tx: Option<mpsc::Sender<CanonicalEvent>>,
    event_rx: Option<mpsc::Receiver<CanonicalEvent>>,
    book_cmd_tx: Option<mpsc::Sender<BookCommand>>,
    book_worker: Option<JoinHandle<()>>,
    user_worker: Option<JoinHandle<()>>,
}

impl BinanceAdapter {
    pub fn new(creds: VenueCredentials) -> Self {
        Self::with_endpoints(creds, API_URL, WS_URL)
    }

    pub fn with_endpoints(creds: VenueCredentials, api_url: &str, ws_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            creds,
            http,
            api_url: api_url.to_string(),
            ws_url: ws_url.to_string(),
            event_tx: None,
            event_rx: None,
            book_cmd_tx: None,
            book_worker: None,
            user_worker: None,
        }
    }

    fn symbol(pair: &Pair) -> String {
        format!("{}{}", pair.base, pair.quote)
    }

    // ---------------------------------------------------------------- REST

    fn sign_query(secret: &str, query: &str) -> Result<String, VenueError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| VenueError::Authentication(format!("hmac key error: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(StatusCode, String), VenueError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let timestamp = Utc::now().timestamp_millis();
            let mut query = params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!("recvWindow={RECV_WINDOW_MS}&timestamp={timestamp}"));
            let signature = Self::sign_query(&self.creds.api_secret, &query)?;
            let url = format!("{}{}?{}&signature={}", self.api_url, path, query, signature);

            let response = self
                .http
                .request(method.clone(), &url)
                .header("X-MBX-APIKEY", &self.creds.api_key)
                .send()
                .await
                .map_err(VenueError::transport)?;
            let status = response.status();
            let text = response.text().await.map_err(VenueError::transport)?;

            if (status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418)
                && attempt < RATE_LIMIT_ATTEMPTS
            {
                let backoff = Duration::from_millis(
                    200 * 2u64.pow(attempt) + rand::thread_rng().gen_range(0..200),
                );
                debug!(path, attempt, backoff_ms = backoff.as_millis() as u64, "rate limited, backing off");
                sleep(backoff).await;
                continue;
            }
            return Ok((status, text));
        }
    }

    fn rest_error(status: StatusCode, text: &str) -> VenueError {
        #[derive(Deserialize)]
        struct ApiError {
            code: i64,
            msg: String,
        }
        let Ok(err) = serde_json::from_str::<ApiError>(text) else {
            return match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    VenueError::Authentication(text.to_string())
                }
                StatusCode::TOO_MANY_REQUESTS => VenueError::RateLimited,
                _ => VenueError::Protocol(format!("{status}: {text}")),
            };
        };
        let lowered = err.msg.to_lowercase();

        match err.code {
            -2011 => VenueError::UnknownOrder(err.msg),
            -1003 => VenueError::RateLimited,
            -2010 if lowered.contains("immediately match") => VenueError::PostOnlyRejected,
            -2010 if lowered.contains("insufficient") => VenueError::InsufficientFunds,
            -1002 | -2014 | -2015 => VenueError::Authentication(err.msg),
            _ if status == StatusCode::TOO_MANY_REQUESTS => VenueError::RateLimited,
            _ => VenueError::Protocol(format!("{}: {}", err.code, err.msg)),
        }
    }

    async fn place_order(
        &self,
        pair: &Pair,
        side: Side,
        order_type: OrderType,
        price: Option<Price>,
        qty: Qty,
        flags: OrderFlags,
    ) -> Result<PlacedOrder, VenueError> {
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", Self::symbol(pair)),
            (
                "side",
                match side {
                    Side::Buy => "BUY".to_string(),
                    Side::Sell => "SELL".to_string(),
                },
            ),
            ("quantity", qty.to_string()),
            ("newClientOrderId", uuid::Uuid::new_v4().simple().to_string()),
        ];
        match order_type {
            OrderType::Market => params.push(("type", "MARKET".to_string())),
            OrderType::Limit => {
                let price = price.ok_or_else(|| {
                    VenueError::Protocol("limit order requires a price".to_string())
                })?;
                params.push(("price", price.to_string()));
                if flags.post_only {
                    // LIMIT_MAKER rejects anything that would take.
                    params.push(("type", "LIMIT_MAKER".to_string()));
                } else {
                    params.push(("type", "LIMIT".to_string()));
                    let tif = if flags.immediate_or_cancel {
                        "IOC"
                    } else if flags.fill_or_kill {
                        "FOK"
                    } else {
                        "GTC"
                    };
                    params.push(("timeInForce", tif.to_string()));
                }
            }
        }

        let (status, text) = self
            .send_signed(Method::POST, "/api/v3/order", &params)
            .await?;
        if !status.is_success() {
            return Err(Self::rest_error(status, &text));
        }

        #[derive(Deserialize)]
        struct OrderResponse {
            #[serde(rename = "orderId")]
            order_id: u64,
        }
        let ack: OrderResponse = serde_json::from_str(&text)
            .map_err(|e| VenueError::protocol(format!("order response: {e}")))?;

        Ok(PlacedOrder {
            order_id: ack.order_id.to_string(),
            side,
            order_type,
            price,
            qty,
        })
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn name(&self) -> &str {
        "binance"
    }

    async fn connect(&mut self) -> Result<(), VenueError> {
        if self.event_tx.is_some() {
            return Ok(());
        }
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.event_tx = Some(event_tx);
        self.event_rx = Some(event_rx);
        info!("binance adapter connected");
        Ok(())
    }

    async fn subscribe_orderbook(&mut self, pair: &Pair) -> Result<(), VenueError> {
        let event_tx = self
            .event_tx
            .clone()
            .ok_or_else(|| VenueError::transport("adapter not connected"))?;

        if let Some(cmd_tx) = &self.book_cmd_tx {
            // Already streaming: force a fresh snapshot.
            return cmd_tx
                .try_send(BookCommand::Resync)
                .map_err(|_| VenueError::transport("book worker unavailable"));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        self.book_cmd_tx = Some(cmd_tx);
        let ws_url = self.ws_url.clone();
        let api_url = self.api_url.clone();
        let http = self.http.clone();
        let symbol = Self::symbol(pair);
        self.book_worker = Some(tokio::spawn(async move {
            run_book_feed(ws_url, api_url, http, symbol, event_tx, cmd_rx).await;
        }));
        Ok(())
    }

    async fn subscribe_user(&mut self, _pair: &Pair) -> Result<(), VenueError> {
        if self.user_worker.is_some() {
            return Ok(());
        }
        let event_tx = self
            .event_tx
            .clone()
            .ok_or_else(|| VenueError::transport("adapter not connected"))?;
        let ws_url = self.ws_url.clone();
        let api_url = self.api_url.clone();
        let http = self.http.clone();
        let api_key = self.creds.api_key.clone();
        self.user_worker = Some(tokio::spawn(async move {
            run_user_feed(ws_url, api_url, http, api_key, event_tx).await;
        }));
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
        pair: &Pair,
        price: Price,
        qty: Qty,
        flags: OrderFlags,
    ) -> Result<PlacedOrder, VenueError> {
        self.place_order(pair, Side::Buy, OrderType::Limit, Some(price), qty, flags)
            .await
    }

    async fn limit_sell(
        &self,
        pair: &Pair,
        price: Price,
        qty: Qty,
        flags: OrderFlags,
    ) -> Result<PlacedOrder, VenueError> {
        self.place_order(pair, Side::Sell, OrderType::Limit, Some(price), qty, flags)
            .await
    }

    async fn market_buy(&self, pair: &Pair, qty: Qty) -> Result<PlacedOrder, VenueError> {
        self.place_order(
            pair,
            Side::Buy,
            OrderType::Market,
            None,
            qty,
            OrderFlags::default(),
        )
        .await
    }

    async fn market_sell(&self, pair: &Pair, qty: Qty) -> Result<PlacedOrder, VenueError> {
        self.place_order(
            pair,
            Side::Sell,
            OrderType::Market,
            None,
            qty,
            OrderFlags::default(),
        )
        .await
    }

    async fn cancel(&self, order_id: &str, pair: &Pair) -> Result<(), VenueError> {
        let params = vec![
            ("symbol", Self::symbol(pair)),
            ("orderId", order_id.to_string()),
        ];
        let (status, text) = self
            .send_signed(Method::DELETE, "/api/v3/order", &params)
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::rest_error(status, &text))
        }
    }

    async fn get_wallet(&self, asset: &str) -> Result<Decimal, VenueError> {
        let account = self.fetch_account().await?;
        let balance = account
            .balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| -> Result<Decimal, VenueError> {
                let free = b
                    .free
                    .parse::<Decimal>()
                    .map_err(|e| VenueError::protocol(format!("balance value: {e}")))?;
                let locked = b
                    .locked
                    .parse::<Decimal>()
                    .map_err(|e| VenueError::protocol(format!("balance value: {e}")))?;
                Ok(free + locked)
            })
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        Ok(balance)
    }

    async fn get_products(&self, pair: &Pair) -> Result<ProductInfo, VenueError> {
        let url = format!(
            "{}/api/v3/exchangeInfo?symbol={}",
            self.api_url,
            Self::symbol(pair)
        );
        let response = self.http.get(&url).send().await.map_err(VenueError::transport)?;
        let status = response.status();
        let text = response.text().await.map_err(VenueError::transport)?;
        if !status.is_success() {
            return Err(Self::rest_error(status, &text));
        }

        #[derive(Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<SymbolInfo>,
        }
        #[derive(Deserialize)]
        struct SymbolInfo {
            filters: Vec<serde_json::Value>,
        }
        let info: ExchangeInfo = serde_json::from_str(&text)
            .map_err(|e| VenueError::protocol(format!("exchangeInfo response: {e}")))?;
        let symbol = info
            .symbols
            .into_iter()
            .next()
            .ok_or_else(|| VenueError::protocol("exchangeInfo: no symbol"))?;

        let field = |filter_type: &str, key: &str| -> Result<Decimal, VenueError> {
            symbol
                .filters
                .iter()
                .find(|f| f.get("filterType").and_then(|v| v.as_str()) == Some(filter_type))
                .and_then(|f| f.get(key).and_then(|v| v.as_str()))
                .map(|s| s.parse::<Decimal>())
                .transpose()
                .map_err(|e| VenueError::protocol(format!("filter {filter_type}.{key}: {e}")))?
                .ok_or_else(|| VenueError::protocol(format!("missing filter {filter_type}.{key}")))
        };

        let min_notional = field("NOTIONAL", "minNotional")
            .or_else(|_| field("MIN_NOTIONAL", "minNotional"))?;
        Ok(ProductInfo {
            price_tick: field("PRICE_FILTER", "tickSize")?,
            size_tick: field("LOT_SIZE", "stepSize")?,
            min_notional,
        })
    }

    async fn get_fees(&self) -> Result<FeeSchedule, VenueError> {
        let account = self.fetch_account().await?;
        // Commissions come back in basis points.
        let to_rate = |bps: i64| Decimal::from(bps) / Decimal::from(10_000);
        Ok(FeeSchedule::new(
            to_rate(account.maker_commission),
            to_rate(account.taker_commission),
        ))
    }
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(rename = "makerCommission")]
    maker_commission: i64,
    #[serde(rename = "takerCommission")]
    taker_commission: i64,
    balances: Vec<AccountBalance>,
}

#[derive(Deserialize)]
struct AccountBalance {
    asset: String,
    free: String,
    locked: String,
}

impl BinanceAdapter {
    async fn fetch_account(&self) -> Result<AccountResponse, VenueError> {
        let (status, text) = self
            .send_signed(Method::GET, "/api/v3/account", &[])
            .await?;
        if !status.is_success() {
            return Err(Self::rest_error(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| VenueError::protocol(format!("account response: {e}")))
    }
}

impl Drop for BinanceAdapter {
    fn drop(&mut self) {
        if let Some(worker) = self.book_worker.take() {
            worker.abort();
        }
        if let Some(worker) = self.user_worker.take() {
            worker.abort();
        }
    }
}

// -------------------------------------------------------------- book feed

#[derive(Debug, Deserialize)]
struct DepthFrame {
    #[serde(rename = "U")]
    first_id: u64,
    #[serde(rename = "u")]
    final_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

async fn run_book_feed(
    ws_url: String,
    api_url: String,
    http: reqwest::Client,
    symbol: String,
    event_tx: mpsc::Sender<CanonicalEvent>,
    mut cmd_rx: mpsc::Receiver<BookCommand>,
) {
    let mut delay = Duration::from_secs(1);
    let mut emit_seq: u64 = 0;
    loop {
        match book_session(
            &ws_url,
            &api_url,
            &http,
            &symbol,
            &event_tx,
            &mut cmd_rx,
            &mut emit_seq,
        )
        .await
        {
            Ok(StreamEnd::Shutdown) => return,
            Ok(StreamEnd::Remote) => {
                let _ = event_tx
                    .send(CanonicalEvent::Disconnected {
                        reason: "depth stream closed".to_string(),
                    })
                    .await;
                delay = Duration::from_secs(1);
            }
            Err(e) => {
                warn!(error = %e, symbol = %symbol, "binance depth feed failed; resyncing");
                let _ = event_tx
                    .send(CanonicalEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                sleep(delay + jitter).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
    }
}

async fn book_session(
    ws_url: &str,
    api_url: &str,
    http: &reqwest::Client,
    symbol: &str,
    event_tx: &mpsc::Sender<CanonicalEvent>,
    cmd_rx: &mut mpsc::Receiver<BookCommand>,
    emit_seq: &mut u64,
) -> anyhow::Result<StreamEnd> {
    let stream_url = format!("{}/ws/{}@depth@100ms", ws_url, symbol.to_lowercase());
    let (ws, _) = connect_async(&stream_url)
        .await
        .context("depth stream connect")?;
    info!(symbol = %symbol, "binance depth stream connected");
    let (mut write, mut read) = ws.split();

    // Buffer deltas while the REST snapshot is in flight.
    let snapshot_url = format!(
        "{}/api/v3/depth?symbol={}&limit={}",
        api_url, symbol, SNAPSHOT_DEPTH
    );
    let snapshot_fut = async {
        let response = http.get(&snapshot_url).send().await.context("depth snapshot")?;
        let text = response.text().await.context("depth snapshot body")?;
        serde_json::from_str::<DepthSnapshot>(&text).context("depth snapshot parse")
    };
    tokio::pin!(snapshot_fut);

    let mut buffered: Vec<DepthFrame> = Vec::new();
    let snapshot = loop {
        tokio::select! {
            snapshot = &mut snapshot_fut => break snapshot?,
            frame = read.next() => {
                let Some(frame) = frame else { return Ok(StreamEnd::Remote) };
                match frame.context("depth stream read")? {
                    Message::Text(text) => {
                        if let Some(frame) = parse_depth_frame(&text)? {
                            buffered.push(frame);
                        }
                    }
                    Message::Ping(payload) => { let _ = write.send(Message::Pong(payload)).await; }
                    Message::Close(_) => return Ok(StreamEnd::Remote),
                    _ => {}
                }
            }
        }
    };

    let mut last_id = snapshot.last_update_id;
    *emit_seq += 1;
    let snapshot_event = CanonicalEvent::OrderBookSnapshot {
        bids: parse_levels(&snapshot.bids)?,
        asks: parse_levels(&snapshot.asks)?,
        sequence: Some(*emit_seq),
    };
    if event_tx.send(snapshot_event).await.is_err() {
        return Ok(StreamEnd::Shutdown);
    }

    for frame in buffered {
        if let Some(event) = renumber_frame(frame, &mut last_id, emit_seq)? {
            if event_tx.send(event).await.is_err() {
                return Ok(StreamEnd::Shutdown);
            }
        }
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                // Resync: tear the session down; the caller reconnects and
                // emits a fresh snapshot.
                Some(BookCommand::Resync) => return Ok(StreamEnd::Remote),
                None => return Ok(StreamEnd::Shutdown),
            },
            frame = read.next() => {
                let Some(frame) = frame else { return Ok(StreamEnd::Remote) };
                match frame.context("depth stream read")? {
                    Message::Text(text) => {
                        if let Some(frame) = parse_depth_frame(&text)? {
                            if let Some(event) = renumber_frame(frame, &mut last_id, emit_seq)? {
                                if event_tx.send(event).await.is_err() {
                                    return Ok(StreamEnd::Shutdown);
                                }
                            }
                        }
                    }
                    Message::Ping(payload) => { let _ = write.send(Message::Pong(payload)).await; }
                    Message::Close(_) => return Ok(StreamEnd::Remote),
                    _ => {}
                }
            }
        }
    }
}

fn parse_levels(raw: &[[String; 2]]) -> anyhow::Result<Vec<BookLevel>> {
    raw.iter()
        .map(|[price, qty]| Ok(BookLevel::new(parse_decimal(price)?, parse_decimal(qty)?)))
        .collect()
}

fn parse_depth_frame(text: &str) -> anyhow::Result<Option<DepthFrame>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| anyhow!("bad frame: {e}"))?;
    if value.get("e").and_then(|v| v.as_str()) != Some("depthUpdate") {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| anyhow!("bad depth frame: {e}"))
}

/// Map a venue delta onto the adapter's contiguous canonical sequence.
/// Stale frames collapse to `None`; a forward id gap is an error that
/// forces a re-bootstrap.
fn renumber_frame(
    frame: DepthFrame,
    last_id: &mut u64,
    emit_seq: &mut u64,
) -> anyhow::Result<Option<CanonicalEvent>> {
    if frame.final_id <= *last_id {
        return Ok(None);
    }
    if frame.first_id > *last_id + 1 {
        return Err(anyhow!(
            "depth id gap: expected {}, got {}",
            *last_id + 1,
            frame.first_id
        ));
    }
    *last_id = frame.final_id;
    *emit_seq += 1;

    let mut changes = Vec::with_capacity(frame.bids.len() + frame.asks.len());
    for [price, qty] in &frame.bids {
        changes.push((Side::Buy, parse_decimal(price)?, parse_decimal(qty)?));
    }
    for [price, qty] in &frame.asks {
        changes.push((Side::Sell, parse_decimal(price)?, parse_decimal(qty)?));
    }
    Ok(Some(CanonicalEvent::OrderBookUpdate {
        changes,
        sequence: Some(*emit_seq),
    }))
}

// -------------------------------------------------------------- user feed

async fn run_user_feed(
    ws_url: String,
    api_url: String,
    http: reqwest::Client,
    api_key: String,
    event_tx: mpsc::Sender<CanonicalEvent>,
) {
    let mut delay = Duration::from_secs(1);
    loop {
        match user_session(&ws_url, &api_url, &http, &api_key, &event_tx).await {
            Ok(StreamEnd::Shutdown) => return,
            Ok(StreamEnd::Remote) => {
                delay = Duration::from_secs(1);
            }
            Err(e) => {
                warn!(error = %e, "binance user stream failed; reconnecting");
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                sleep(delay + jitter).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
    }
}

async fn user_session(
    ws_url: &str,
    api_url: &str,
    http: &reqwest::Client,
    api_key: &str,
    event_tx: &mpsc::Sender<CanonicalEvent>,
) -> anyhow::Result<StreamEnd> {
    #[derive(Deserialize)]
    struct ListenKey {
        #[serde(rename = "listenKey")]
        listen_key: String,
    }

    let response = http
        .post(format!("{api_url}/api/v3/userDataStream"))
        .header("X-MBX-APIKEY", api_key)
        .send()
        .await
        .context("listen key request")?;
    let text = response.text().await.context("listen key body")?;
    let listen_key: ListenKey =
        serde_json::from_str(&text).context("listen key parse")?;

    let (ws, _) = connect_async(format!("{}/ws/{}", ws_url, listen_key.listen_key))
        .await
        .context("user stream connect")?;
    info!("binance user stream connected");
    let (mut write, mut read) = ws.split();

    let mut keepalive = interval(LISTEN_KEY_KEEPALIVE);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                let _ = http
                    .put(format!(
                        "{api_url}/api/v3/userDataStream?listenKey={}",
                        listen_key.listen_key
                    ))
                    .header("X-MBX-APIKEY", api_key)
                    .send()
                    .await;
            }
            frame = read.next() => {
                let Some(frame) = frame else { return Ok(StreamEnd::Remote) };
                match frame.context("user stream read")? {
                    Message::Text(text) => {
                        for event in translate_user_frame(&text)? {
                            if event_tx.send(event).await.is_err() {
                                return Ok(StreamEnd::Shutdown);
                            }
                        }
                    }
                    Message::Ping(payload) => { let _ = write.send(Message::Pong(payload)).await; }
                    Message::Close(_) => return Ok(StreamEnd::Remote),
                    _ => {}
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecutionReport {
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "x")]
    exec_type: String,
    #[serde(rename = "X")]
    order_status: String,
    #[serde(rename = "l")]
    last_qty: String,
    #[serde(rename = "L")]
    last_price: String,
    #[serde(rename = "z")]
    cum_qty: String,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "T")]
    transaction_ms: i64,
}

/// Split one `executionReport` frame into canonical one-event-per-effect
/// form. Non-report frames (account position, balance updates) are dropped.
fn translate_user_frame(text: &str) -> anyhow::Result<Vec<CanonicalEvent>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| anyhow!("bad frame: {e}"))?;
    if value.get("e").and_then(|v| v.as_str()) != Some("executionReport") {
        return Ok(vec![]);
    }
    let report: ExecutionReport =
        serde_json::from_value(value).map_err(|e| anyhow!("bad execution report: {e}"))?;

    let side = match report.side.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => return Err(anyhow!("bad side {other:?}")),
    };
    let order_type = if report.order_type == "MARKET" {
        OrderType::Market
    } else {
        OrderType::Limit
    };
    let order_id = report.order_id.to_string();
    let qty = parse_decimal(&report.qty)?;
    let price = parse_decimal(&report.price)?;
    let cum_qty = parse_decimal(&report.cum_qty)?;
    let remaining = (qty - cum_qty).max(Decimal::ZERO);
    let ts = DateTime::from_timestamp_millis(report.transaction_ms)
        .unwrap_or_else(Utc::now);

    let mut events = Vec::new();
    match report.exec_type.as_str() {
        "NEW" => {
            events.push(CanonicalEvent::OrderReceived {
                order_id: order_id.clone(),
                side,
                order_type,
                price: (!price.is_zero()).then_some(price),
                qty,
                ts,
            });
            if order_type == OrderType::Limit {
                events.push(CanonicalEvent::OrderOpen {
                    order_id,
                    side,
                    price,
                    qty,
                    ts,
                });
            }
        }
        "TRADE" => {
            events.push(CanonicalEvent::OrderMatch {
                order_id: order_id.clone(),
                side,
                price: parse_decimal(&report.last_price)?,
                qty: parse_decimal(&report.last_qty)?,
                ts,
            });
            if report.order_status == "FILLED" {
                events.push(CanonicalEvent::OrderDone {
                    order_id,
                    reason: DoneReason::Filled,
                    remaining_qty: Decimal::ZERO,
                    ts,
                });
            }
        }
        "CANCELED" => events.push(CanonicalEvent::OrderDone {
            order_id,
            reason: DoneReason::Cancelled,
            remaining_qty: remaining,
            ts,
        }),
        "REJECTED" => events.push(CanonicalEvent::OrderDone {
            order_id,
            reason: DoneReason::Rejected,
            remaining_qty: remaining,
            ts,
        }),
        "EXPIRED" => events.push(CanonicalEvent::OrderDone {
            order_id,
            reason: DoneReason::Killed,
            remaining_qty: remaining,
            ts,
        }),
        _ => {}
    }
    Ok(events)
}

fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    s.parse::<Decimal>()
        .map_err(|e| anyhow!("bad decimal {s:?}: {e}"))
}
