//! Coinbase venue adapter.
//!
//! Inbound: one websocket carrying the public `level2` book channel (full
//! snapshot on subscribe, then deltas) plus the authenticated `user` channel,
//! which already emits one message per effect (`received`/`open`/`match`/
//! `done`). Outbound: signed REST (HMAC-SHA256 over
//! `timestamp + method + path + body`, base64, with passphrase header).

use crate::config::VenueCredentials;
use crate::feed::{CanonicalEvent, DoneReason};
use crate::model::{BookLevel, OrderType, Pair, Price, ProductInfo, Qty, Side};
use crate::strategy::fees::FeeSchedule;
use crate::venue::{OrderFlags, PlacedOrder, VenueAdapter, VenueError};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const API_URL: &str = "https://api.exchange.coinbase.com";
const WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const REST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const RATE_LIMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default)]
struct Subscriptions {
    book: Option<Pair>,
    user: Option<Pair>,
}

impl Subscriptions {
    fn is_empty(&self) -> bool {
        self.book.is_none() && self.user.is_none()
    }
}

#[derive(Debug)]
enum WorkerCommand {
    Resubscribe,
}

enum StreamEnd {
    Shutdown,
    Remote,
}

pub struct CoinbaseAdapter {
    creds: VenueCredentials,
    http: reqwest::Client,
    api_url: String,
    ws_url: String,
    subs: Arc<Mutex<Subscriptions>>,
    event_rx: Option<mpsc::Receiver<CanonicalEvent>>,
    cmd_tx: Option<mpsc::Sender<WorkerCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl CoinbaseAdapter {
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
            subs: Arc::new(Mutex::new(Subscriptions::default())),
            event_rx: None,
            cmd_tx: None,
            worker: None,
        }
    }

    fn product_id(pair: &Pair) -> String {
        format!("{}-{}", pair.base, pair.quote)
    }

    fn signal_worker(&self) -> Result<(), VenueError> {
        let tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| VenueError::transport("adapter not connected"))?;
        tx.try_send(WorkerCommand::Resubscribe)
            .map_err(|_| VenueError::transport("websocket worker unavailable"))
    }

    // ---------------------------------------------------------------- REST

    fn sign_request(
        secret: &str,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, VenueError> {
        let secret_bytes = BASE64
            .decode(secret)
            .map_err(|e| VenueError::Authentication(format!("bad api secret: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| VenueError::Authentication(format!("hmac key error: {e}")))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, String), VenueError> {
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let timestamp = Utc::now().timestamp();
            let signature = Self::sign_request(
                &self.creds.api_secret,
                timestamp,
                method.as_str(),
                path,
                &body_str,
            )?;

            let url = format!("{}{}", self.api_url, path);
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("CB-ACCESS-KEY", &self.creds.api_key)
                .header("CB-ACCESS-SIGN", signature)
                .header("CB-ACCESS-TIMESTAMP", timestamp.to_string())
                .header(
                    "CB-ACCESS-PASSPHRASE",
                    self.creds.passphrase.clone().unwrap_or_default(),
                )
                .header("Content-Type", "application/json");
            if !body_str.is_empty() {
                request = request.body(body_str.clone());
            }

            let response = request.send().await.map_err(VenueError::transport)?;
            let status = response.status();
            let text = response.text().await.map_err(VenueError::transport)?;

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < RATE_LIMIT_ATTEMPTS {
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
            message: String,
        }
        let message = serde_json::from_str::<ApiError>(text)
            .map(|e| e.message)
            .unwrap_or_else(|_| text.to_string());
        let lowered = message.to_lowercase();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            VenueError::Authentication(message)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            VenueError::RateLimited
        } else if status == StatusCode::NOT_FOUND || lowered.contains("order not found") {
            VenueError::UnknownOrder(message)
        } else if lowered.contains("post only") {
            VenueError::PostOnlyRejected
        } else if lowered.contains("insufficient funds") {
            VenueError::InsufficientFunds
        } else {
            VenueError::Protocol(format!("{status}: {message}"))
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
        let mut body = serde_json::json!({
            "client_oid": uuid::Uuid::new_v4().to_string(),
            "product_id": Self::product_id(pair),
            "side": side.as_str(),
            "size": qty.to_string(),
        });
        match order_type {
            OrderType::Limit => {
                let price = price.ok_or_else(|| {
                    VenueError::Protocol("limit order requires a price".to_string())
                })?;
                body["type"] = "limit".into();
                body["price"] = price.to_string().into();
                body["post_only"] = flags.post_only.into();
                if flags.immediate_or_cancel {
                    body["time_in_force"] = "IOC".into();
                } else if flags.fill_or_kill {
                    body["time_in_force"] = "FOK".into();
                } else {
                    body["time_in_force"] = "GTC".into();
                }
            }
            OrderType::Market => {
                body["type"] = "market".into();
            }
        }

        let (status, text) = self.send_signed(Method::POST, "/orders", Some(body)).await?;
        if !status.is_success() {
            return Err(Self::rest_error(status, &text));
        }

        #[derive(Deserialize)]
        struct OrderResponse {
            id: String,
        }
        let ack: OrderResponse = serde_json::from_str(&text)
            .map_err(|e| VenueError::protocol(format!("order response: {e}")))?;

        Ok(PlacedOrder {
            order_id: ack.id,
            side,
            order_type,
            price,
            qty,
        })
    }
}

#[async_trait]
impl VenueAdapter for CoinbaseAdapter {
    fn name(&self) -> &str {
        "coinbase"
    }

    async fn connect(&mut self) -> Result<(), VenueError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        self.event_rx = Some(event_rx);
        self.cmd_tx = Some(cmd_tx);

        let ws_url = self.ws_url.clone();
        let creds = self.creds.clone();
        let subs = self.subs.clone();
        self.worker = Some(tokio::spawn(async move {
            run_ws(ws_url, creds, subs, event_tx, cmd_rx).await;
        }));
        info!("coinbase adapter connected");
        Ok(())
    }

    async fn subscribe_orderbook(&mut self, pair: &Pair) -> Result<(), VenueError> {
        self.subs.lock().book = Some(pair.clone());
        self.signal_worker()
    }

    async fn subscribe_user(&mut self, pair: &Pair) -> Result<(), VenueError> {
        self.subs.lock().user = Some(pair.clone());
        self.signal_worker()
    }

    fn events(&mut self) -> mpsc::Receiver<CanonicalEvent> {
        self.event_rx.take().unwrap_or_else(|| {
            // Second take: hand back an already-closed stream.
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
        let path = format!(
            "/orders/{}?product_id={}",
            order_id,
            Self::product_id(pair)
        );
        let (status, text) = self.send_signed(Method::DELETE, &path, None).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::rest_error(status, &text))
        }
    }

    async fn get_wallet(&self, asset: &str) -> Result<Decimal, VenueError> {
        let (status, text) = self.send_signed(Method::GET, "/accounts", None).await?;
        if !status.is_success() {
            return Err(Self::rest_error(status, &text));
        }

        #[derive(Deserialize)]
        struct Account {
            currency: String,
            balance: String,
        }
        let accounts: Vec<Account> = serde_json::from_str(&text)
            .map_err(|e| VenueError::protocol(format!("accounts response: {e}")))?;
        let balance = accounts
            .iter()
            .find(|a| a.currency.eq_ignore_ascii_case(asset))
            .map(|a| a.balance.parse::<Decimal>())
            .transpose()
            .map_err(|e| VenueError::protocol(format!("balance value: {e}")))?
            .unwrap_or(Decimal::ZERO);
        Ok(balance)
    }

    async fn get_products(&self, pair: &Pair) -> Result<ProductInfo, VenueError> {
        let path = format!("/products/{}", Self::product_id(pair));
        let (status, text) = self.send_signed(Method::GET, &path, None).await?;
        if !status.is_success() {
            return Err(Self::rest_error(status, &text));
        }

        #[derive(Deserialize)]
        struct Product {
            quote_increment: String,
            base_increment: String,
            min_market_funds: String,
        }
        let product: Product = serde_json::from_str(&text)
            .map_err(|e| VenueError::protocol(format!("product response: {e}")))?;
        let parse = |s: &str| {
            s.parse::<Decimal>()
                .map_err(|e| VenueError::protocol(format!("product field: {e}")))
        };
        Ok(ProductInfo {
            price_tick: parse(&product.quote_increment)?,
            size_tick: parse(&product.base_increment)?,
            min_notional: parse(&product.min_market_funds)?,
        })
    }

    async fn get_fees(&self) -> Result<FeeSchedule, VenueError> {
        let (status, text) = self.send_signed(Method::GET, "/fees", None).await?;
        if !status.is_success() {
            return Err(Self::rest_error(status, &text));
        }

        #[derive(Deserialize)]
        struct Fees {
            maker_fee_rate: String,
            taker_fee_rate: String,
        }
        let fees: Fees = serde_json::from_str(&text)
            .map_err(|e| VenueError::protocol(format!("fees response: {e}")))?;
        let parse = |s: &str| {
            s.parse::<Decimal>()
                .map_err(|e| VenueError::protocol(format!("fee rate: {e}")))
        };
        Ok(FeeSchedule::new(
            parse(&fees.maker_fee_rate)?,
            parse(&fees.taker_fee_rate)?,
        ))
    }
}

impl Drop for CoinbaseAdapter {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

// ------------------------------------------------------------- websocket

async fn run_ws(
    ws_url: String,
    creds: VenueCredentials,
    subs: Arc<Mutex<Subscriptions>>,
    event_tx: mpsc::Sender<CanonicalEvent>,
    mut cmd_rx: mpsc::Receiver<WorkerCommand>,
) {
    let mut delay = Duration::from_secs(1);
    loop {
        // Wait for at least one subscription before dialing.
        while subs.lock().is_empty() {
            match cmd_rx.recv().await {
                Some(_) => {}
                None => return,
            }
        }

        match connect_and_stream(&ws_url, &creds, &subs, &event_tx, &mut cmd_rx).await {
            Ok(StreamEnd::Shutdown) => return,
            Ok(StreamEnd::Remote) => {
                // Clean close; reconnecting resubscribes and yields a fresh
                // snapshot.
                let _ = event_tx
                    .send(CanonicalEvent::Disconnected {
                        reason: "server closed connection".to_string(),
                    })
                    .await;
                delay = Duration::from_secs(1);
            }
            Err(e) => {
                warn!(error = %e, "coinbase websocket disconnected; reconnecting");
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

async fn connect_and_stream(
    ws_url: &str,
    creds: &VenueCredentials,
    subs: &Arc<Mutex<Subscriptions>>,
    event_tx: &mpsc::Sender<CanonicalEvent>,
    cmd_rx: &mut mpsc::Receiver<WorkerCommand>,
) -> anyhow::Result<StreamEnd> {
    let (ws, _) = connect_async(ws_url).await.context("websocket connect")?;
    info!("coinbase websocket connected");
    let (mut write, mut read) = ws.split();

    let sub_msg = subscribe_message(creds, &subs.lock().clone())?;
    write
        .send(Message::Text(sub_msg))
        .await
        .context("send subscribe")?;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(WorkerCommand::Resubscribe) => {
                    let sub_msg = subscribe_message(creds, &subs.lock().clone())?;
                    write.send(Message::Text(sub_msg)).await.context("resubscribe")?;
                }
                None => return Ok(StreamEnd::Shutdown),
            },
            frame = read.next() => {
                let Some(frame) = frame else {
                    return Ok(StreamEnd::Remote);
                };
                match frame.context("websocket read")? {
                    Message::Text(text) => {
                        for event in translate(&text)? {
                            if event_tx.send(event).await.is_err() {
                                return Ok(StreamEnd::Shutdown);
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(frame) => {
                        debug!(?frame, "coinbase websocket close frame");
                        return Ok(StreamEnd::Remote);
                    }
                    _ => {}
                }
            }
        }
    }
}

fn subscribe_message(
    creds: &VenueCredentials,
    subs: &Subscriptions,
) -> anyhow::Result<String> {
    let mut channels: Vec<serde_json::Value> = Vec::new();
    let mut needs_auth = false;

    if let Some(pair) = &subs.book {
        let id = CoinbaseAdapter::product_id(pair);
        channels.push(serde_json::json!({"name": "level2", "product_ids": [id]}));
        let id = CoinbaseAdapter::product_id(pair);
        channels.push(serde_json::json!({"name": "heartbeat", "product_ids": [id]}));
    }
    if let Some(pair) = &subs.user {
        let id = CoinbaseAdapter::product_id(pair);
        channels.push(serde_json::json!({"name": "user", "product_ids": [id]}));
        needs_auth = true;
    }

    let mut msg = serde_json::json!({
        "type": "subscribe",
        "channels": channels,
    });

    if needs_auth {
        let timestamp = Utc::now().timestamp();
        let signature = CoinbaseAdapter::sign_request(
            &creds.api_secret,
            timestamp,
            "GET",
            "/users/self/verify",
            "",
        )
        .map_err(|e| anyhow!("websocket auth: {e}"))?;
        msg["key"] = creds.api_key.clone().into();
        msg["signature"] = signature.into();
        msg["timestamp"] = timestamp.to_string().into();
        msg["passphrase"] = creds.passphrase.clone().unwrap_or_default().into();
    }

    Ok(msg.to_string())
}

// ----------------------------------------------------- message translation

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WsMessage {
    Snapshot {
        bids: Vec<[String; 2]>,
        asks: Vec<[String; 2]>,
        #[serde(default)]
        sequence: Option<u64>,
    },
    L2update {
        changes: Vec<[String; 3]>,
        #[serde(default)]
        sequence: Option<u64>,
    },
    Received {
        order_id: String,
        side: String,
        order_type: String,
        #[serde(default)]
        price: Option<String>,
        #[serde(default)]
        size: Option<String>,
        #[serde(default)]
        funds: Option<String>,
        #[serde(default)]
        time: Option<String>,
    },
    Open {
        order_id: String,
        side: String,
        price: String,
        remaining_size: String,
        #[serde(default)]
        time: Option<String>,
    },
    Match {
        maker_order_id: String,
        taker_order_id: String,
        side: String,
        price: String,
        size: String,
        #[serde(default)]
        time: Option<String>,
    },
    Done {
        order_id: String,
        reason: String,
        #[serde(default)]
        remaining_size: Option<String>,
        #[serde(default)]
        time: Option<String>,
    },
    Heartbeat {},
    Subscriptions {
        channels: Vec<ChannelAck>,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ChannelAck {
    name: String,
}

fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    s.parse::<Decimal>()
        .map_err(|e| anyhow!("bad decimal {s:?}: {e}"))
}

fn parse_side(s: &str) -> anyhow::Result<Side> {
    match s {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(anyhow!("bad side {other:?}")),
    }
}

fn parse_time(s: Option<&str>) -> DateTime<Utc> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Translate one websocket frame into canonical events. A parse failure is
/// a protocol error for the session; the caller reconnects.
fn translate(text: &str) -> anyhow::Result<Vec<CanonicalEvent>> {
    let msg: WsMessage = serde_json::from_str(text).map_err(|e| anyhow!("bad frame: {e}"))?;

    let events = match msg {
        WsMessage::Snapshot { bids, asks, sequence } => {
            let parse_levels = |raw: Vec<[String; 2]>| -> anyhow::Result<Vec<BookLevel>> {
                raw.iter()
                    .map(|[price, qty]| {
                        Ok(BookLevel::new(parse_decimal(price)?, parse_decimal(qty)?))
                    })
                    .collect()
            };
            vec![CanonicalEvent::OrderBookSnapshot {
                bids: parse_levels(bids)?,
                asks: parse_levels(asks)?,
                sequence,
            }]
        }
        WsMessage::L2update { changes, sequence } => {
            let changes = changes
                .iter()
                .map(|[side, price, qty]| {
                    Ok((parse_side(side)?, parse_decimal(price)?, parse_decimal(qty)?))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            vec![CanonicalEvent::OrderBookUpdate { changes, sequence }]
        }
        WsMessage::Received {
            order_id,
            side,
            order_type,
            price,
            size,
            funds,
            time,
        } => {
            let qty = match (&size, &funds) {
                (Some(size), _) => parse_decimal(size)?,
                (None, Some(funds)) => parse_decimal(funds)?,
                (None, None) => Decimal::ZERO,
            };
            vec![CanonicalEvent::OrderReceived {
                order_id,
                side: parse_side(&side)?,
                order_type: if order_type == "market" {
                    OrderType::Market
                } else {
                    OrderType::Limit
                },
                price: price.as_deref().map(parse_decimal).transpose()?,
                qty,
                ts: parse_time(time.as_deref()),
            }]
        }
        WsMessage::Open {
            order_id,
            side,
            price,
            remaining_size,
            time,
        } => vec![CanonicalEvent::OrderOpen {
            order_id,
            side: parse_side(&side)?,
            price: parse_decimal(&price)?,
            qty: parse_decimal(&remaining_size)?,
            ts: parse_time(time.as_deref()),
        }],
        WsMessage::Match {
            maker_order_id,
            taker_order_id,
            side,
            price,
            size,
            time,
        } => {
            // The venue does not say which id is ours; emit one event per
            // affected id and let the engine drop unknown orders.
            let side = parse_side(&side)?;
            let price = parse_decimal(&price)?;
            let qty = parse_decimal(&size)?;
            let ts = parse_time(time.as_deref());
            vec![
                CanonicalEvent::OrderMatch {
                    order_id: maker_order_id,
                    side,
                    price,
                    qty,
                    ts,
                },
                CanonicalEvent::OrderMatch {
                    order_id: taker_order_id,
                    side: side.opposite(),
                    price,
                    qty,
                    ts,
                },
            ]
        }
        WsMessage::Done {
            order_id,
            reason,
            remaining_size,
            time,
        } => {
            let reason = match reason.as_str() {
                "filled" => DoneReason::Filled,
                "canceled" | "cancelled" => DoneReason::Cancelled,
                "rejected" => DoneReason::Rejected,
                _ => DoneReason::Killed,
            };
            vec![CanonicalEvent::OrderDone {
                order_id,
                reason,
                remaining_qty: remaining_size
                    .as_deref()
                    .map(parse_decimal)
                    .transpose()?
                    .unwrap_or(Decimal::ZERO),
                ts: parse_time(time.as_deref()),
            }]
        }
        WsMessage::Heartbeat {} => vec![CanonicalEvent::Heartbeat],
        WsMessage::Subscriptions { channels } => vec![CanonicalEvent::Subscriptions {
            channels: channels.into_iter().map(|c| c.name).collect(),
        }],
        WsMessage::Error { message } => return Err(anyhow!("venue error: {message}")),
        WsMessage::Unknown => vec![],
    };

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn product_id_spelling() {
        let pair = Pair::new("REP", "USD");
        assert_eq!(CoinbaseAdapter::product_id(&pair), "REP-USD");
    }

    #[test]
    fn translates_snapshot() {
        let text = r#"{"type":"snapshot","product_id":"REP-USD",
            "bids":[["10.00","5"],["9.99","2"]],
            "asks":[["10.05","3"]]}"#;
        let events = translate(text).unwrap();
        match &events[..] {
            [CanonicalEvent::OrderBookSnapshot { bids, asks, sequence }] => {
                assert_eq!(bids.len(), 2);
                assert_eq!(bids[0], BookLevel::new(dec!(10.00), dec!(5)));
                assert_eq!(asks[0], BookLevel::new(dec!(10.05), dec!(3)));
                assert_eq!(*sequence, None);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn translates_l2update() {
        let text = r#"{"type":"l2update","product_id":"REP-USD",
            "changes":[["buy","10.01","3"],["sell","10.04","0"]],"sequence":42}"#;
        let events = translate(text).unwrap();
        match &events[..] {
            [CanonicalEvent::OrderBookUpdate { changes, sequence }] => {
                assert_eq!(
                    changes,
                    &vec![
                        (Side::Buy, dec!(10.01), dec!(3)),
                        (Side::Sell, dec!(10.04), dec!(0)),
                    ]
                );
                assert_eq!(*sequence, Some(42));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn splits_match_per_order_id() {
        let text = r#"{"type":"match","trade_id":1,"maker_order_id":"m-1",
            "taker_order_id":"t-1","side":"sell","price":"10.05","size":"2.4",
            "time":"2024-03-01T12:00:00Z"}"#;
        let events = translate(text).unwrap();
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (
                CanonicalEvent::OrderMatch { order_id: maker, side: maker_side, .. },
                CanonicalEvent::OrderMatch { order_id: taker, side: taker_side, .. },
            ) => {
                assert_eq!(maker, "m-1");
                assert_eq!(taker, "t-1");
                assert_eq!(*maker_side, Side::Sell);
                assert_eq!(*taker_side, Side::Buy);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn translates_done_with_remaining() {
        let text = r#"{"type":"done","order_id":"o-1","reason":"canceled",
            "remaining_size":"2.6","time":"2024-03-01T12:00:01Z"}"#;
        let events = translate(text).unwrap();
        match &events[..] {
            [CanonicalEvent::OrderDone { order_id, reason, remaining_qty, .. }] => {
                assert_eq!(order_id, "o-1");
                assert_eq!(*reason, DoneReason::Cancelled);
                assert_eq!(*remaining_qty, dec!(2.6));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_is_protocol_error() {
        assert!(translate("not json").is_err());
        assert!(translate(r#"{"type":"l2update","changes":[["buy","x","1"]]}"#).is_err());
    }

    #[test]
    fn unknown_message_type_ignored() {
        let events = translate(r#"{"type":"status","products":[]}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn venue_error_frame_ends_session() {
        assert!(translate(r#"{"type":"error","message":"Authentication Failed"}"#).is_err());
    }

    #[test]
    fn signature_is_deterministic() {
        let secret = BASE64.encode(b"super-secret-key");
        let sig1 =
            CoinbaseAdapter::sign_request(&secret, 1700000000, "POST", "/orders", "{}").unwrap();
        let sig2 =
            CoinbaseAdapter::sign_request(&secret, 1700000000, "POST", "/orders", "{}").unwrap();
        assert_eq!(sig1, sig2);
        let sig3 =
            CoinbaseAdapter::sign_request(&secret, 1700000001, "POST", "/orders", "{}").unwrap();
        assert_ne!(sig1, sig3);
    }

    #[test]
    fn rest_error_mapping() {
        let err = CoinbaseAdapter::rest_error(
            StatusCode::BAD_REQUEST,
            r#"{"message":"Post only mode"}"#,
        );
        assert!(matches!(err, VenueError::PostOnlyRejected));

        let err = CoinbaseAdapter::rest_error(
            StatusCode::BAD_REQUEST,
            r#"{"message":"Insufficient funds"}"#,
        );
        assert!(matches!(err, VenueError::InsufficientFunds));

        let err = CoinbaseAdapter::rest_error(
            StatusCode::NOT_FOUND,
            r#"{"message":"order not found"}"#,
        );
        assert!(matches!(err, VenueError::UnknownOrder(_)));

        let err = CoinbaseAdapter::rest_error(StatusCode::UNAUTHORIZED, r#"{"message":"bad"}"#);
        assert!(matches!(err, VenueError::Authentication(_)));
    }
}
