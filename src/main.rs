//! crossbot entry point: wire credentials, venues, and the engine together.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbot::config::{load_credentials, Cli, VenueCredentials};
use crossbot::engine::trade_log::TradeLog;
use crossbot::engine::{Engine, EngineConfig, VenueSetup};
use crossbot::model::Pair;
use crossbot::venue::binance::BinanceAdapter;
use crossbot::venue::coinbase::CoinbaseAdapter;
use crossbot::venue::VenueAdapter;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn build_adapter(name: &str, creds: VenueCredentials) -> Result<Box<dyn VenueAdapter>> {
    match name {
        "coinbase" => Ok(Box::new(CoinbaseAdapter::new(creds))),
        "binance" => Ok(Box::new(BinanceAdapter::new(creds))),
        other => bail!("unknown venue {other:?} (supported: coinbase, binance)"),
    }
}

async fn setup_venue(
    name: &str,
    creds: VenueCredentials,
    pair: &Pair,
    base_override: Option<Decimal>,
    quote_override: Option<Decimal>,
) -> Result<VenueSetup> {
    let mut adapter = build_adapter(name, creds)?;

    adapter
        .connect()
        .await
        .with_context(|| format!("connecting to {name}"))?;
    adapter
        .subscribe_orderbook(pair)
        .await
        .with_context(|| format!("subscribing {name} order book"))?;
    adapter
        .subscribe_user(pair)
        .await
        .with_context(|| format!("subscribing {name} user channel"))?;

    let product = adapter
        .get_products(pair)
        .await
        .with_context(|| format!("querying {name} product info"))?;
    let fees = adapter
        .get_fees()
        .await
        .with_context(|| format!("querying {name} fees"))?;

    let base_balance = match base_override {
        Some(balance) => balance,
        None => adapter
            .get_wallet(&pair.base)
            .await
            .with_context(|| format!("querying {name} {} wallet", pair.base))?,
    };
    let quote_balance = match quote_override {
        Some(balance) => balance,
        None => adapter
            .get_wallet(&pair.quote)
            .await
            .with_context(|| format!("querying {name} {} wallet", pair.quote))?,
    };

    info!(
        venue = name,
        price_tick = %product.price_tick,
        size_tick = %product.size_tick,
        min_notional = %product.min_notional,
        maker_fee = %fees.maker,
        taker_fee = %fees.taker,
        base_balance = %base_balance,
        quote_balance = %quote_balance,
        "venue ready"
    );

    Ok(VenueSetup {
        name: name.to_string(),
        adapter,
        product,
        fees,
        base_balance,
        quote_balance,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    cli.validate()?;
    let pair = cli.parsed_pair()?;
    let credentials = load_credentials(&cli.auth_file)?;

    let mut venues = Vec::with_capacity(cli.venues.len());
    for name in &cli.venues {
        let creds = credentials
            .get(name)
            .cloned()
            .with_context(|| format!("no credentials for venue {name:?}"))?;
        let setup = setup_venue(name, creds, &pair, cli.base_balance, cli.quote_balance).await?;
        venues.push(setup);
    }

    let trade_log = TradeLog::open(&cli.trade_log)
        .with_context(|| format!("opening trade log {}", cli.trade_log.display()))?;

    let mut engine = Engine::new(EngineConfig::new(pair), venues, trade_log);
    let stats = engine
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!(
        events = stats.events,
        evaluations = stats.evaluations,
        orders_placed = stats.orders_placed,
        cancels = stats.cancels,
        round_trips = stats.round_trips,
        "done"
    );
    Ok(())
}
