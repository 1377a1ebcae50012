use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicator_engine::replay::ReplayState;
use indicator_engine::sink::{ChannelSink, SinkMessage};
use indicator_engine::{
    ComputationCatalog, ComputationSpec, EngineConfig, HistoryWindow, InMemoryHistory, IndicatorEngine,
    ReplayRequest,
};
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use types::events::{Bar, MarketEvent, Side, Trade};
use types::market::{Granularity, MarketContext};
use types::params::Params;

const BARS: i64 = 120;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting Indicator Engine service");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path).with_context(|| format!("loading config {}", path))?,
        None => EngineConfig::default(),
    };

    let context = MarketContext::new("binance", "BTCUSDT", Granularity::M5);
    let history = Arc::new(InMemoryHistory::new());
    seed_history(&history, &context);

    let sink = Arc::new(ChannelSink::new(config.sink_capacity));
    let mut rx = sink.subscribe();
    let listener = tokio::spawn(async move {
        let (mut results, mut progress) = (0u64, 0u64);
        loop {
            match rx.recv().await {
                Ok(SinkMessage::Result { .. }) => results += 1,
                Ok(SinkMessage::Replay { .. }) => progress += 1,
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Sink listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        (results, progress)
    });

    let engine = IndicatorEngine::new(config, ComputationCatalog::with_builtins(), history, sink)?;

    // Live instances
    let sma = engine.activate(&context, "sma", Params::new().with("period", 20))?;
    let profile = engine.activate(
        &context,
        "volume_profile",
        Params::new().with("lookback", 10).with("bucket_size", 5),
    )?;
    let zones = engine.activate(&context, "price_zones", Params::new())?;
    tracing::info!(sma = %sma, profile = %profile, zones = %zones, "Live instances active");

    let step = Granularity::M5.duration_millis();
    let open = BARS * step;
    let trade = MarketEvent::trade(
        context.clone(),
        Trade::new(price_at(BARS), Decimal::from(3), Side::BUY, open + 1_000),
    );
    let bar = MarketEvent::bar(context.clone(), synthetic_bar(BARS, step));
    for event in [trade, bar] {
        let report = engine.route(&event);
        tracing::info!(
            kind = %event.kind(),
            delivered = report.delivered,
            skipped = report.skipped,
            results = report.results.len(),
            failures = report.failures.len(),
            "Live event routed"
        );
    }

    // Replay of the last 40 bars with private instances
    let request = ReplayRequest::new(context.clone())
        .with_window(HistoryWindow::between((BARS - 40) * step, BARS * step))
        .with_speed(engine.config().replay.max_speed)
        .with_computation(ComputationSpec::new("sma", Params::new().with("period", 10)))
        .with_computation(ComputationSpec::new(
            "volume_profile",
            Params::new().with("lookback", 5).with("bucket_size", 5),
        ));
    let session = engine.replay().create(request)?;
    engine.replay().play(&session)?;

    loop {
        let status = engine.replay().status(&session)?;
        if status.state != ReplayState::Playing {
            tracing::info!(
                state = %status.state,
                cursor = status.cursor,
                total = status.total,
                "Replay finished"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for (key, result) in engine.replay().results(&session)? {
        tracing::info!(key = %key, values = ?result.values, "Replay result");
    }
    engine.replay().stop(&session)?;

    tracing::info!(metrics = ?engine.metrics().export(), "Engine metrics");
    engine.shutdown();
    drop(engine);

    let (results, progress) = listener.await.context("sink listener")?;
    tracing::info!(results, progress, "Sink messages delivered");
    Ok(())
}

fn price_at(i: i64) -> Decimal {
    // Deterministic zig-zag around 100
    let phase = i % 24;
    let offset = if phase < 12 { phase } else { 24 - phase };
    Decimal::from(100 + offset * 2 + i / 10)
}

fn synthetic_bar(i: i64, step: i64) -> Bar {
    let open = price_at(i);
    let close = price_at(i + 1);
    let high = open.max(close) + Decimal::ONE;
    let low = open.min(close) - Decimal::ONE;
    Bar::new(open, high, low, close, Decimal::from(10), i * step, (i + 1) * step)
}

fn seed_history(history: &InMemoryHistory, context: &MarketContext) {
    let step = context.granularity.duration_millis();
    history.insert_bars(context, (0..BARS).map(|i| synthetic_bar(i, step)));
    // Trade history only covers the most recent part of the bar history.
    let trades = (BARS - 30..BARS).flat_map(|i| {
        let side = if i % 2 == 0 { Side::BUY } else { Side::SELL };
        (0..4).map(move |n| Trade::new(price_at(i), Decimal::from(n + 1), side, i * step + n * 30_000))
    });
    history.insert_trades(context, trades);
}
