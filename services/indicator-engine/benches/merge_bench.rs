use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indicator_engine::history::InMemoryHistory;
use indicator_engine::merger::merge_streams;
use indicator_engine::sink::NullSink;
use indicator_engine::{ComputationCatalog, InstanceRegistry};
use rust_decimal::Decimal;
use types::events::{Bar, MarketEvent, Side, Trade};
use types::market::{Granularity, MarketContext};
use types::params::Params;

const STEP: i64 = 60_000;

fn ctx() -> MarketContext {
    MarketContext::new("binance", "BTCUSDT", Granularity::M1)
}

fn bars(n: i64) -> Vec<Bar> {
    (0..n)
        .map(|i| Bar::flat(Decimal::from(100 + i % 13), i * STEP, (i + 1) * STEP))
        .collect()
}

fn trades(n: i64, per_bar: i64) -> Vec<Trade> {
    (0..n * per_bar)
        .map(|i| {
            let side = if i % 2 == 0 { Side::BUY } else { Side::SELL };
            Trade::new(Decimal::from(100 + i % 17), Decimal::ONE, side, i * STEP / per_bar)
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_streams");
    for n in [1_000i64, 10_000] {
        let bar_events: Vec<MarketEvent> = bars(n).into_iter().map(|b| MarketEvent::bar(ctx(), b)).collect();
        let trade_events: Vec<MarketEvent> = trades(n, 10)
            .into_iter()
            .map(|t| MarketEvent::trade(ctx(), t))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| merge_streams(black_box(vec![bar_events.clone(), trade_events.clone()])))
        });
    }
    group.finish();
}

fn bench_backfill(c: &mut Criterion) {
    let history = Arc::new(InMemoryHistory::new());
    history.insert_bars(&ctx(), bars(5_000));
    history.insert_trades(&ctx(), trades(5_000, 10));
    let registry = InstanceRegistry::new(ComputationCatalog::with_builtins(), history, Arc::new(NullSink));

    c.bench_function("activate_volume_profile_5000_bars", |b| {
        b.iter(|| {
            registry
                .activate_owned(&ctx(), "volume_profile", Params::new().with("lookback", 50), bars(5_000))
                .unwrap()
        })
    });
}

fn bench_route(c: &mut Criterion) {
    let registry = InstanceRegistry::new(
        ComputationCatalog::with_builtins(),
        Arc::new(InMemoryHistory::new()),
        Arc::new(NullSink),
    );
    for period in [5, 10, 20, 50] {
        registry
            .activate(&ctx(), "sma", Params::new().with("period", period), bars(100))
            .unwrap();
    }
    let trade = MarketEvent::trade(ctx(), Trade::new(Decimal::ONE, Decimal::ONE, Side::BUY, 100 * STEP));

    c.bench_function("route_filtered_trade", |b| b.iter(|| registry.route(black_box(&trade))));
}

criterion_group!(benches, bench_merge, bench_backfill, bench_route);
criterion_main!(benches);
