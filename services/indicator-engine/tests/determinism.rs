//! Determinism tests
//!
//! Identical inputs must produce identical outputs, whether they arrive
//! through backfill or live routing.

use std::sync::Arc;

use indicator_engine::history::InMemoryHistory;
use indicator_engine::sink::NullSink;
use indicator_engine::{ComputationCatalog, InstanceRegistry};
use proptest::prelude::*;
use rust_decimal::Decimal;
use types::events::{Bar, BookSnapshot, MarketEvent, PriceLevel, Side, Trade};
use types::market::{Granularity, MarketContext};
use types::params::Params;
use types::result::ComputationResult;

const STEP: i64 = 60_000;

fn ctx() -> MarketContext {
    MarketContext::new("binance", "BTCUSDT", Granularity::M1)
}

fn bar(i: i64, price: i64) -> Bar {
    let p = Decimal::from(price);
    Bar::new(p, p + Decimal::from(2), p - Decimal::from(2), p, Decimal::from(10), i * STEP, (i + 1) * STEP)
}

fn snapshot(ts: i64, bid: i64, ask: i64) -> BookSnapshot {
    BookSnapshot {
        bids: vec![PriceLevel::new(Decimal::from(99), Decimal::from(bid))],
        asks: vec![PriceLevel::new(Decimal::from(101), Decimal::from(ask))],
        timestamp: ts,
    }
}

fn history(prices: &[i64], trade_offsets: &[i64]) -> (Arc<InMemoryHistory>, Vec<Bar>) {
    let bars: Vec<Bar> = prices.iter().enumerate().map(|(i, &p)| bar(i as i64, p)).collect();
    let history = Arc::new(InMemoryHistory::new());
    history.insert_bars(&ctx(), bars.clone());
    let trades = trade_offsets.iter().enumerate().map(|(n, offset)| {
        let side = if n % 3 == 0 { Side::SELL } else { Side::BUY };
        Trade::new(Decimal::from(100 + (offset % 9)), Decimal::ONE, side, *offset)
    });
    history.insert_trades(&ctx(), trades);
    history.insert_snapshots(
        &ctx(),
        (0..prices.len() as i64).map(|i| snapshot(i * STEP + STEP / 2, 1 + i % 4, 2)),
    );
    (history, bars)
}

fn run(history: Arc<InMemoryHistory>, bars: Vec<Bar>) -> Vec<Vec<ComputationResult>> {
    let registry = InstanceRegistry::new(ComputationCatalog::with_builtins(), history, Arc::new(NullSink));
    let specs = [
        ("sma", Params::new().with("period", 4)),
        ("volume_profile", Params::new().with("lookback", 6).with("bucket_size", 3)),
        ("book_imbalance", Params::new()),
        ("price_zones", Params::new().with("redetect_every", 2)),
    ];
    specs
        .into_iter()
        .map(|(id, params)| {
            let key = registry.activate(&ctx(), id, params, bars.clone()).unwrap();
            registry.results(&key, 500).unwrap()
        })
        .collect()
}

#[test]
fn test_trade_at_bar_close_belongs_to_next_bar() {
    let history = Arc::new(InMemoryHistory::new());
    let bars = vec![bar(0, 100), bar(1, 100)];
    history.insert_trades(&ctx(), vec![Trade::new(Decimal::from(100), Decimal::ONE, Side::BUY, STEP)]);
    let registry = InstanceRegistry::new(ComputationCatalog::with_builtins(), history, Arc::new(NullSink));
    let key = registry.activate(&ctx(), "volume_profile", Params::new(), bars).unwrap();

    let results = registry.results(&key, 10).unwrap();
    assert_eq!(results[0].value("bar_trades"), Some(Decimal::ZERO));
    assert_eq!(results[1].value("bar_trades"), Some(Decimal::ONE));
}

proptest! {
    #[test]
    fn prop_backfill_is_deterministic(
        prices in proptest::collection::vec(90i64..110, 1..40),
        offsets in proptest::collection::vec(0i64..(40 * STEP), 0..80),
    ) {
        let mut offsets = offsets;
        offsets.sort_unstable();
        let (a, bars_a) = history(&prices, &offsets);
        let (b, bars_b) = history(&prices, &offsets);
        prop_assert_eq!(run(a, bars_a), run(b, bars_b));
    }

    #[test]
    fn prop_live_routing_matches_backfill(
        prices in proptest::collection::vec(90i64..110, 2..30),
        split in 1usize..29,
    ) {
        let split = split.min(prices.len() - 1);
        let bars: Vec<Bar> = prices.iter().enumerate().map(|(i, &p)| bar(i as i64, p)).collect();
        let params = Params::new().with("period", 3);

        let full = InstanceRegistry::new(
            ComputationCatalog::with_builtins(),
            Arc::new(InMemoryHistory::new()),
            Arc::new(NullSink),
        );
        let full_key = full.activate(&ctx(), "sma", params.clone(), bars.clone()).unwrap();

        let live = InstanceRegistry::new(
            ComputationCatalog::with_builtins(),
            Arc::new(InMemoryHistory::new()),
            Arc::new(NullSink),
        );
        let live_key = live.activate(&ctx(), "sma", params, bars[..split].to_vec()).unwrap();
        for bar in &bars[split..] {
            live.route(&MarketEvent::bar(ctx(), bar.clone()));
        }

        prop_assert_eq!(full.results(&full_key, 500).unwrap(), live.results(&live_key, 500).unwrap());
    }
}
