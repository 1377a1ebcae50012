//! Backfill initializer
//!
//! Reconstructs an instance's state from history. The caller supplies the
//! bars; trades and book snapshots are fetched only for the kinds the
//! computation consumes and only over the span the bars cover. All streams
//! are merged chronologically and fed through `Instance::apply`, the same
//! dispatch live routing uses, so the boundary reset after each closed bar
//! happens identically on every path.
//!
//! The initializer never fabricates events: a bar with no trades in its
//! span simply reaches the computation with empty sub-bar state, and trade
//! history shorter than bar history is not an error.

use std::ops::Range;
use std::time::Instant;

use tracing::debug;
use types::errors::{ComputationError, HistoryError};
use types::events::{Bar, EventKind, EventKindSet, MarketEvent};
use types::market::MarketContext;

use crate::feed::EventFeed;
use crate::history::{HistoricalDataSource, HistoryWindow};
use crate::instance::Instance;
use crate::merger::ChronologicalMerger;

/// Summary of one backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub events: usize,
    pub bars: usize,
    pub trades: usize,
    pub snapshots: usize,
    pub elapsed_us: u128,
}

pub struct BackfillInitializer<'a> {
    history: &'a dyn HistoricalDataSource,
}

impl<'a> BackfillInitializer<'a> {
    pub fn new(history: &'a dyn HistoricalDataSource) -> Self {
        Self { history }
    }

    /// Merge `bars` with the trade and snapshot history they span.
    pub fn build_feed(
        &self,
        context: &MarketContext,
        required: EventKindSet,
        bars: Vec<Bar>,
    ) -> Result<(EventFeed, BackfillReport), HistoryError> {
        let started = Instant::now();
        let mut merger = ChronologicalMerger::new();
        let mut report = BackfillReport {
            events: 0,
            bars: bars.len(),
            trades: 0,
            snapshots: 0,
            elapsed_us: 0,
        };

        let span = bar_span(&bars);
        if required.contains(EventKind::Bar) {
            merger.push_stream(bars.into_iter().map(|b| MarketEvent::bar(context.clone(), b)).collect());
        }

        if let Some(window) = span {
            if required.contains(EventKind::Trade) {
                let trades = self.history.trades(context, window)?;
                report.trades = trades.len();
                merger.push_stream(
                    trades
                        .into_iter()
                        .map(|t| MarketEvent::trade(context.clone(), t))
                        .collect(),
                );
            }
            if required.contains(EventKind::BookSnapshot) {
                let snapshots = self.history.book_snapshots(context, window)?;
                report.snapshots = snapshots.len();
                merger.push_stream(
                    snapshots
                        .into_iter()
                        .map(|s| MarketEvent::book_snapshot(context.clone(), s))
                        .collect(),
                );
            }
        }

        let feed = EventFeed::new(merger.merge());
        report.events = feed.len();
        report.elapsed_us = started.elapsed().as_micros();
        debug!(
            context = %context,
            bars = report.bars,
            trades = report.trades,
            snapshots = report.snapshots,
            "Backfill feed merged"
        );
        Ok((feed, report))
    }
}

/// `[first open, last close)` of a bar series.
fn bar_span(bars: &[Bar]) -> Option<HistoryWindow> {
    let first = bars.first()?;
    let last = bars.last()?;
    Some(HistoryWindow::between(first.open_time, last.close_time))
}

/// Apply `range` of `feed` to `instance`, pairing bars with their snapshot.
///
/// Returns the number of events the instance consumed.
pub fn apply_feed(
    instance: &mut Instance,
    feed: &EventFeed,
    range: Range<usize>,
) -> Result<usize, ComputationError> {
    let mut consumed = 0;
    for index in range {
        let Some(event) = feed.get(index) else {
            break;
        };
        if !instance.wants(event.kind()) {
            continue;
        }
        instance.apply(event, feed.lookahead_for(index))?;
        consumed += 1;
    }
    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use rust_decimal::Decimal;
    use types::events::{BookSnapshot, Side, Trade};
    use types::market::Granularity;

    fn ctx() -> MarketContext {
        MarketContext::new("binance", "BTCUSDT", Granularity::M1)
    }

    fn bars(n: i64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::flat(Decimal::from(100), i * 60_000, (i + 1) * 60_000))
            .collect()
    }

    fn history() -> InMemoryHistory {
        let history = InMemoryHistory::new();
        history.insert_trades(
            &ctx(),
            vec![
                Trade::new(Decimal::from(100), Decimal::ONE, Side::BUY, 30_000),
                Trade::new(Decimal::from(100), Decimal::ONE, Side::SELL, 90_000),
                // Outside the bar span, never fetched.
                Trade::new(Decimal::from(100), Decimal::ONE, Side::SELL, 500_000),
            ],
        );
        history.insert_snapshots(
            &ctx(),
            vec![BookSnapshot {
                bids: vec![],
                asks: vec![],
                timestamp: 60_000,
            }],
        );
        history
    }

    #[test]
    fn test_feed_only_fetches_required_kinds() {
        let history = history();
        let initializer = BackfillInitializer::new(&history);

        let (feed, report) = initializer
            .build_feed(&ctx(), EventKindSet::BARS, bars(2))
            .unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(report.trades, 0);

        let required = EventKindSet::of(&[EventKind::Bar, EventKind::Trade, EventKind::BookSnapshot]);
        let (feed, report) = initializer.build_feed(&ctx(), required, bars(2)).unwrap();
        assert_eq!(report.trades, 2);
        assert_eq!(report.snapshots, 1);
        let kinds: Vec<EventKind> = feed.events().iter().map(MarketEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Trade,
                EventKind::Bar,
                EventKind::BookSnapshot,
                EventKind::Trade,
                EventKind::Bar,
            ]
        );
    }

    #[test]
    fn test_no_bars_means_empty_feed() {
        let history = history();
        let required = EventKindSet::of(&[EventKind::Bar, EventKind::Trade]);
        let (feed, report) = BackfillInitializer::new(&history)
            .build_feed(&ctx(), required, Vec::new())
            .unwrap();
        assert!(feed.is_empty());
        assert_eq!(report.events, 0);
    }
}
