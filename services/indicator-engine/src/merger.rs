//! Chronological merger
//!
//! K-way merge of individually time-ordered event streams into one sequence
//! ordered by `(timestamp, kind, stream index, position)`. A bar's timestamp
//! is its close time, so at equal timestamps a closing bar is delivered
//! before the trades and snapshots stamped at the same millisecond.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::iter::Peekable;
use std::vec::IntoIter;

use tracing::debug;
use types::events::{EventKind, MarketEvent};

/// Heap ordering key for the head of one stream.
type HeadKey = (i64, EventKind, usize, usize);

#[derive(Default)]
pub struct ChronologicalMerger {
    streams: Vec<Vec<MarketEvent>>,
}

impl ChronologicalMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style stream registration. Stream index is registration order.
    pub fn with_stream(mut self, events: Vec<MarketEvent>) -> Self {
        self.push_stream(events);
        self
    }

    pub fn push_stream(&mut self, mut events: Vec<MarketEvent>) {
        if !is_time_ordered(&events) {
            debug!(events = events.len(), "Stream out of order, sorting before merge");
            events.sort_by_key(MarketEvent::timestamp);
        }
        self.streams.push(events);
    }

    pub fn len(&self) -> usize {
        self.streams.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn merge(self) -> Vec<MarketEvent> {
        let total = self.len();
        let mut heads: Vec<Peekable<IntoIter<MarketEvent>>> = self
            .streams
            .into_iter()
            .map(|s| s.into_iter().peekable())
            .collect();
        let mut positions = vec![0usize; heads.len()];
        let mut heap: BinaryHeap<Reverse<HeadKey>> = BinaryHeap::with_capacity(heads.len());

        for (idx, head) in heads.iter_mut().enumerate() {
            if let Some(event) = head.peek() {
                heap.push(Reverse((event.timestamp(), event.kind(), idx, 0)));
            }
        }

        let mut merged = Vec::with_capacity(total);
        while let Some(Reverse((_, _, idx, _))) = heap.pop() {
            let Some(event) = heads[idx].next() else {
                continue;
            };
            merged.push(event);
            positions[idx] += 1;
            if let Some(next) = heads[idx].peek() {
                heap.push(Reverse((next.timestamp(), next.kind(), idx, positions[idx])));
            }
        }
        merged
    }
}

/// Merge streams given in stream-index order.
pub fn merge_streams(streams: Vec<Vec<MarketEvent>>) -> Vec<MarketEvent> {
    streams
        .into_iter()
        .fold(ChronologicalMerger::new(), ChronologicalMerger::with_stream)
        .merge()
}

fn is_time_ordered(events: &[MarketEvent]) -> bool {
    events.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use types::events::{Bar, BookSnapshot, Side, Trade};
    use types::market::{Granularity, MarketContext};

    fn ctx() -> MarketContext {
        MarketContext::new("binance", "BTCUSDT", Granularity::M1)
    }

    fn bar(close: i64) -> MarketEvent {
        MarketEvent::bar(ctx(), Bar::flat(Decimal::ONE, close - 10, close))
    }

    fn trade(ts: i64) -> MarketEvent {
        MarketEvent::trade(ctx(), Trade::new(Decimal::ONE, Decimal::ONE, Side::BUY, ts))
    }

    fn snapshot(ts: i64) -> MarketEvent {
        MarketEvent::book_snapshot(
            ctx(),
            BookSnapshot {
                bids: vec![],
                asks: vec![],
                timestamp: ts,
            },
        )
    }

    #[test]
    fn test_merge_interleaves_by_timestamp() {
        let merged = ChronologicalMerger::new()
            .with_stream(vec![bar(0), bar(10), bar(20)])
            .with_stream(vec![trade(1), trade(2), trade(11)])
            .with_stream(vec![snapshot(5), snapshot(15)])
            .merge();

        let timestamps: Vec<i64> = merged.iter().map(MarketEvent::timestamp).collect();
        assert_eq!(timestamps, vec![0, 1, 2, 5, 10, 11, 15, 20]);
    }

    #[test]
    fn test_tie_break_by_kind_then_stream() {
        // Trade stream registered first, but a bar closing at 10 still wins.
        let merged = merge_streams(vec![
            vec![trade(10)],
            vec![snapshot(10)],
            vec![bar(10)],
            vec![trade(10)],
        ]);
        let kinds: Vec<EventKind> = merged.iter().map(MarketEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Bar, EventKind::Trade, EventKind::Trade, EventKind::BookSnapshot]
        );
    }

    #[test]
    fn test_equal_timestamps_in_one_stream_keep_position() {
        let first = MarketEvent::trade(ctx(), Trade::new(Decimal::ONE, Decimal::ONE, Side::BUY, 7));
        let second = MarketEvent::trade(ctx(), Trade::new(Decimal::TWO, Decimal::ONE, Side::SELL, 7));
        let merged = merge_streams(vec![vec![first.clone(), second.clone()]]);
        assert_eq!(merged, vec![first, second]);
    }

    #[test]
    fn test_empty_streams() {
        assert!(merge_streams(vec![]).is_empty());
        assert!(merge_streams(vec![vec![], vec![]]).is_empty());
        assert_eq!(merge_streams(vec![vec![], vec![trade(3)]]).len(), 1);
    }

    #[test]
    fn test_unsorted_stream_is_sorted_first() {
        let merged = merge_streams(vec![vec![trade(5), trade(1)], vec![bar(3)]]);
        let timestamps: Vec<i64> = merged.iter().map(MarketEvent::timestamp).collect();
        assert_eq!(timestamps, vec![1, 3, 5]);
    }

    proptest! {
        #[test]
        fn merged_output_is_ordered_permutation(
            mut bars in prop::collection::vec(10i64..1_000, 0..30),
            mut trades in prop::collection::vec(0i64..1_000, 0..60),
            mut snaps in prop::collection::vec(0i64..1_000, 0..20),
        ) {
            bars.sort_unstable();
            trades.sort_unstable();
            snaps.sort_unstable();
            let total = bars.len() + trades.len() + snaps.len();

            let merged = merge_streams(vec![
                bars.iter().map(|t| bar(*t)).collect(),
                trades.iter().map(|t| trade(*t)).collect(),
                snaps.iter().map(|t| snapshot(*t)).collect(),
            ]);

            prop_assert_eq!(merged.len(), total);
            for pair in merged.windows(2) {
                let a = (pair[0].timestamp(), pair[0].kind());
                let b = (pair[1].timestamp(), pair[1].kind());
                prop_assert!(a <= b);
            }
            let merged_bars = merged.iter().filter(|e| e.kind() == EventKind::Bar).count();
            prop_assert_eq!(merged_bars, bars.len());
        }
    }
}
