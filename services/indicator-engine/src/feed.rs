//! Merged event feed with snapshot lookup
//!
//! An `EventFeed` is the output of the merger plus an index of the book
//! snapshots it contains, so a bar can be paired with the nearest snapshot
//! at or before its close without scanning.

use types::events::{BookSnapshot, EventKind, MarketEvent};

/// `(timestamp, index into the feed)` for every snapshot, in feed order.
#[derive(Debug, Clone, Default)]
struct SnapshotIndex(Vec<(i64, usize)>);

impl SnapshotIndex {
    fn build(events: &[MarketEvent]) -> Self {
        Self(
            events
                .iter()
                .enumerate()
                .filter(|(_, e)| e.kind() == EventKind::BookSnapshot)
                .map(|(idx, e)| (e.timestamp(), idx))
                .collect(),
        )
    }

    /// Feed index of the last snapshot with `timestamp <= ts`.
    fn nearest_at_or_before(&self, ts: i64) -> Option<usize> {
        let upper = self.0.partition_point(|(t, _)| *t <= ts);
        upper.checked_sub(1).map(|i| self.0[i].1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFeed {
    events: Vec<MarketEvent>,
    snapshots: SnapshotIndex,
}

impl EventFeed {
    /// Wrap an already merged, time-ordered sequence.
    pub fn new(events: Vec<MarketEvent>) -> Self {
        let snapshots = SnapshotIndex::build(&events);
        Self { events, snapshots }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[MarketEvent] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&MarketEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn bar_count(&self) -> usize {
        self.events.iter().filter(|e| e.kind() == EventKind::Bar).count()
    }

    /// Nearest snapshot stamped at or before `ts`. Never one from the future.
    pub fn snapshot_at(&self, ts: i64) -> Option<&BookSnapshot> {
        self.snapshots
            .nearest_at_or_before(ts)
            .and_then(|idx| self.events[idx].as_book_snapshot())
    }

    /// Snapshot to pair with the event at `index`, if it is a bar.
    pub fn lookahead_for(&self, index: usize) -> Option<&BookSnapshot> {
        let event = self.events.get(index)?;
        event.as_bar().and_then(|bar| self.snapshot_at(bar.close_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::events::{Bar, PriceLevel};
    use types::market::{Granularity, MarketContext};

    fn ctx() -> MarketContext {
        MarketContext::new("binance", "BTCUSDT", Granularity::M1)
    }

    fn snapshot(ts: i64, bid: i64) -> MarketEvent {
        MarketEvent::book_snapshot(
            ctx(),
            BookSnapshot {
                bids: vec![PriceLevel::new(Decimal::from(bid), Decimal::ONE)],
                asks: vec![],
                timestamp: ts,
            },
        )
    }

    #[test]
    fn test_snapshot_lookup_never_uses_future() {
        let feed = EventFeed::new(vec![
            snapshot(5, 1),
            MarketEvent::bar(ctx(), Bar::flat(Decimal::ONE, 0, 10)),
            snapshot(10, 2),
            snapshot(15, 3),
            MarketEvent::bar(ctx(), Bar::flat(Decimal::ONE, 10, 20)),
        ]);

        assert!(feed.snapshot_at(4).is_none());
        assert_eq!(feed.snapshot_at(9).unwrap().timestamp, 5);
        // Equal timestamps count as preceding.
        let paired = feed.lookahead_for(1).unwrap();
        assert_eq!(paired.timestamp, 10);
        assert_eq!(feed.lookahead_for(4).unwrap().timestamp, 15);
        assert!(feed.lookahead_for(0).is_none());
        assert_eq!(feed.bar_count(), 2);
    }

    #[test]
    fn test_empty_feed() {
        let feed = EventFeed::empty();
        assert!(feed.is_empty());
        assert!(feed.snapshot_at(100).is_none());
        assert!(feed.lookahead_for(0).is_none());
    }
}
