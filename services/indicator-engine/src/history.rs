//! Historical data source
//!
//! Read-only access to past bars, trades and book snapshots for one market
//! context. Results are sorted by timestamp but may be incomplete: trade
//! history commonly covers less time than bar history.

use std::collections::HashMap;

use parking_lot::RwLock;
use types::errors::HistoryError;
use types::events::{Bar, BookSnapshot, Trade};
use types::market::MarketContext;

/// Time window over history, in Unix millis. `None` bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl HistoryWindow {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(start: i64, end: i64) -> Self {
        Self::new(Some(start), Some(end))
    }

    /// A bar is inside when its whole span `[open, close)` is.
    pub fn contains_bar(&self, bar: &Bar) -> bool {
        self.start.map_or(true, |s| bar.open_time >= s) && self.end.map_or(true, |e| bar.close_time <= e)
    }

    /// Instant events are inside when `start <= ts < end`.
    pub fn contains_instant(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp < e)
    }
}

pub trait HistoricalDataSource: Send + Sync {
    fn bars(&self, context: &MarketContext, window: HistoryWindow) -> Result<Vec<Bar>, HistoryError>;

    fn trades(&self, _context: &MarketContext, _window: HistoryWindow) -> Result<Vec<Trade>, HistoryError> {
        Ok(Vec::new())
    }

    fn book_snapshots(
        &self,
        _context: &MarketContext,
        _window: HistoryWindow,
    ) -> Result<Vec<BookSnapshot>, HistoryError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Clone)]
struct Series {
    trades: Vec<Trade>,
    snapshots: Vec<BookSnapshot>,
}

/// In-memory history keyed by context. Trades and snapshots ignore
/// granularity and are shared by every granularity of a symbol.
#[derive(Default)]
pub struct InMemoryHistory {
    bars: RwLock<HashMap<MarketContext, Vec<Bar>>>,
    flow: RwLock<HashMap<(String, String), Series>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bars, keeping the series sorted by close time.
    pub fn insert_bars(&self, context: &MarketContext, bars: impl IntoIterator<Item = Bar>) {
        let mut guard = self.bars.write();
        let series = guard.entry(context.clone()).or_default();
        series.extend(bars);
        series.sort_by_key(|b| b.close_time);
    }

    pub fn insert_trades(&self, context: &MarketContext, trades: impl IntoIterator<Item = Trade>) {
        let mut guard = self.flow.write();
        let series = guard.entry(flow_key(context)).or_default();
        series.trades.extend(trades);
        series.trades.sort_by_key(|t| t.timestamp);
    }

    pub fn insert_snapshots(
        &self,
        context: &MarketContext,
        snapshots: impl IntoIterator<Item = BookSnapshot>,
    ) {
        let mut guard = self.flow.write();
        let series = guard.entry(flow_key(context)).or_default();
        series.snapshots.extend(snapshots);
        series.snapshots.sort_by_key(|s| s.timestamp);
    }

    pub fn bar_count(&self, context: &MarketContext) -> usize {
        self.bars.read().get(context).map_or(0, Vec::len)
    }
}

fn flow_key(context: &MarketContext) -> (String, String) {
    (context.source.clone(), context.symbol.clone())
}

impl HistoricalDataSource for InMemoryHistory {
    fn bars(&self, context: &MarketContext, window: HistoryWindow) -> Result<Vec<Bar>, HistoryError> {
        Ok(self
            .bars
            .read()
            .get(context)
            .map(|bars| bars.iter().filter(|b| window.contains_bar(b)).cloned().collect())
            .unwrap_or_default())
    }

    fn trades(&self, context: &MarketContext, window: HistoryWindow) -> Result<Vec<Trade>, HistoryError> {
        Ok(self
            .flow
            .read()
            .get(&flow_key(context))
            .map(|s| {
                s.trades
                    .iter()
                    .filter(|t| window.contains_instant(t.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn book_snapshots(
        &self,
        context: &MarketContext,
        window: HistoryWindow,
    ) -> Result<Vec<BookSnapshot>, HistoryError> {
        Ok(self
            .flow
            .read()
            .get(&flow_key(context))
            .map(|s| {
                s.snapshots
                    .iter()
                    .filter(|b| window.contains_instant(b.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::events::Side;
    use types::market::Granularity;

    fn ctx() -> MarketContext {
        MarketContext::new("binance", "BTCUSDT", Granularity::M1)
    }

    #[test]
    fn test_window_bar_containment() {
        let bar = Bar::flat(Decimal::ONE, 60_000, 120_000);
        assert!(HistoryWindow::unbounded().contains_bar(&bar));
        assert!(HistoryWindow::between(60_000, 120_000).contains_bar(&bar));
        assert!(!HistoryWindow::between(60_001, 120_000).contains_bar(&bar));
        assert!(!HistoryWindow::between(60_000, 119_999).contains_bar(&bar));
    }

    #[test]
    fn test_window_instant_is_half_open() {
        let window = HistoryWindow::between(10, 20);
        assert!(window.contains_instant(10));
        assert!(window.contains_instant(19));
        assert!(!window.contains_instant(20));
    }

    #[test]
    fn test_in_memory_history_sorts_and_filters() {
        let history = InMemoryHistory::new();
        history.insert_bars(
            &ctx(),
            vec![
                Bar::flat(Decimal::ONE, 60_000, 120_000),
                Bar::flat(Decimal::ONE, 0, 60_000),
            ],
        );
        history.insert_trades(
            &ctx(),
            vec![
                Trade::new(Decimal::ONE, Decimal::ONE, Side::BUY, 70_000),
                Trade::new(Decimal::ONE, Decimal::ONE, Side::SELL, 5_000),
            ],
        );

        let bars = history.bars(&ctx(), HistoryWindow::unbounded()).unwrap();
        assert_eq!(bars[0].open_time, 0);
        assert_eq!(history.bar_count(&ctx()), 2);

        let trades = history.trades(&ctx(), HistoryWindow::between(60_000, 120_000)).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].timestamp, 70_000);

        // Trades are shared across granularities of one symbol.
        let five = MarketContext::new("binance", "BTCUSDT", Granularity::M5);
        assert_eq!(history.trades(&five, HistoryWindow::unbounded()).unwrap().len(), 2);
        assert!(history.bars(&five, HistoryWindow::unbounded()).unwrap().is_empty());
    }
}
