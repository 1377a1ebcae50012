//! Market event model
//!
//! Defines the `MarketEvent` consumed by the registry and the replay engine.
//! Every event carries its `MarketContext` and a Unix millisecond timestamp.
//! Streams of one kind are individually time-ordered; streams of different
//! kinds are not synchronized with each other.
//!
//! A bar is ordered by its `close_time` and covers the half-open span
//! `[open_time, close_time)`, so every trade inside the span sorts before
//! the bar that closes it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::MarketContext;

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buyer was the aggressor
    BUY,
    /// Seller was the aggressor
    SELL,
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_time: i64,
    /// Exclusive end of the bar span; also the bar's ordering timestamp.
    pub close_time: i64,
    /// False while the bar is still forming (live partial updates).
    pub closed: bool,
}

impl Bar {
    /// Create a closed bar.
    pub fn new(
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        open_time: i64,
        close_time: i64,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
            open_time,
            close_time,
            closed: true,
        }
    }

    /// Create a flat closed bar where every price equals `price`.
    pub fn flat(price: Decimal, open_time: i64, close_time: i64) -> Self {
        Self::new(price, price, price, price, Decimal::ZERO, open_time, close_time)
    }

    /// Mark the bar as still forming.
    pub fn forming(mut self) -> Self {
        self.closed = false;
        self
    }

    /// Whether `timestamp` falls inside `[open_time, close_time)`.
    pub fn spans(&self, timestamp: i64) -> bool {
        timestamp >= self.open_time && timestamp < self.close_time
    }

    /// Validate bar integrity (OHLCV invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
            && self.close_time > self.open_time
    }
}

/// A single executed trade (or an aggregate of consecutive fills).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: Side,
    pub timestamp: i64,
    /// True when this record aggregates several fills at one price.
    pub is_aggregate: bool,
    /// First venue trade id covered by an aggregate.
    pub span_first_id: Option<u64>,
    /// Last venue trade id covered by an aggregate.
    pub span_last_id: Option<u64>,
}

impl Trade {
    /// Create a plain (non-aggregate) trade.
    pub fn new(price: Decimal, quantity: Decimal, side: Side, timestamp: i64) -> Self {
        Self {
            price,
            quantity,
            side,
            timestamp,
            is_aggregate: false,
            span_first_id: None,
            span_last_id: None,
        }
    }

    /// Notional value (price × quantity).
    pub fn value(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Aggregated quantity at a single book price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// A point-in-time view of the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Bid levels, best (highest) first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<PriceLevel>,
    pub timestamp: i64,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Total bid quantity over the top `depth` levels.
    pub fn bid_depth(&self, depth: usize) -> Decimal {
        self.bids.iter().take(depth).map(|l| l.quantity).sum()
    }

    /// Total ask quantity over the top `depth` levels.
    pub fn ask_depth(&self, depth: usize) -> Decimal {
        self.asks.iter().take(depth).map(|l| l.quantity).sum()
    }
}

/// A last-price update without volume information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: Decimal,
    pub timestamp: i64,
}

/// The kind of a market event.
///
/// The declaration order is the tie-break order used when merging streams
/// with identical timestamps: bars close before trades, trades before
/// snapshots, snapshots before ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Bar,
    Trade,
    BookSnapshot,
    PriceTick,
}

impl EventKind {
    /// All kinds in tie-break order.
    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::Bar,
            EventKind::Trade,
            EventKind::BookSnapshot,
            EventKind::PriceTick,
        ]
    }

    fn bit(self) -> u8 {
        match self {
            EventKind::Bar => 0b0001,
            EventKind::Trade => 0b0010,
            EventKind::BookSnapshot => 0b0100,
            EventKind::PriceTick => 0b1000,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Bar => "Bar",
            EventKind::Trade => "Trade",
            EventKind::BookSnapshot => "BookSnapshot",
            EventKind::PriceTick => "PriceTick",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Compact set of event kinds a computation subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKindSet(u8);

impl EventKindSet {
    pub const EMPTY: EventKindSet = EventKindSet(0);
    pub const BARS: EventKindSet = EventKindSet(0b0001);

    pub fn of(kinds: &[EventKind]) -> Self {
        kinds.iter().fold(Self::EMPTY, |set, kind| set.with(*kind))
    }

    pub fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Union of two sets.
    pub fn union(self, other: EventKindSet) -> Self {
        Self(self.0 | other.0)
    }

    /// Members in tie-break order.
    pub fn iter(&self) -> impl Iterator<Item = EventKind> + '_ {
        EventKind::all().iter().copied().filter(move |k| self.contains(*k))
    }
}

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum MarketEventPayload {
    Bar(Bar),
    Trade(Trade),
    BookSnapshot(BookSnapshot),
    PriceTick(PriceTick),
}

/// An immutable market event tagged with its context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub context: MarketContext,
    pub payload: MarketEventPayload,
}

impl MarketEvent {
    pub fn new(context: MarketContext, payload: MarketEventPayload) -> Self {
        Self { context, payload }
    }

    pub fn bar(context: MarketContext, bar: Bar) -> Self {
        Self::new(context, MarketEventPayload::Bar(bar))
    }

    pub fn trade(context: MarketContext, trade: Trade) -> Self {
        Self::new(context, MarketEventPayload::Trade(trade))
    }

    pub fn book_snapshot(context: MarketContext, snapshot: BookSnapshot) -> Self {
        Self::new(context, MarketEventPayload::BookSnapshot(snapshot))
    }

    pub fn tick(context: MarketContext, tick: PriceTick) -> Self {
        Self::new(context, MarketEventPayload::PriceTick(tick))
    }

    /// Ordering timestamp (Unix millis). Bars use their close time.
    pub fn timestamp(&self) -> i64 {
        match &self.payload {
            MarketEventPayload::Bar(bar) => bar.close_time,
            MarketEventPayload::Trade(trade) => trade.timestamp,
            MarketEventPayload::BookSnapshot(snapshot) => snapshot.timestamp,
            MarketEventPayload::PriceTick(tick) => tick.timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            MarketEventPayload::Bar(_) => EventKind::Bar,
            MarketEventPayload::Trade(_) => EventKind::Trade,
            MarketEventPayload::BookSnapshot(_) => EventKind::BookSnapshot,
            MarketEventPayload::PriceTick(_) => EventKind::PriceTick,
        }
    }

    pub fn as_bar(&self) -> Option<&Bar> {
        match &self.payload {
            MarketEventPayload::Bar(bar) => Some(bar),
            _ => None,
        }
    }

    pub fn as_book_snapshot(&self) -> Option<&BookSnapshot> {
        match &self.payload {
            MarketEventPayload::BookSnapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// Whether this is a bar that has closed.
    pub fn is_closed_bar(&self) -> bool {
        self.as_bar().map_or(false, |bar| bar.closed)
    }
}
