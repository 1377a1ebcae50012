//! Stateful computation instances
//!
//! An `Instance` pairs a computation definition with its private state and
//! the bookkeeping the registry exposes: update counters, timestamps and a
//! bounded history of emitted results. Instances are rebuilt, never patched:
//! a parameter change produces a fresh instance from the cached backfill
//! feed and swaps it in only when the rebuild succeeded.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use types::errors::ComputationError;
use types::events::{BookSnapshot, EventKind, EventKindSet, MarketEvent};
use types::ids::InstanceKey;
use types::params::Params;
use types::result::{Annotation, ArtifactId, ComputationResult, EventRef};

use crate::backfill;
use crate::computation::{DynComputation, ErasedState};
use crate::feed::EventFeed;

/// Bounded, ordered result buffer with artifact deduplication.
///
/// Annotations whose id and geometry match an artifact already seen are
/// dropped from stored results. A changed geometry under a known id
/// replaces the artifact and is kept.
#[derive(Debug, Clone)]
pub struct ResultHistory {
    capacity: usize,
    results: VecDeque<ComputationResult>,
    artifacts: BTreeMap<ArtifactId, Annotation>,
}

impl ResultHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            results: VecDeque::with_capacity(capacity.min(1024)),
            artifacts: BTreeMap::new(),
        }
    }

    /// Store a result and return the deduplicated copy that was stored.
    pub fn record(&mut self, mut result: ComputationResult) -> ComputationResult {
        let artifacts = &mut self.artifacts;
        result.annotations.retain(|annotation| {
            if artifacts.get(&annotation.id) == Some(annotation) {
                return false;
            }
            artifacts.insert(annotation.id.clone(), annotation.clone());
            true
        });

        if self.results.len() == self.capacity {
            self.results.pop_front();
        }
        self.results.push_back(result.clone());
        result
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn latest(&self) -> Option<&ComputationResult> {
        self.results.back()
    }

    /// Results oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ComputationResult> {
        self.results.iter()
    }

    /// Most recent `n` results, oldest first.
    pub fn tail(&self, n: usize) -> Vec<ComputationResult> {
        let skip = self.results.len().saturating_sub(n);
        self.results.iter().skip(skip).cloned().collect()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Annotation> {
        self.artifacts.values()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }
}

/// Read-only summary of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub key: InstanceKey,
    pub params: Params,
    pub required_event_types: Vec<EventKind>,
    pub update_count: u64,
    pub result_count: usize,
    pub artifact_count: usize,
    /// Whether backfill covered `minimum_history_length` bars.
    pub warmed_up: bool,
    pub created_at: DateTime<Utc>,
    pub last_update_at: Option<DateTime<Utc>>,
}

pub struct Instance {
    key: InstanceKey,
    computation: Arc<dyn DynComputation>,
    params: Params,
    state: ErasedState,
    required: EventKindSet,
    results: ResultHistory,
    update_count: u64,
    created_at: DateTime<Utc>,
    last_update_at: Option<DateTime<Utc>>,
    last_snapshot: Option<BookSnapshot>,
    /// Backfill input, kept for rebuilds.
    feed: Arc<EventFeed>,
    warmed_up: bool,
}

impl Instance {
    /// Create an instance with fresh state. No history is applied yet.
    pub fn new(
        key: InstanceKey,
        computation: Arc<dyn DynComputation>,
        params: Params,
        feed: Arc<EventFeed>,
        result_capacity: usize,
    ) -> Result<Self, ComputationError> {
        let state = computation.initialize(&params)?;
        let required = computation.required_event_types();
        let warmed_up = feed.bar_count() >= computation.minimum_history_length(&params);
        Ok(Self {
            key,
            computation,
            params,
            state,
            required,
            results: ResultHistory::new(result_capacity),
            update_count: 0,
            created_at: Utc::now(),
            last_update_at: None,
            last_snapshot: None,
            feed,
            warmed_up,
        })
    }

    /// Create an instance and run its backfill feed through it.
    pub fn build(
        key: InstanceKey,
        computation: Arc<dyn DynComputation>,
        params: Params,
        feed: Arc<EventFeed>,
        result_capacity: usize,
    ) -> Result<Self, ComputationError> {
        let mut instance = Self::new(key, computation, params, feed, result_capacity)?;
        let feed = Arc::clone(&instance.feed);
        backfill::apply_feed(&mut instance, &feed, 0..feed.len())?;
        Ok(instance)
    }

    /// Fresh instance under the same key, rebuilt from the cached feed.
    pub fn rebuilt_with(&self, params: Params) -> Result<Self, ComputationError> {
        let mut rebuilt = Self::build(
            self.key.clone(),
            Arc::clone(&self.computation),
            params,
            Arc::clone(&self.feed),
            self.results.capacity,
        )?;
        rebuilt.created_at = self.created_at;
        Ok(rebuilt)
    }

    /// Whether this instance consumes events of `kind`.
    pub fn wants(&self, kind: EventKind) -> bool {
        self.required.contains(kind)
    }

    /// Apply one event.
    ///
    /// Events of kinds the computation did not request are ignored and leave
    /// no trace. `lookahead` is the snapshot to pair with a bar; when absent
    /// the last snapshot this instance consumed is used. A snapshot stamped
    /// after the event is never passed on.
    pub fn apply(
        &mut self,
        event: &MarketEvent,
        lookahead: Option<&BookSnapshot>,
    ) -> Result<Option<ComputationResult>, ComputationError> {
        let kind = event.kind();
        if !self.required.contains(kind) {
            return Ok(None);
        }

        let snapshot = if self.required.contains(EventKind::BookSnapshot) {
            lookahead
                .or(self.last_snapshot.as_ref())
                .filter(|s| s.timestamp <= event.timestamp())
        } else {
            None
        };
        let output = self
            .computation
            .consume(event, snapshot, &self.params, &mut self.state)?;

        if let Some(bar) = event.as_bar().filter(|b| b.closed) {
            self.computation
                .boundary_reset(bar, &self.params, &mut self.state)?;
        }
        if let Some(book) = event.as_book_snapshot() {
            self.last_snapshot = Some(book.clone());
        }

        self.update_count += 1;
        self.last_update_at = Some(Utc::now());

        Ok(output.map(|output| {
            let source = EventRef {
                kind,
                timestamp: event.timestamp(),
            };
            self.results
                .record(ComputationResult::from_output(output, source))
        }))
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn computation_id(&self) -> &str {
        self.computation.id()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn required_event_types(&self) -> EventKindSet {
        self.required
    }

    pub fn results(&self) -> &ResultHistory {
        &self.results
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            key: self.key.clone(),
            params: self.params.clone(),
            required_event_types: self.required.iter().collect(),
            update_count: self.update_count,
            result_count: self.results.len(),
            artifact_count: self.results.artifact_count(),
            warmed_up: self.warmed_up,
            created_at: self.created_at,
            last_update_at: self.last_update_at,
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("key", &self.key)
            .field("params", &self.params)
            .field("update_count", &self.update_count)
            .field("results", &self.results.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computations::Sma;
    use rust_decimal::Decimal;
    use types::events::{Bar, Side, Trade};
    use types::market::{Granularity, MarketContext};
    use types::result::{Geometry, Output};

    fn ctx() -> MarketContext {
        MarketContext::new("binance", "BTCUSDT", Granularity::M1)
    }

    fn bar_event(i: i64, close: i64) -> MarketEvent {
        MarketEvent::bar(ctx(), Bar::flat(Decimal::from(close), i * 60_000, (i + 1) * 60_000))
    }

    fn sma_instance(period: u64, bars: usize) -> Instance {
        let params = Params::new().with("period", period);
        let key = InstanceKey::new(&ctx(), "sma", params.fingerprint());
        let feed = EventFeed::new((0..bars as i64).map(|i| bar_event(i, 10 + i)).collect());
        Instance::build(key, Arc::new(Sma), params, Arc::new(feed), 100).unwrap()
    }

    fn zone(id: &str, end: i64) -> Annotation {
        Annotation::new(
            ArtifactId::new(id),
            "zone",
            Geometry::Box {
                start_time: 0,
                end_time: end,
                top: Decimal::TWO,
                bottom: Decimal::ONE,
            },
        )
    }

    fn result_with(annotations: Vec<Annotation>, ts: i64) -> ComputationResult {
        let output = annotations.into_iter().fold(Output::new(), Output::annotate);
        ComputationResult::from_output(
            output,
            EventRef {
                kind: EventKind::Bar,
                timestamp: ts,
            },
        )
    }

    #[test]
    fn test_result_history_evicts_oldest() {
        let mut history = ResultHistory::new(2);
        for ts in 1..=3 {
            history.record(result_with(vec![], ts));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().next().unwrap().timestamp, 2);
        assert_eq!(history.latest().unwrap().timestamp, 3);
    }

    #[test]
    fn test_result_history_dedups_artifacts() {
        let mut history = ResultHistory::new(10);
        let first = history.record(result_with(vec![zone("z1", 10)], 1));
        assert_eq!(first.annotations.len(), 1);

        let repeat = history.record(result_with(vec![zone("z1", 10)], 2));
        assert!(repeat.annotations.is_empty());

        let extended = history.record(result_with(vec![zone("z1", 20), zone("z2", 20)], 3));
        assert_eq!(extended.annotations.len(), 2);
        assert_eq!(history.artifact_count(), 2);
    }

    #[test]
    fn test_build_applies_backfill() {
        let instance = sma_instance(3, 5);
        assert_eq!(instance.update_count(), 5);
        // Bars close at 10..=14, SMA(3) of the last three is 13.
        assert_eq!(instance.results().latest().unwrap().value("sma"), Some(Decimal::from(13)));
        assert!(instance.info().warmed_up);
    }

    #[test]
    fn test_filtered_kinds_leave_no_trace() {
        let mut instance = sma_instance(3, 5);
        let trade = MarketEvent::trade(ctx(), Trade::new(Decimal::ONE, Decimal::ONE, Side::BUY, 1));
        assert!(instance.apply(&trade, None).unwrap().is_none());
        assert_eq!(instance.update_count(), 5);
        assert!(instance.info().last_update_at.is_some());
    }

    #[test]
    fn test_rebuild_matches_fresh_build() {
        let instance = sma_instance(3, 8);
        let rebuilt = instance.rebuilt_with(Params::new().with("period", 2)).unwrap();
        let fresh = sma_instance(2, 8);
        assert_eq!(rebuilt.key(), instance.key());
        assert_eq!(rebuilt.results().tail(100), fresh.results().tail(100));
        assert_eq!(rebuilt.update_count(), fresh.update_count());
    }

    #[test]
    fn test_short_history_is_not_warm() {
        let instance = sma_instance(20, 5);
        assert!(!instance.info().warmed_up);
        assert!(instance.results().is_empty());
    }
}
