//! Observability counters for the indicator engine
//!
//! Tracks routing throughput, per-step failures, backfill volume and replay
//! activity. Counters are relaxed atomics; latency samples sit behind a
//! small lock and are only touched once per routed event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Core metrics for the engine.
pub struct EngineMetrics {
    // Live routing
    pub events_routed: AtomicU64,
    pub filter_skips: AtomicU64,
    pub step_failures: AtomicU64,
    pub route_latency_ns: Mutex<LatencyTracker>,

    // Backfill
    pub backfills: AtomicU64,
    pub backfill_events: AtomicU64,

    // Replay
    pub replay_steps: AtomicU64,
    pub sessions_created: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            events_routed: AtomicU64::new(0),
            filter_skips: AtomicU64::new(0),
            step_failures: AtomicU64::new(0),
            route_latency_ns: Mutex::new(LatencyTracker::new(1000)),
            backfills: AtomicU64::new(0),
            backfill_events: AtomicU64::new(0),
            replay_steps: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
        }
    }

    /// Record one routed event and how long dispatch took.
    pub fn record_route(&self, latency_ns: u64) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
        self.route_latency_ns.lock().record(latency_ns);
    }

    /// Record instances skipped because they do not want the event kind.
    pub fn record_filter_skips(&self, count: u64) {
        if count > 0 {
            self.filter_skips.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_step_failure(&self) {
        self.step_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed backfill over `events` merged events.
    pub fn record_backfill(&self, events: u64) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
        self.backfill_events.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_replay_step(&self) {
        self.replay_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("events_routed".to_string(), self.events_routed.load(Ordering::Relaxed));
        m.insert("filter_skips".to_string(), self.filter_skips.load(Ordering::Relaxed));
        m.insert("step_failures".to_string(), self.step_failures.load(Ordering::Relaxed));
        m.insert("backfills".to_string(), self.backfills.load(Ordering::Relaxed));
        m.insert("backfill_events".to_string(), self.backfill_events.load(Ordering::Relaxed));
        m.insert("replay_steps".to_string(), self.replay_steps.load(Ordering::Relaxed));
        m.insert("sessions_created".to_string(), self.sessions_created.load(Ordering::Relaxed));
        let tracker = self.route_latency_ns.lock();
        if let Some(p99) = tracker.percentile(99) {
            m.insert("route_latency_p99_ns".to_string(), p99);
        }
        if let Some(avg) = tracker.average() {
            m.insert("route_latency_avg_ns".to_string(), avg);
        }
        m
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling window of latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
    next: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            next: 0,
        }
    }

    /// Record a sample, overwriting the oldest once the window is full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() < self.max_samples {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
        }
        self.next = (self.next + 1) % self.max_samples;
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        sorted.get(idx).copied()
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
