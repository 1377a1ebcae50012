//! Replay session state
//!
//! A session owns a bounded, merged event sequence, a cursor into it and the
//! instances it drives. The cursor always satisfies `0 <= cursor <= total`,
//! and `cursor == total` exactly when the session has completed.
//!
//! ```text
//!  Initializing ──► Ready ──► Playing ◄──► Paused
//!                     │          │           │
//!                     │          ▼           │
//!                     └──────► Completed ◄───┘
//!        any state ──► Error        any state ──► Stopped
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use types::errors::ReplayError;
use types::events::{Bar, EventKind};
use types::ids::SessionId;
use types::market::MarketContext;
use types::result::ComputationResult;

use crate::feed::EventFeed;
use crate::handle::{HandleError, OwnedInstance, SharedInstance};
use crate::instance::InstanceInfo;
use crate::metrics::EngineMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplayState {
    Initializing,
    Ready,
    Playing,
    Paused,
    Completed,
    Stopped,
    Error,
}

impl ReplayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayState::Initializing => "Initializing",
            ReplayState::Ready => "Ready",
            ReplayState::Playing => "Playing",
            ReplayState::Paused => "Paused",
            ReplayState::Completed => "Completed",
            ReplayState::Stopped => "Stopped",
            ReplayState::Error => "Error",
        }
    }

    /// No further playback is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayState::Stopped | ReplayState::Error)
    }

    pub fn can_transition_to(&self, next: ReplayState) -> bool {
        use ReplayState::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) | (_, Error) => true,
            (Initializing, Ready) => true,
            (Ready, Playing) | (Ready, Paused) | (Ready, Completed) => true,
            (Playing, Paused) | (Playing, Completed) => true,
            (Paused, Playing) | (Paused, Completed) => true,
            (Completed, Paused) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Private instances created for this session.
    Owning,
    /// Registry instances borrowed for the session's lifetime.
    Borrowing,
}

/// Progress event published after every step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayEvent {
    pub session_id: SessionId,
    /// Events applied so far.
    pub cursor: usize,
    pub total: usize,
    /// `cursor / total` as a percentage.
    pub progress: f64,
    pub state: ReplayState,
    pub event_kind: Option<EventKind>,
    pub timestamp: Option<i64>,
    pub bar: Option<Bar>,
    pub results_by_key: BTreeMap<String, ComputationResult>,
    /// Per-instance step failures; the session keeps going.
    pub errors: BTreeMap<String, String>,
}

/// Snapshot of a session for callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStatus {
    pub session_id: SessionId,
    pub context: MarketContext,
    pub mode: SessionMode,
    pub state: ReplayState,
    pub cursor: usize,
    pub total: usize,
    pub progress: f64,
    pub speed: f64,
    pub instance_keys: Vec<String>,
    pub last_error: Option<String>,
}

pub(crate) enum SessionInstances {
    Owned(Vec<OwnedInstance>),
    Borrowed(Vec<SharedInstance>),
    Released,
}

impl SessionInstances {
    fn keys(&self) -> Vec<String> {
        match self {
            SessionInstances::Owned(owned) => owned.iter().map(|i| i.key().to_string()).collect(),
            SessionInstances::Borrowed(shared) => shared.iter().map(|i| i.key().to_string()).collect(),
            SessionInstances::Released => Vec::new(),
        }
    }
}

pub(crate) struct SessionCore {
    pub(crate) id: SessionId,
    pub(crate) context: MarketContext,
    pub(crate) mode: SessionMode,
    pub(crate) feed: Arc<EventFeed>,
    pub(crate) cursor: usize,
    pub(crate) state: ReplayState,
    pub(crate) speed: f64,
    pub(crate) instances: SessionInstances,
    pub(crate) last_error: Option<String>,
    metrics: Arc<EngineMetrics>,
}

impl SessionCore {
    pub(crate) fn new(
        id: SessionId,
        context: MarketContext,
        mode: SessionMode,
        feed: Arc<EventFeed>,
        speed: f64,
        instances: SessionInstances,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            id,
            context,
            mode,
            feed,
            cursor: 0,
            state: ReplayState::Initializing,
            speed,
            instances,
            last_error: None,
            metrics,
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.feed.len()
    }

    pub(crate) fn progress(&self) -> f64 {
        if self.total() == 0 {
            return 100.0;
        }
        self.cursor as f64 / self.total() as f64 * 100.0
    }

    pub(crate) fn transition(&mut self, next: ReplayState, action: &'static str) -> Result<(), ReplayError> {
        if !self.state.can_transition_to(next) {
            return Err(ReplayError::InvalidTransition {
                state: self.state.to_string(),
                action,
            });
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Apply the event at the cursor to every instance and advance.
    ///
    /// Returns `None` when the cursor is already at the end.
    pub(crate) fn step(&mut self) -> Option<ReplayEvent> {
        let feed = Arc::clone(&self.feed);
        let index = self.cursor;
        let event = feed.get(index)?;
        let lookahead = feed.lookahead_for(index);

        let mut results = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut vanished = None;

        match &mut self.instances {
            SessionInstances::Owned(owned) => {
                for instance in owned.iter_mut() {
                    match instance.apply(event, lookahead) {
                        Ok(Some(result)) => {
                            results.insert(instance.key().to_string(), result);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            errors.insert(instance.key().to_string(), e.to_string());
                        }
                    }
                }
            }
            SessionInstances::Borrowed(shared) => {
                for instance in shared.iter() {
                    match instance.apply(event, lookahead) {
                        Ok(Some(result)) => {
                            results.insert(instance.key().to_string(), result);
                        }
                        Ok(None) => {}
                        Err(HandleError::Computation(e)) => {
                            errors.insert(instance.key().to_string(), e.to_string());
                        }
                        Err(e @ HandleError::Vanished { .. }) => {
                            vanished = Some(e.to_string());
                            break;
                        }
                    }
                }
            }
            SessionInstances::Released => {}
        }

        for (key, error) in &errors {
            warn!(session_id = %self.id, key = %key, cursor = index, error = %error, "Replay step failed");
            self.metrics.record_step_failure();
        }

        if let Some(reason) = vanished {
            warn!(session_id = %self.id, reason = %reason, "Borrowed instance vanished");
            self.state = ReplayState::Error;
            self.last_error = Some(reason);
        } else {
            self.cursor += 1;
            if self.cursor == self.total() {
                self.state = ReplayState::Completed;
            }
        }

        Some(ReplayEvent {
            session_id: self.id,
            cursor: self.cursor,
            total: self.total(),
            progress: self.progress(),
            state: self.state,
            event_kind: Some(event.kind()),
            timestamp: Some(event.timestamp()),
            bar: event.as_bar().cloned(),
            results_by_key: results,
            errors,
        })
    }

    /// Apply events up to `target` without emitting per-step events.
    ///
    /// Stops early if the session enters `Error`.
    pub(crate) fn fast_forward(&mut self, target: usize) -> usize {
        let mut failures = 0;
        while self.cursor < target && self.state != ReplayState::Error {
            match self.step() {
                Some(event) => failures += event.errors.len(),
                None => break,
            }
        }
        failures
    }

    /// Rebuild owned instances from their warm-up history and reset the
    /// cursor to the window start.
    pub(crate) fn rewind(&mut self) -> Result<(), ReplayError> {
        let SessionInstances::Owned(owned) = &mut self.instances else {
            return Err(ReplayError::SeekNotPermitted {
                session_id: self.id.to_string(),
            });
        };
        for instance in owned.iter_mut() {
            if let Err(e) = instance.rewind() {
                let reason = format!("rewind of {} failed: {}", instance.key(), e);
                self.state = ReplayState::Error;
                self.last_error = Some(reason.clone());
                return Err(ReplayError::Initialization(types::errors::RegistryError::BackfillFailure {
                    key: instance.key().to_string(),
                    reason,
                }));
            }
        }
        self.cursor = 0;
        Ok(())
    }

    /// Progress event for the current position with no step attached.
    pub(crate) fn progress_event(&self) -> ReplayEvent {
        ReplayEvent {
            session_id: self.id,
            cursor: self.cursor,
            total: self.total(),
            progress: self.progress(),
            state: self.state,
            event_kind: None,
            timestamp: None,
            bar: None,
            results_by_key: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    /// Latest stored result of every instance, by key.
    pub(crate) fn latest_results(&self) -> BTreeMap<String, ComputationResult> {
        let mut latest = BTreeMap::new();
        match &self.instances {
            SessionInstances::Owned(owned) => {
                for instance in owned {
                    if let Some(result) = instance.instance().results().latest() {
                        latest.insert(instance.key().to_string(), result.clone());
                    }
                }
            }
            SessionInstances::Borrowed(shared) => {
                for instance in shared {
                    if let Ok(Some(result)) = instance.latest_result() {
                        latest.insert(instance.key().to_string(), result);
                    }
                }
            }
            SessionInstances::Released => {}
        }
        latest
    }

    /// Up to `limit` most recent results of every instance, oldest first.
    pub(crate) fn result_history(&self, limit: usize) -> BTreeMap<String, Vec<ComputationResult>> {
        let mut history = BTreeMap::new();
        match &self.instances {
            SessionInstances::Owned(owned) => {
                for instance in owned {
                    history.insert(instance.key().to_string(), instance.instance().results().tail(limit));
                }
            }
            SessionInstances::Borrowed(shared) => {
                for instance in shared {
                    if let Ok(results) = instance.results(limit) {
                        history.insert(instance.key().to_string(), results);
                    }
                }
            }
            SessionInstances::Released => {}
        }
        history
    }

    /// Summaries of the instances still reachable from this session.
    pub(crate) fn instance_info(&self) -> Vec<InstanceInfo> {
        match &self.instances {
            SessionInstances::Owned(owned) => owned.iter().map(OwnedInstance::info).collect(),
            SessionInstances::Borrowed(shared) => shared.iter().filter_map(|i| i.info().ok()).collect(),
            SessionInstances::Released => Vec::new(),
        }
    }

    /// Drop owned instances and let go of borrowed ones.
    pub(crate) fn release(&mut self) {
        self.instances = SessionInstances::Released;
    }

    pub(crate) fn status(&self) -> ReplayStatus {
        ReplayStatus {
            session_id: self.id,
            context: self.context.clone(),
            mode: self.mode,
            state: self.state,
            cursor: self.cursor,
            total: self.total(),
            progress: self.progress(),
            speed: self.speed,
            instance_keys: self.instances.keys(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::events::MarketEvent;
    use types::market::Granularity;

    fn core(bars: i64) -> SessionCore {
        let ctx = MarketContext::new("binance", "BTCUSDT", Granularity::M1);
        let events = (0..bars)
            .map(|i| MarketEvent::bar(ctx.clone(), Bar::flat(Decimal::ONE, i * 60_000, (i + 1) * 60_000)))
            .collect();
        SessionCore::new(
            SessionId::new(),
            ctx,
            SessionMode::Owning,
            Arc::new(EventFeed::new(events)),
            1.0,
            SessionInstances::Owned(Vec::new()),
            Arc::new(EngineMetrics::new()),
        )
    }

    #[test]
    fn test_transition_table() {
        use ReplayState::*;
        assert!(Initializing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Stopped));
        assert!(Initializing.can_transition_to(Error));
        assert!(!Stopped.can_transition_to(Playing));
        assert!(!Completed.can_transition_to(Playing));
        assert!(!Ready.can_transition_to(Initializing));
        assert!(!Playing.can_transition_to(Ready));
    }

    #[test]
    fn test_invalid_transition_error() {
        let mut core = core(2);
        let err = core.transition(ReplayState::Playing, "play").unwrap_err();
        assert_eq!(
            err,
            ReplayError::InvalidTransition {
                state: "Initializing".to_string(),
                action: "play"
            }
        );
    }

    #[test]
    fn test_step_to_completion() {
        let mut core = core(2);
        core.transition(ReplayState::Ready, "init").unwrap();
        core.transition(ReplayState::Playing, "play").unwrap();

        let first = core.step().unwrap();
        assert_eq!(first.cursor, 1);
        assert_eq!(first.progress, 50.0);
        assert_eq!(first.state, ReplayState::Playing);
        assert!(first.bar.is_some());

        let last = core.step().unwrap();
        assert_eq!(last.cursor, 2);
        assert_eq!(last.state, ReplayState::Completed);
        assert!(core.step().is_none());
    }

    #[test]
    fn test_release_clears_instances() {
        let mut core = core(1);
        core.release();
        assert!(matches!(core.instances, SessionInstances::Released));
        assert!(core.status().instance_keys.is_empty());
    }
}
