//! Replay service
//!
//! Creates sessions and exposes playback controls. Sessions either own
//! private instances built through the registry's activation path, or
//! borrow the instances already active on the context. Owned sessions can
//! seek in both directions; borrowed sessions only play forward.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use types::errors::ReplayError;
use types::events::EventKindSet;
use types::ids::SessionId;
use types::market::MarketContext;
use types::params::Params;
use types::result::ComputationResult;

use super::scheduler::SessionHandle;
use super::session::{ReplayEvent, ReplayState, ReplayStatus, SessionCore, SessionInstances, SessionMode};
use crate::backfill::BackfillInitializer;
use crate::config::ReplayConfig;
use crate::handle::OwnedInstance;
use crate::history::HistoryWindow;
use crate::instance::InstanceInfo;
use crate::metrics::EngineMetrics;
use crate::registry::InstanceRegistry;
use crate::sink::BroadcastSink;

/// A computation to instantiate privately for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationSpec {
    pub computation_id: String,
    pub params: Params,
}

impl ComputationSpec {
    pub fn new(computation_id: impl Into<String>, params: Params) -> Self {
        Self {
            computation_id: computation_id.into(),
            params,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayRequest {
    pub context: MarketContext,
    pub window: HistoryWindow,
    pub speed: f64,
    /// Empty to borrow the context's live instances.
    pub specs: Vec<ComputationSpec>,
}

impl ReplayRequest {
    pub fn new(context: MarketContext) -> Self {
        Self {
            context,
            window: HistoryWindow::unbounded(),
            speed: 1.0,
            specs: Vec::new(),
        }
    }

    pub fn with_window(mut self, window: HistoryWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_computation(mut self, spec: ComputationSpec) -> Self {
        self.specs.push(spec);
        self
    }
}

pub struct ReplayService {
    registry: Arc<InstanceRegistry>,
    sink: Arc<dyn BroadcastSink>,
    metrics: Arc<EngineMetrics>,
    config: ReplayConfig,
    sessions: RwLock<BTreeMap<SessionId, Arc<SessionHandle>>>,
}

impl ReplayService {
    pub fn new(registry: Arc<InstanceRegistry>, sink: Arc<dyn BroadcastSink>) -> Self {
        let metrics = Arc::clone(registry.metrics());
        Self {
            registry,
            sink,
            metrics,
            config: ReplayConfig::default(),
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    /// Create a session in `Ready`. Any failure while initializing fails
    /// creation and leaves nothing behind.
    pub fn create(&self, request: ReplayRequest) -> Result<SessionId, ReplayError> {
        self.validate_speed(request.speed)?;
        if self.sessions.read().len() >= self.config.max_sessions {
            return Err(ReplayError::CapacityExceeded {
                limit: self.config.max_sessions,
            });
        }

        let context = &request.context;
        let history = Arc::clone(self.registry.history());
        let bars = history.bars(context, request.window)?;
        let Some(first) = bars.first() else {
            return Err(ReplayError::NoData {
                context: context.to_string(),
            });
        };
        let window_start = first.open_time;

        let (mode, instances, required) = if request.specs.is_empty() {
            let borrowed = self.registry.borrow_context(context);
            if borrowed.is_empty() {
                (SessionMode::Owning, SessionInstances::Owned(Vec::new()), EventKindSet::BARS)
            } else {
                let mut required = EventKindSet::BARS;
                for shared in &borrowed {
                    if let Ok(info) = shared.info() {
                        required = required.union(EventKindSet::of(&info.required_event_types));
                    }
                }
                (SessionMode::Borrowing, SessionInstances::Borrowed(borrowed), required)
            }
        } else {
            let owned = self.build_owned(context, window_start, &request.specs)?;
            let required = owned
                .iter()
                .fold(EventKindSet::BARS, |set, o| set.union(o.instance().required_event_types()));
            (SessionMode::Owning, SessionInstances::Owned(owned), required)
        };

        let (feed, _) = BackfillInitializer::new(history.as_ref()).build_feed(context, required, bars)?;
        let total = feed.len();

        let id = SessionId::new();
        let mut core = SessionCore::new(
            id,
            context.clone(),
            mode,
            Arc::new(feed),
            request.speed,
            instances,
            Arc::clone(&self.metrics),
        );
        core.transition(ReplayState::Ready, "initialize")?;
        let keys = core.status().instance_keys;

        let handle = Arc::new(SessionHandle::new(
            core,
            Arc::clone(&self.sink),
            Arc::clone(&self.metrics),
            self.config.base_interval(),
        ));
        {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.config.max_sessions {
                return Err(ReplayError::CapacityExceeded {
                    limit: self.config.max_sessions,
                });
            }
            sessions.insert(id, handle);
        }
        self.metrics.record_session_created();

        info!(
            session_id = %id,
            context = %context,
            mode = ?mode,
            events = total,
            instances = keys.len(),
            "Replay session created"
        );
        Ok(id)
    }

    /// Start playback of a `Ready` session.
    pub fn play(&self, id: &SessionId) -> Result<ReplayStatus, ReplayError> {
        self.start(id, ReplayState::Ready, "play")
    }

    pub fn pause(&self, id: &SessionId) -> Result<ReplayStatus, ReplayError> {
        let handle = self.handle(id)?;
        let mut core = handle.core.lock();
        if core.state != ReplayState::Playing {
            return Err(invalid(core.state, "pause"));
        }
        core.transition(ReplayState::Paused, "pause")?;
        Ok(core.status())
    }

    pub fn resume(&self, id: &SessionId) -> Result<ReplayStatus, ReplayError> {
        self.start(id, ReplayState::Paused, "resume")
    }

    /// Change speed. Takes effect from the next inter-step delay; a sleep
    /// already in progress is not shortened.
    pub fn set_speed(&self, id: &SessionId, speed: f64) -> Result<ReplayStatus, ReplayError> {
        self.validate_speed(speed)?;
        let handle = self.handle(id)?;
        let mut core = handle.core.lock();
        if core.state.is_terminal() {
            return Err(invalid(core.state, "set speed of"));
        }
        core.speed = speed;
        Ok(core.status())
    }

    /// Advance exactly one event from `Ready` or `Paused`.
    pub fn step(&self, id: &SessionId) -> Result<ReplayEvent, ReplayError> {
        let handle = self.handle(id)?;
        let event = {
            let mut core = handle.core.lock();
            match core.state {
                ReplayState::Ready => core.transition(ReplayState::Paused, "step")?,
                ReplayState::Paused => {}
                state => return Err(invalid(state, "step")),
            }
            core.step().unwrap_or_else(|| core.progress_event())
        };
        self.metrics.record_replay_step();
        handle.publish(&event);
        Ok(event)
    }

    /// Move the cursor to `index` (owned sessions only).
    ///
    /// Forward seeks apply the skipped events without delay or per-step
    /// events. Backward seeks rebuild every owned instance from its warm-up
    /// history and fast-forward from the window start. Seeking to the end
    /// completes the session; seeking back from `Completed` pauses it.
    pub fn seek(&self, id: &SessionId, index: usize) -> Result<ReplayStatus, ReplayError> {
        let handle = self.handle(id)?;
        let (event, status) = {
            let mut core = handle.core.lock();
            if core.mode != SessionMode::Owning {
                return Err(ReplayError::SeekNotPermitted {
                    session_id: id.to_string(),
                });
            }
            if core.state.is_terminal() || core.state == ReplayState::Initializing {
                return Err(invalid(core.state, "seek"));
            }
            let total = core.total();
            if index > total {
                return Err(ReplayError::SeekOutOfRange { index, total });
            }

            let from = core.cursor;
            if index < core.cursor {
                core.rewind()?;
            }
            if core.state == ReplayState::Completed && index < total {
                core.transition(ReplayState::Paused, "seek")?;
            }
            let failures = core.fast_forward(index);
            if failures > 0 {
                warn!(session_id = %id, failures, "Step failures during seek");
            }
            info!(session_id = %id, from, to = core.cursor, "Session seek");
            (core.progress_event(), core.status())
        };
        handle.publish(&event);
        Ok(status)
    }

    /// Stop a session, release its instances and remove it.
    pub fn stop(&self, id: &SessionId) -> Result<ReplayStatus, ReplayError> {
        let handle = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| not_found(id))?;
        let status = {
            let mut core = handle.core.lock();
            core.state = ReplayState::Stopped;
            core.release();
            core.status()
        };
        handle.wake.notify_one();
        info!(session_id = %id, cursor = status.cursor, total = status.total, "Replay session stopped");
        Ok(status)
    }

    /// Stop every session.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        for id in ids {
            let _ = self.stop(&id);
        }
    }

    pub fn status(&self, id: &SessionId) -> Result<ReplayStatus, ReplayError> {
        Ok(self.handle(id)?.core.lock().status())
    }

    pub fn list(&self) -> Vec<ReplayStatus> {
        let handles: Vec<Arc<SessionHandle>> = self.sessions.read().values().cloned().collect();
        handles.iter().map(|h| h.core.lock().status()).collect()
    }

    /// Latest result of each instance in the session, by key.
    pub fn results(&self, id: &SessionId) -> Result<BTreeMap<String, ComputationResult>, ReplayError> {
        Ok(self.handle(id)?.core.lock().latest_results())
    }

    /// Up to `limit` most recent results of each instance, oldest first.
    pub fn result_history(
        &self,
        id: &SessionId,
        limit: usize,
    ) -> Result<BTreeMap<String, Vec<ComputationResult>>, ReplayError> {
        Ok(self.handle(id)?.core.lock().result_history(limit))
    }

    /// Summaries of the instances a session drives.
    pub fn instances(&self, id: &SessionId) -> Result<Vec<InstanceInfo>, ReplayError> {
        Ok(self.handle(id)?.core.lock().instance_info())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn start(&self, id: &SessionId, from: ReplayState, action: &'static str) -> Result<ReplayStatus, ReplayError> {
        let handle = self.handle(id)?;
        let mut core = handle.core.lock();
        if core.state != from {
            return Err(invalid(core.state, action));
        }
        core.transition(ReplayState::Playing, action)?;
        if let Err(e) = handle.ensure_running(&mut core) {
            core.state = from;
            return Err(e);
        }
        info!(session_id = %id, cursor = core.cursor, speed = core.speed, "Playback started");
        Ok(core.status())
    }

    fn build_owned(
        &self,
        context: &MarketContext,
        window_start: i64,
        specs: &[ComputationSpec],
    ) -> Result<Vec<OwnedInstance>, ReplayError> {
        let history = self.registry.history();
        let prior = history.bars(context, HistoryWindow::new(None, Some(window_start)))?;

        specs
            .iter()
            .map(|spec| {
                let needed = self
                    .registry
                    .catalog()
                    .get(&spec.computation_id)
                    .map_or(0, |c| c.minimum_history_length(&spec.params));
                let warm_up = prior[prior.len().saturating_sub(needed)..].to_vec();
                self.registry
                    .activate_owned(context, &spec.computation_id, spec.params.clone(), warm_up)
                    .map_err(ReplayError::from)
            })
            .collect()
    }

    fn handle(&self, id: &SessionId) -> Result<Arc<SessionHandle>, ReplayError> {
        self.sessions.read().get(id).cloned().ok_or_else(|| not_found(id))
    }

    fn validate_speed(&self, speed: f64) -> Result<(), ReplayError> {
        if !(speed.is_finite() && speed > 0.0 && speed <= self.config.max_speed) {
            return Err(ReplayError::InvalidSpeed {
                speed,
                max: self.config.max_speed,
            });
        }
        Ok(())
    }
}

impl Drop for ReplayService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn invalid(state: ReplayState, action: &'static str) -> ReplayError {
    ReplayError::InvalidTransition {
        state: state.to_string(),
        action,
    }
}

fn not_found(id: &SessionId) -> ReplayError {
    ReplayError::NotFound {
        session_id: id.to_string(),
    }
}
