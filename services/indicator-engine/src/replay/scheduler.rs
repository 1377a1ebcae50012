//! Playback scheduler
//!
//! One Tokio task per playing session. Each iteration takes the session
//! lock, applies exactly one event, releases the lock, publishes the
//! progress event and sleeps `base_interval / speed`. The sleep races the
//! session's `Notify`, so `stop` (and `resume`) take effect immediately.
//! While paused the task parks on the same `Notify`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info};
use types::errors::ReplayError;
use types::ids::SessionId;

use super::session::{ReplayEvent, ReplayState, SessionCore};
use crate::metrics::EngineMetrics;
use crate::sink::BroadcastSink;

pub(crate) struct SessionHandle {
    pub(crate) id: SessionId,
    pub(crate) core: Mutex<SessionCore>,
    pub(crate) wake: Notify,
    /// Set while a playback task exists. Only changed under `core`'s lock.
    running: AtomicBool,
    sink: Arc<dyn BroadcastSink>,
    metrics: Arc<EngineMetrics>,
    base_interval: Duration,
}

enum Tick {
    Stepped(ReplayEvent, Duration),
    Finished(Option<ReplayEvent>),
    Wait,
}

impl SessionHandle {
    pub(crate) fn new(
        core: SessionCore,
        sink: Arc<dyn BroadcastSink>,
        metrics: Arc<EngineMetrics>,
        base_interval: Duration,
    ) -> Self {
        Self {
            id: core.id,
            core: Mutex::new(core),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            sink,
            metrics,
            base_interval,
        }
    }

    pub(crate) fn publish(&self, event: &ReplayEvent) {
        self.sink.publish_replay(&self.id, event);
    }

    /// Delay before the next step at `speed`.
    fn delay_for(&self, speed: f64) -> Duration {
        if !(speed.is_finite() && speed > 0.0) {
            return self.base_interval;
        }
        Duration::try_from_secs_f64(self.base_interval.as_secs_f64() / speed).unwrap_or(self.base_interval)
    }

    /// Spawn the playback task unless one is already running.
    ///
    /// Must be called with `core` locked by the caller, passed in as proof.
    pub(crate) fn ensure_running(self: &Arc<Self>, _core: &mut SessionCore) -> Result<(), ReplayError> {
        if self.running.load(Ordering::Acquire) {
            self.wake.notify_one();
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| ReplayError::RuntimeUnavailable)?;
        self.running.store(true, Ordering::Release);
        let handle = Arc::clone(self);
        runtime.spawn(async move { handle.run().await });
        Ok(())
    }

    fn tick(&self) -> Tick {
        let mut core = self.core.lock();
        let state = core.state;
        match state {
            ReplayState::Playing => match core.step() {
                Some(event) if event.state == ReplayState::Playing => {
                    let delay = self.delay_for(core.speed);
                    Tick::Stepped(event, delay)
                }
                finished => {
                    self.running.store(false, Ordering::Release);
                    Tick::Finished(finished)
                }
            },
            ReplayState::Ready | ReplayState::Paused | ReplayState::Initializing => Tick::Wait,
            ReplayState::Completed | ReplayState::Stopped | ReplayState::Error => {
                self.running.store(false, Ordering::Release);
                Tick::Finished(None)
            }
        }
    }

    async fn run(self: Arc<Self>) {
        debug!(session_id = %self.id, "Playback task started");
        loop {
            match self.tick() {
                Tick::Stepped(event, delay) => {
                    self.publish(&event);
                    self.metrics.record_replay_step();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                Tick::Wait => self.wake.notified().await,
                Tick::Finished(last) => {
                    if let Some(event) = last {
                        self.publish(&event);
                        self.metrics.record_replay_step();
                        info!(
                            session_id = %self.id,
                            state = %event.state,
                            cursor = event.cursor,
                            total = event.total,
                            "Playback finished"
                        );
                    }
                    break;
                }
            }
        }
        debug!(session_id = %self.id, "Playback task exited");
    }
}
