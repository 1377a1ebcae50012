//! Replay engine
//!
//! Step-by-step playback of a bounded historical window through computation
//! instances, with play/pause/resume, speed control, single steps and seek.

mod scheduler;
pub mod service;
pub mod session;

pub use service::{ComputationSpec, ReplayRequest, ReplayService};
pub use session::{ReplayEvent, ReplayState, ReplayStatus, SessionMode};
