//! Indicator Engine Service
//!
//! Hosts live computation instances keyed by market context, computation id
//! and parameter fingerprint, and replays bounded historical windows through
//! them under user control.
//!
//! ```text
//!   live events ──► InstanceRegistry::route ──► Instance ──► BroadcastSink
//!                        ▲                        ▲
//!   HistoricalDataSource │ activate               │ apply
//!        │               │                        │
//!        └──► BackfillInitializer ──► EventFeed ──┤
//!             (ChronologicalMerger)               │
//!                                                 │
//!   ReplayService ──► session ──► scheduler ──────┘ ──► BroadcastSink
//! ```
//!
//! **Key Invariants:**
//! - Events reach an instance in chronological order, ties broken by kind
//! - Backfill and live updates go through the same step function
//! - Replay sessions never mutate registry instances they do not borrow
//! - Identical inputs always produce identical results

pub mod backfill;
pub mod catalog;
pub mod computation;
pub mod computations;
pub mod config;
pub mod engine;
pub mod feed;
pub mod handle;
pub mod history;
pub mod instance;
pub mod merger;
pub mod metrics;
pub mod registry;
pub mod replay;
pub mod sink;

pub use catalog::ComputationCatalog;
pub use computation::{BarContext, Computation, StepResult};
pub use config::EngineConfig;
pub use engine::IndicatorEngine;
pub use history::{HistoricalDataSource, HistoryWindow, InMemoryHistory};
pub use registry::{InstanceFilter, InstanceRegistry, RouteReport};
pub use replay::{ComputationSpec, ReplayRequest, ReplayService};
