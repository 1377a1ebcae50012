//! Types library for the indicator engine
//!
//! This library provides the core type definitions shared by the instance
//! registry, the backfill initializer and the replay engine.
//!
//! # Modules
//! - `market`: Market context and bar granularity
//! - `events`: Market events (bars, trades, book snapshots, ticks)
//! - `ids`: Instance keys, parameter fingerprints, session identifiers
//! - `params`: Ordered computation parameters
//! - `result`: Computation results and chart annotations
//! - `errors`: Error taxonomy

// Public modules
pub mod market;
pub mod events;
pub mod ids;
pub mod params;
pub mod result;
pub mod errors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::market::*;
    pub use crate::events::*;
    pub use crate::ids::*;
    pub use crate::params::*;
    pub use crate::result::*;
    pub use crate::errors::*;
}
