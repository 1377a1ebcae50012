//! Error types for the indicator engine
//!
//! Error taxonomy using thiserror. Every error reports a machine-checkable
//! `ErrorKind` so callers can branch without matching on messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-checkable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnknownComputation,
    InvalidParameters,
    AlreadyActive,
    NotFound,
    NoData,
    PerStepComputationFailure,
    BackfillFailure,
    CapacityExceeded,
    InvalidTransition,
    SeekNotPermitted,
    SeekOutOfRange,
    InvalidSpeed,
    HistoryUnavailable,
    RuntimeUnavailable,
    InvalidConfig,
}

/// Top-level engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Registry(e) => e.kind(),
            EngineError::Replay(e) => e.kind(),
            EngineError::Config(_) => ErrorKind::InvalidConfig,
        }
    }
}

/// Errors raised by a computation implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Computation failed: {reason}")]
    Failed { reason: String },

    #[error("State type mismatch for computation {computation}")]
    StateMismatch { computation: String },
}

impl ComputationError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ComputationError::InvalidParameters {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        ComputationError::Failed {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ComputationError::InvalidParameters { .. } => ErrorKind::InvalidParameters,
            ComputationError::Failed { .. } | ComputationError::StateMismatch { .. } => {
                ErrorKind::PerStepComputationFailure
            }
        }
    }
}

/// Errors raised by a historical data source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("History unavailable for {context}: {reason}")]
    Unavailable { context: String, reason: String },
}

/// Instance registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown computation: {computation_id}")]
    UnknownComputation { computation_id: String },

    #[error("Invalid parameters for {computation_id}: {source}")]
    InvalidParameters {
        computation_id: String,
        source: ComputationError,
    },

    #[error("Instance already active: {key}")]
    AlreadyActive { key: String },

    #[error("Instance not found: {key}")]
    NotFound { key: String },

    #[error("Backfill failed for {key}: {reason}")]
    BackfillFailure { key: String, reason: String },

    #[error("Instance capacity exceeded: limit {limit}")]
    CapacityExceeded { limit: usize },

    #[error("History unavailable: {0}")]
    HistoryUnavailable(#[from] HistoryError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::UnknownComputation { .. } => ErrorKind::UnknownComputation,
            RegistryError::InvalidParameters { .. } => ErrorKind::InvalidParameters,
            RegistryError::AlreadyActive { .. } => ErrorKind::AlreadyActive,
            RegistryError::NotFound { .. } => ErrorKind::NotFound,
            RegistryError::BackfillFailure { .. } => ErrorKind::BackfillFailure,
            RegistryError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            RegistryError::HistoryUnavailable(_) => ErrorKind::HistoryUnavailable,
        }
    }
}

/// Replay session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("No historical data for {context}")]
    NoData { context: String },

    #[error("Cannot {action} a session in state {state}")]
    InvalidTransition { state: String, action: &'static str },

    #[error("Seek is not permitted on session {session_id}: borrowed instances cannot be rewound")]
    SeekNotPermitted { session_id: String },

    #[error("Seek index {index} out of range 0..={total}")]
    SeekOutOfRange { index: usize, total: usize },

    #[error("Invalid speed {speed}: must be > 0 and <= {max}")]
    InvalidSpeed { speed: f64, max: f64 },

    #[error("Session capacity exceeded: limit {limit}")]
    CapacityExceeded { limit: usize },

    #[error("Session initialization failed: {0}")]
    Initialization(#[from] RegistryError),

    #[error("History unavailable: {0}")]
    History(#[from] HistoryError),

    #[error("No async runtime available to drive playback")]
    RuntimeUnavailable,
}

impl ReplayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplayError::NotFound { .. } => ErrorKind::NotFound,
            ReplayError::NoData { .. } => ErrorKind::NoData,
            ReplayError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ReplayError::SeekNotPermitted { .. } => ErrorKind::SeekNotPermitted,
            ReplayError::SeekOutOfRange { .. } => ErrorKind::SeekOutOfRange,
            ReplayError::InvalidSpeed { .. } => ErrorKind::InvalidSpeed,
            ReplayError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            ReplayError::Initialization(e) => e.kind(),
            ReplayError::History(_) => ErrorKind::HistoryUnavailable,
            ReplayError::RuntimeUnavailable => ErrorKind::RuntimeUnavailable,
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computation_error_display() {
        let err = ComputationError::invalid("period", "must be >= 1");
        assert_eq!(err.to_string(), "Invalid parameter period: must be >= 1");
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    #[test]
    fn test_registry_error_kinds() {
        let err = RegistryError::UnknownComputation {
            computation_id: "nope".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::UnknownComputation);
        assert!(err.to_string().contains("nope"));

        let err: RegistryError = HistoryError::Unavailable {
            context: "binance:BTCUSDT:5m".to_string(),
            reason: "offline".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::HistoryUnavailable);
    }

    #[test]
    fn test_replay_initialization_keeps_inner_kind() {
        let err: ReplayError = RegistryError::InvalidParameters {
            computation_id: "sma".to_string(),
            source: ComputationError::invalid("period", "zero"),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    #[test]
    fn test_engine_error_from_replay_error() {
        let err: EngineError = ReplayError::RuntimeUnavailable.into();
        assert!(matches!(err, EngineError::Replay(_)));
        assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);
    }
}
