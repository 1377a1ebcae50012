//! Engine configuration
//!
//! All sections deserialize with defaults, so a config file only needs the
//! values it overrides:
//!
//! ```json
//! { "registry": { "result_history_capacity": 1000 }, "replay": { "max_sessions": 4 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use types::errors::ConfigError;

/// What `activate` does when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPolicy {
    /// Return the existing key without doing any work.
    Idempotent,
    /// Reject with `AlreadyActive`.
    Strict,
}

/// Configuration for the instance registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Results retained per instance (oldest evicted first).
    pub result_history_capacity: usize,
    /// Maximum number of live instances.
    pub max_instances: usize,
    pub activation_policy: ActivationPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            result_history_capacity: 500,
            max_instances: 1024,
            activation_policy: ActivationPolicy::Idempotent,
        }
    }
}

/// Configuration for the replay engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Delay between steps at speed 1.0, in milliseconds.
    pub base_interval_ms: u64,
    /// Maximum number of concurrently open sessions.
    pub max_sessions: usize,
    /// Upper bound for the speed multiplier.
    pub max_speed: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 500,
            max_sessions: 16,
            max_speed: 1000.0,
        }
    }
}

impl ReplayConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub registry: RegistryConfig,
    pub replay: ReplayConfig,
    /// Capacity of the broadcast channel used by `ChannelSink`.
    pub sink_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            replay: ReplayConfig::default(),
            sink_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.result_history_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "registry.result_history_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.registry.max_instances == 0 {
            return Err(ConfigError::Invalid {
                field: "registry.max_instances",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.replay.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "replay.max_sessions",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.replay.max_speed.is_finite() && self.replay.max_speed > 0.0) {
            return Err(ConfigError::Invalid {
                field: "replay.max_speed",
                reason: format!("must be a positive number, got {}", self.replay.max_speed),
            });
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "sink_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.activation_policy, ActivationPolicy::Idempotent);
        assert_eq!(config.replay.base_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "registry": { "activation_policy": "strict" }, "sink_capacity": 64 }"#,
        )
        .unwrap();
        assert_eq!(config.registry.activation_policy, ActivationPolicy::Strict);
        assert_eq!(config.registry.result_history_capacity, 500);
        assert_eq!(config.replay.max_sessions, 16);
        assert_eq!(config.sink_capacity, 64);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_json_str(
            r#"{ "replay": { "max_speed": 0.0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "replay.max_speed", .. }));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
