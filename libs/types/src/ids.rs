//! Identifier types for instances and replay sessions
//!
//! Session IDs use UUID v7 so sessions list in creation order. Instance keys
//! are plain value tuples: two activations with the same tuple address the
//! same instance.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::market::{Granularity, MarketContext};

/// Unique identifier for a replay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new SessionId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable digest of a parameter set (see `Params::fingerprint`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamFingerprint(String);

impl ParamFingerprint {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one activated computation.
///
/// The fingerprint is taken from the parameters at activation time and does
/// not change when the instance's parameters are later updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub source: String,
    pub symbol: String,
    pub granularity: Granularity,
    pub computation_id: String,
    pub fingerprint: ParamFingerprint,
}

impl InstanceKey {
    pub fn new(
        context: &MarketContext,
        computation_id: impl Into<String>,
        fingerprint: ParamFingerprint,
    ) -> Self {
        Self {
            source: context.source.clone(),
            symbol: context.symbol.clone(),
            granularity: context.granularity,
            computation_id: computation_id.into(),
            fingerprint,
        }
    }

    /// The market context this instance listens to.
    pub fn context(&self) -> MarketContext {
        MarketContext {
            source: self.source.clone(),
            symbol: self.symbol.clone(),
            granularity: self.granularity,
        }
    }

    /// Whether events from `context` are routed to this instance.
    pub fn matches(&self, context: &MarketContext) -> bool {
        self.source == context.source
            && self.symbol == context.symbol
            && self.granularity == context.granularity
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.source, self.symbol, self.granularity, self.computation_id, self.fingerprint
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MarketContext {
        MarketContext::new("binance", "BTCUSDT", Granularity::M5)
    }

    #[test]
    fn test_session_id_creation() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2, "SessionIds should be unique");
    }

    #[test]
    fn test_session_id_serialization() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_instance_key_identity() {
        let a = InstanceKey::new(&ctx(), "sma", ParamFingerprint::new("abc"));
        let b = InstanceKey::new(&ctx(), "sma", ParamFingerprint::new("abc"));
        let c = InstanceKey::new(&ctx(), "sma", ParamFingerprint::new("def"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_instance_key_matches_context() {
        let key = InstanceKey::new(&ctx(), "sma", ParamFingerprint::new("abc"));
        assert!(key.matches(&ctx()));
        assert!(!key.matches(&MarketContext::new("binance", "BTCUSDT", Granularity::M1)));
        assert!(!key.matches(&MarketContext::new("binance", "ETHUSDT", Granularity::M5)));
        assert_eq!(key.context(), ctx());
    }

    #[test]
    fn test_instance_key_display() {
        let key = InstanceKey::new(&ctx(), "sma", ParamFingerprint::new("abc"));
        assert_eq!(key.to_string(), "binance:BTCUSDT:5m:sma:abc");
    }
}
