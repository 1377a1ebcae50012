//! Computation parameters
//!
//! Parameters are an ordered name → JSON value map. The ordering makes the
//! canonical JSON form, and therefore the fingerprint, independent of the
//! order in which callers inserted the entries.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::ComputationError;
use crate::ids::ParamFingerprint;

/// Hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Read a non-negative integer parameter, falling back to `default`.
    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize, ComputationError> {
        match self.0.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| ComputationError::invalid(name, "expected a non-negative integer")),
        }
    }

    /// Read a decimal parameter given as a JSON number or string.
    pub fn decimal_or(&self, name: &str, default: Decimal) -> Result<Decimal, ComputationError> {
        match self.0.get(name) {
            None => Ok(default),
            Some(Value::Number(n)) => Decimal::from_str_exact(&n.to_string())
                .or_else(|_| n.to_string().parse::<Decimal>())
                .map_err(|_| ComputationError::invalid(name, "expected a decimal number")),
            Some(Value::String(s)) => s
                .parse::<Decimal>()
                .map_err(|_| ComputationError::invalid(name, "expected a decimal number")),
            Some(_) => Err(ComputationError::invalid(name, "expected a decimal number")),
        }
    }

    /// Stable fingerprint of the canonical JSON form.
    pub fn fingerprint(&self) -> ParamFingerprint {
        let canonical = serde_json::to_vec(&self.0).unwrap_or_default();
        let digest = format!("{:x}", Sha256::digest(&canonical));
        ParamFingerprint::new(&digest[..FINGERPRINT_LEN])
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ComputationError;

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let a = Params::new().with("period", 14).with("source", "close");
        let b = Params::new().with("source", "close").with("period", 14);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_fingerprint_changes_with_values() {
        let a = Params::new().with("period", 14);
        let b = Params::new().with("period", 15);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_usize_or() {
        let params = Params::new().with("period", 20).with("bad", -3);
        assert_eq!(params.usize_or("period", 5).unwrap(), 20);
        assert_eq!(params.usize_or("missing", 5).unwrap(), 5);
        assert!(matches!(
            params.usize_or("bad", 5),
            Err(ComputationError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn test_decimal_or_accepts_numbers_and_strings() {
        let params = Params::new().with("width", 2.5).with("tick", "0.01");
        assert_eq!(
            params.decimal_or("width", Decimal::ONE).unwrap(),
            Decimal::from_str_exact("2.5").unwrap()
        );
        assert_eq!(
            params.decimal_or("tick", Decimal::ONE).unwrap(),
            Decimal::from_str_exact("0.01").unwrap()
        );
        assert_eq!(params.decimal_or("missing", Decimal::ONE).unwrap(), Decimal::ONE);
    }
}
