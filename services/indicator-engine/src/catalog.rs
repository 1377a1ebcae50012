//! Computation catalog
//!
//! Maps computation ids to shared definitions. The registry resolves the id
//! given to `activate` here; unknown ids are rejected before anything is
//! built.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::computation::{Computation, DynComputation};
use crate::computations::{BookImbalance, PriceZones, Sma, VolumeProfile};

#[derive(Default, Clone)]
pub struct ComputationCatalog {
    entries: BTreeMap<&'static str, Arc<dyn DynComputation>>,
}

impl ComputationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in computation registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(Sma);
        catalog.register(VolumeProfile);
        catalog.register(BookImbalance);
        catalog.register(PriceZones);
        catalog
    }

    /// Register a computation under its id, replacing any previous entry.
    pub fn register<C: Computation>(&mut self, computation: C) {
        let id = Computation::id(&computation);
        self.entries.insert(id, Arc::new(computation));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DynComputation>> {
        self.entries.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let catalog = ComputationCatalog::with_builtins();
        assert_eq!(
            catalog.ids(),
            vec!["book_imbalance", "price_zones", "sma", "volume_profile"]
        );
        assert!(catalog.get("sma").is_some());
        assert!(catalog.get("rsi").is_none());
    }
}
