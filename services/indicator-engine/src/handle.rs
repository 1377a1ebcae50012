//! Instance handles used by replay sessions
//!
//! Two capabilities, two types. An [`OwnedInstance`] is private to one
//! session: it can be rewound and re-parameterized and is dropped when the
//! session stops. A [`SharedInstance`] borrows a registry instance: it can
//! apply events and read, nothing else, and it does not keep the instance
//! alive. Deactivating the instance in the registry makes the handle report
//! [`HandleError::Vanished`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use types::errors::ComputationError;
use types::events::{BookSnapshot, MarketEvent};
use types::ids::InstanceKey;
use types::params::Params;
use types::result::ComputationResult;

use crate::instance::{Instance, InstanceInfo};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandleError {
    #[error("Borrowed instance {key} is no longer active")]
    Vanished { key: InstanceKey },

    #[error(transparent)]
    Computation(#[from] ComputationError),
}

/// Exclusive, session-private instance.
#[derive(Debug)]
pub struct OwnedInstance {
    instance: Instance,
}

impl OwnedInstance {
    pub(crate) fn new(instance: Instance) -> Self {
        Self { instance }
    }

    pub fn key(&self) -> &InstanceKey {
        self.instance.key()
    }

    pub fn apply(
        &mut self,
        event: &MarketEvent,
        lookahead: Option<&BookSnapshot>,
    ) -> Result<Option<ComputationResult>, ComputationError> {
        self.instance.apply(event, lookahead)
    }

    /// Discard state and rebuild from the warm-up history only.
    pub fn rewind(&mut self) -> Result<(), ComputationError> {
        let params = self.instance.params().clone();
        self.instance = self.instance.rebuilt_with(params)?;
        Ok(())
    }

    /// Rebuild with new parameters. On failure the current state is kept.
    pub fn update_params(&mut self, params: Params) -> Result<(), ComputationError> {
        self.instance = self.instance.rebuilt_with(params)?;
        Ok(())
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn info(&self) -> InstanceInfo {
        self.instance.info()
    }
}

/// Non-owning view of a registry instance.
#[derive(Debug, Clone)]
pub struct SharedInstance {
    key: InstanceKey,
    inner: Weak<Mutex<Instance>>,
}

impl SharedInstance {
    pub(crate) fn new(key: InstanceKey, instance: &Arc<Mutex<Instance>>) -> Self {
        Self {
            key,
            inner: Arc::downgrade(instance),
        }
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn apply(
        &self,
        event: &MarketEvent,
        lookahead: Option<&BookSnapshot>,
    ) -> Result<Option<ComputationResult>, HandleError> {
        let instance = self.upgrade()?;
        let mut guard = instance.lock();
        Ok(guard.apply(event, lookahead)?)
    }

    pub fn info(&self) -> Result<InstanceInfo, HandleError> {
        let instance = self.upgrade()?;
        let guard = instance.lock();
        Ok(guard.info())
    }

    pub fn latest_result(&self) -> Result<Option<ComputationResult>, HandleError> {
        let instance = self.upgrade()?;
        let guard = instance.lock();
        Ok(guard.results().latest().cloned())
    }

    /// Up to `limit` most recent results, oldest first.
    pub fn results(&self, limit: usize) -> Result<Vec<ComputationResult>, HandleError> {
        let instance = self.upgrade()?;
        let guard = instance.lock();
        Ok(guard.results().tail(limit))
    }

    fn upgrade(&self) -> Result<Arc<Mutex<Instance>>, HandleError> {
        self.inner.upgrade().ok_or_else(|| HandleError::Vanished {
            key: self.key.clone(),
        })
    }
}
