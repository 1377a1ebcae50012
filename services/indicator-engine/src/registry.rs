//! Instance registry
//!
//! Key-addressed store of live computation instances. Each instance sits
//! behind its own mutex, so routing to independent instances never
//! contends; the map itself is only write-locked to insert or remove.
//!
//! Activation validates, backfills and only then inserts. The backfill runs
//! without holding the map lock, and a failed activation leaves nothing
//! behind.
//!
//! # Example
//!
//! ```ignore
//! let registry = InstanceRegistry::new(ComputationCatalog::with_builtins(), history, sink);
//! let key = registry.activate(&ctx, "sma", Params::new().with("period", 20), bars)?;
//! let report = registry.route(&event);
//! registry.deactivate(&key)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use types::errors::{ComputationError, RegistryError};
use types::events::{Bar, EventKindSet, MarketEvent};
use types::ids::{InstanceKey, ParamFingerprint};
use types::market::{Granularity, MarketContext};
use types::params::Params;
use types::result::{Annotation, ComputationResult};

use crate::backfill::BackfillInitializer;
use crate::catalog::ComputationCatalog;
use crate::computation::DynComputation;
use crate::config::{ActivationPolicy, RegistryConfig};
use crate::handle::{OwnedInstance, SharedInstance};
use crate::history::HistoricalDataSource;
use crate::instance::{Instance, InstanceInfo};
use crate::metrics::EngineMetrics;
use crate::sink::BroadcastSink;

/// Listing filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub source: Option<String>,
    pub symbol: Option<String>,
    pub granularity: Option<Granularity>,
    pub computation_id: Option<String>,
}

impl InstanceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_context(context: &MarketContext) -> Self {
        Self {
            source: Some(context.source.clone()),
            symbol: Some(context.symbol.clone()),
            granularity: Some(context.granularity),
            computation_id: None,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into().to_ascii_lowercase());
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn computation(mut self, computation_id: impl Into<String>) -> Self {
        self.computation_id = Some(computation_id.into());
        self
    }

    pub fn matches(&self, key: &InstanceKey) -> bool {
        self.source.as_ref().map_or(true, |s| *s == key.source)
            && self.symbol.as_ref().map_or(true, |s| *s == key.symbol)
            && self.granularity.map_or(true, |g| g == key.granularity)
            && self
                .computation_id
                .as_ref()
                .map_or(true, |c| *c == key.computation_id)
    }
}

/// A per-instance failure isolated during routing.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteFailure {
    pub key: InstanceKey,
    pub error: ComputationError,
}

/// Outcome of routing one event.
#[derive(Debug, Clone, Default)]
pub struct RouteReport {
    /// Results in key order.
    pub results: Vec<(InstanceKey, ComputationResult)>,
    pub failures: Vec<RouteFailure>,
    /// Instances that consumed the event.
    pub delivered: usize,
    /// Instances on the context that do not want this event kind.
    pub skipped: usize,
}

impl RouteReport {
    pub fn result_for(&self, key: &InstanceKey) -> Option<&ComputationResult> {
        self.results.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }
}

struct Slot {
    required: EventKindSet,
    /// Fingerprint of the parameters the instance runs now. Differs from
    /// the key's fingerprint after an update.
    current: ParamFingerprint,
    instance: Arc<Mutex<Instance>>,
}

/// Where a requested activation lands in the map.
enum Lookup {
    Free,
    /// An instance already runs the requested parameters under this key.
    Active(InstanceKey),
    /// The key is held by an instance whose parameters were updated.
    Occupied,
}

fn lookup(instances: &BTreeMap<InstanceKey, Slot>, key: &InstanceKey) -> Lookup {
    let running = instances.iter().find(|(existing, slot)| {
        slot.current == key.fingerprint
            && existing.computation_id == key.computation_id
            && existing.matches(&key.context())
    });
    match running {
        Some((existing, _)) => Lookup::Active(existing.clone()),
        None if instances.contains_key(key) => Lookup::Occupied,
        None => Lookup::Free,
    }
}

pub struct InstanceRegistry {
    catalog: ComputationCatalog,
    history: Arc<dyn HistoricalDataSource>,
    sink: Arc<dyn BroadcastSink>,
    metrics: Arc<EngineMetrics>,
    config: RegistryConfig,
    instances: RwLock<BTreeMap<InstanceKey, Slot>>,
}

impl InstanceRegistry {
    pub fn new(
        catalog: ComputationCatalog,
        history: Arc<dyn HistoricalDataSource>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Self {
        Self {
            catalog,
            history,
            sink,
            metrics: Arc::new(EngineMetrics::new()),
            config: RegistryConfig::default(),
            instances: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Activate a computation on a market context.
    ///
    /// An instance already running `params` on this context is found by its
    /// current parameters, so after an update the updated key is the one
    /// returned. Under [`ActivationPolicy::Idempotent`] that key is returned
    /// without rebuilding; under `Strict` it is an error. A key whose
    /// instance now runs other parameters is never handed out and fails
    /// with `AlreadyActive`.
    pub fn activate(
        &self,
        context: &MarketContext,
        computation_id: &str,
        params: Params,
        bars: Vec<Bar>,
    ) -> Result<InstanceKey, RegistryError> {
        let computation = self.resolve(computation_id, &params)?;
        let key = InstanceKey::new(context, computation_id, params.fingerprint());

        let found = lookup(&self.instances.read(), &key);
        match found {
            Lookup::Free => {}
            Lookup::Active(existing) => return self.on_existing(existing),
            Lookup::Occupied => return Err(RegistryError::AlreadyActive { key: key.to_string() }),
        }
        self.check_capacity()?;

        let instance = self.backfill(&key, computation, params, bars)?;
        let required = instance.required_event_types();

        let mut instances = self.instances.write();
        match lookup(&instances, &key) {
            Lookup::Free => {}
            Lookup::Active(existing) => {
                drop(instances);
                return self.on_existing(existing);
            }
            Lookup::Occupied => return Err(RegistryError::AlreadyActive { key: key.to_string() }),
        }
        if instances.len() >= self.config.max_instances {
            return Err(RegistryError::CapacityExceeded {
                limit: self.config.max_instances,
            });
        }
        let updates = instance.update_count();
        instances.insert(
            key.clone(),
            Slot {
                required,
                current: key.fingerprint.clone(),
                instance: Arc::new(Mutex::new(instance)),
            },
        );
        drop(instances);

        info!(key = %key, backfilled = updates, "Instance activated");
        Ok(key)
    }

    /// Build a private instance through the activation path without
    /// registering it.
    pub fn activate_owned(
        &self,
        context: &MarketContext,
        computation_id: &str,
        params: Params,
        bars: Vec<Bar>,
    ) -> Result<OwnedInstance, RegistryError> {
        let computation = self.resolve(computation_id, &params)?;
        let key = InstanceKey::new(context, computation_id, params.fingerprint());
        let instance = self.backfill(&key, computation, params, bars)?;
        debug!(key = %key, "Owned instance built");
        Ok(OwnedInstance::new(instance))
    }

    /// Replace an instance's parameters by rebuilding it over the same
    /// history. The key is unchanged. A failed rebuild keeps the old
    /// instance.
    ///
    /// Fails with `AlreadyActive` when another instance on the context
    /// already runs the new parameters.
    pub fn update_params(&self, key: &InstanceKey, params: Params) -> Result<InstanceKey, RegistryError> {
        let instance = self.slot_instance(key)?;
        if let Some(computation) = self.catalog.get(&key.computation_id) {
            computation
                .validate_params(&params)
                .map_err(|source| RegistryError::InvalidParameters {
                    computation_id: key.computation_id.clone(),
                    source,
                })?;
        }
        let wanted = InstanceKey::new(&key.context(), key.computation_id.clone(), params.fingerprint());
        self.check_not_running_elsewhere(key, &wanted)?;

        let mut guard = instance.lock();
        let rebuilt = guard
            .rebuilt_with(params)
            .map_err(|e| RegistryError::BackfillFailure {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let mut instances = self.instances.write();
        if let Lookup::Active(other) = lookup(&instances, &wanted) {
            if other != *key {
                return Err(RegistryError::AlreadyActive { key: other.to_string() });
            }
        }
        if let Some(slot) = instances.get_mut(key) {
            slot.current = wanted.fingerprint;
        }
        *guard = rebuilt;
        drop(instances);
        let updates = guard.update_count();
        drop(guard);

        self.metrics.record_backfill(updates);
        info!(key = %key, backfilled = updates, "Instance parameters updated");
        Ok(key.clone())
    }

    /// Remove an instance. Removing an absent key succeeds.
    pub fn deactivate(&self, key: &InstanceKey) -> Result<(), RegistryError> {
        match self.instances.write().remove(key) {
            Some(_) => info!(key = %key, "Instance deactivated"),
            None => debug!(key = %key, "Deactivate on absent key"),
        }
        Ok(())
    }

    /// Dispatch a live event to every matching instance that wants its kind.
    ///
    /// Results are published to the sink on the context's channel. A failure
    /// in one instance is logged and reported without affecting the others.
    pub fn route(&self, event: &MarketEvent) -> RouteReport {
        let started = Instant::now();
        let kind = event.kind();
        let mut report = RouteReport::default();

        let targets: Vec<(InstanceKey, Arc<Mutex<Instance>>)> = {
            let instances = self.instances.read();
            instances
                .iter()
                .filter(|(key, _)| key.matches(&event.context))
                .filter_map(|(key, slot)| {
                    if slot.required.contains(kind) {
                        Some((key.clone(), Arc::clone(&slot.instance)))
                    } else {
                        report.skipped += 1;
                        None
                    }
                })
                .collect()
        };

        let channel = event.context.channel_key();
        for (key, instance) in targets {
            let outcome = instance.lock().apply(event, None);
            report.delivered += 1;
            match outcome {
                Ok(Some(result)) => {
                    self.sink.publish_result(&channel, &key, &result);
                    report.results.push((key, result));
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(key = %key, kind = %kind, error = %error, "Computation step failed");
                    self.metrics.record_step_failure();
                    report.failures.push(RouteFailure { key, error });
                }
            }
        }

        self.metrics.record_filter_skips(report.skipped as u64);
        self.metrics
            .record_route(started.elapsed().as_nanos().min(u64::MAX as u128) as u64);
        report
    }

    /// Non-owning handles to every instance on `context`.
    pub fn borrow_context(&self, context: &MarketContext) -> Vec<SharedInstance> {
        self.instances
            .read()
            .iter()
            .filter(|(key, _)| key.matches(context))
            .map(|(key, slot)| SharedInstance::new(key.clone(), &slot.instance))
            .collect()
    }

    pub fn query(&self, filter: &InstanceFilter) -> Vec<InstanceInfo> {
        let matching: Vec<Arc<Mutex<Instance>>> = self
            .instances
            .read()
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(_, slot)| Arc::clone(&slot.instance))
            .collect();
        matching.iter().map(|i| i.lock().info()).collect()
    }

    pub fn info(&self, key: &InstanceKey) -> Result<InstanceInfo, RegistryError> {
        Ok(self.slot_instance(key)?.lock().info())
    }

    /// Most recent `limit` results, oldest first.
    pub fn results(&self, key: &InstanceKey, limit: usize) -> Result<Vec<ComputationResult>, RegistryError> {
        Ok(self.slot_instance(key)?.lock().results().tail(limit))
    }

    /// Distinct chart artifacts the instance has produced.
    pub fn artifacts(&self, key: &InstanceKey) -> Result<Vec<Annotation>, RegistryError> {
        Ok(self
            .slot_instance(key)?
            .lock()
            .results()
            .artifacts()
            .cloned()
            .collect())
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.instances.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    pub fn catalog(&self) -> &ComputationCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &Arc<dyn HistoricalDataSource> {
        &self.history
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn resolve(&self, computation_id: &str, params: &Params) -> Result<Arc<dyn DynComputation>, RegistryError> {
        let computation = self
            .catalog
            .get(computation_id)
            .ok_or_else(|| RegistryError::UnknownComputation {
                computation_id: computation_id.to_string(),
            })?;
        computation
            .validate_params(params)
            .map_err(|source| RegistryError::InvalidParameters {
                computation_id: computation_id.to_string(),
                source,
            })?;
        Ok(computation)
    }

    fn on_existing(&self, key: InstanceKey) -> Result<InstanceKey, RegistryError> {
        match self.config.activation_policy {
            ActivationPolicy::Idempotent => {
                debug!(key = %key, "Instance already active, reusing");
                Ok(key)
            }
            ActivationPolicy::Strict => Err(RegistryError::AlreadyActive { key: key.to_string() }),
        }
    }

    fn check_not_running_elsewhere(&self, key: &InstanceKey, wanted: &InstanceKey) -> Result<(), RegistryError> {
        match lookup(&self.instances.read(), wanted) {
            Lookup::Active(other) if other != *key => Err(RegistryError::AlreadyActive { key: other.to_string() }),
            _ => Ok(()),
        }
    }

    fn check_capacity(&self) -> Result<(), RegistryError> {
        if self.instances.read().len() >= self.config.max_instances {
            return Err(RegistryError::CapacityExceeded {
                limit: self.config.max_instances,
            });
        }
        Ok(())
    }

    fn slot_instance(&self, key: &InstanceKey) -> Result<Arc<Mutex<Instance>>, RegistryError> {
        self.instances
            .read()
            .get(key)
            .map(|slot| Arc::clone(&slot.instance))
            .ok_or_else(|| RegistryError::NotFound { key: key.to_string() })
    }

    fn backfill(
        &self,
        key: &InstanceKey,
        computation: Arc<dyn DynComputation>,
        params: Params,
        bars: Vec<Bar>,
    ) -> Result<Instance, RegistryError> {
        let needed = computation.minimum_history_length(&params);
        if bars.len() < needed {
            warn!(
                key = %key,
                bars = bars.len(),
                needed,
                "History shorter than minimum, instance starts cold"
            );
        }

        let context = key.context();
        let (feed, report) = BackfillInitializer::new(self.history.as_ref()).build_feed(
            &context,
            computation.required_event_types(),
            bars,
        )?;
        let instance = Instance::build(
            key.clone(),
            computation,
            params,
            Arc::new(feed),
            self.config.result_history_capacity,
        )
        .map_err(|e| RegistryError::BackfillFailure {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        self.metrics.record_backfill(report.events as u64);
        debug!(
            key = %key,
            events = report.events,
            trades = report.trades,
            snapshots = report.snapshots,
            elapsed_us = report.elapsed_us as u64,
            "Backfill complete"
        );
        Ok(instance)
    }
}
