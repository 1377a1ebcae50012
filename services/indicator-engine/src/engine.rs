//! Engine facade
//!
//! Wires configuration, metrics, the computation catalog, history, the
//! broadcast sink, the instance registry and the replay service together.

use std::sync::Arc;

use tracing::info;
use types::errors::{EngineError, RegistryError};
use types::events::{Bar, MarketEvent};
use types::ids::InstanceKey;
use types::market::MarketContext;
use types::params::Params;

use crate::catalog::ComputationCatalog;
use crate::config::EngineConfig;
use crate::history::{HistoricalDataSource, HistoryWindow};
use crate::metrics::EngineMetrics;
use crate::registry::{InstanceRegistry, RouteReport};
use crate::replay::ReplayService;
use crate::sink::BroadcastSink;

pub struct IndicatorEngine {
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
    registry: Arc<InstanceRegistry>,
    replay: ReplayService,
}

impl IndicatorEngine {
    pub fn new(
        config: EngineConfig,
        catalog: ComputationCatalog,
        history: Arc<dyn HistoricalDataSource>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let registry = Arc::new(
            InstanceRegistry::new(catalog, history, Arc::clone(&sink))
                .with_config(config.registry.clone())
                .with_metrics(Arc::clone(&metrics)),
        );
        let replay = ReplayService::new(Arc::clone(&registry), sink).with_config(config.replay.clone());

        info!(
            computations = ?registry.catalog().ids(),
            max_instances = config.registry.max_instances,
            max_sessions = config.replay.max_sessions,
            "Indicator engine initialized"
        );

        Ok(Self {
            config,
            metrics,
            registry,
            replay,
        })
    }

    /// Activate using the context's full bar history for backfill.
    pub fn activate(
        &self,
        context: &MarketContext,
        computation_id: &str,
        params: Params,
    ) -> Result<InstanceKey, EngineError> {
        let bars = self.history_bars(context)?;
        Ok(self.registry.activate(context, computation_id, params, bars)?)
    }

    /// Activate with caller-supplied backfill bars.
    pub fn activate_with_bars(
        &self,
        context: &MarketContext,
        computation_id: &str,
        params: Params,
        bars: Vec<Bar>,
    ) -> Result<InstanceKey, EngineError> {
        Ok(self.registry.activate(context, computation_id, params, bars)?)
    }

    pub fn update_params(&self, key: &InstanceKey, params: Params) -> Result<InstanceKey, EngineError> {
        Ok(self.registry.update_params(key, params)?)
    }

    pub fn deactivate(&self, key: &InstanceKey) -> Result<(), EngineError> {
        Ok(self.registry.deactivate(key)?)
    }

    pub fn route(&self, event: &MarketEvent) -> RouteReport {
        self.registry.route(event)
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn replay(&self) -> &ReplayService {
        &self.replay
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop all replay sessions.
    pub fn shutdown(&self) {
        self.replay.shutdown();
        info!(instances = self.registry.len(), "Indicator engine shut down");
    }

    fn history_bars(&self, context: &MarketContext) -> Result<Vec<Bar>, RegistryError> {
        self.registry
            .history()
            .bars(context, HistoryWindow::unbounded())
            .map_err(RegistryError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::sink::NullSink;
    use rust_decimal::Decimal;
    use types::errors::ErrorKind;
    use types::market::Granularity;

    fn engine(config: EngineConfig) -> Result<IndicatorEngine, EngineError> {
        let history = Arc::new(InMemoryHistory::new());
        let ctx = MarketContext::new("binance", "BTCUSDT", Granularity::M1);
        history.insert_bars(
            &ctx,
            (0..10).map(|i| Bar::flat(Decimal::from(100 + i), i * 60_000, (i + 1) * 60_000)),
        );
        IndicatorEngine::new(config, ComputationCatalog::with_builtins(), history, Arc::new(NullSink))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.replay.max_sessions = 0;
        let err = engine(config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_activate_backfills_from_history() {
        let engine = engine(EngineConfig::default()).unwrap();
        let ctx = MarketContext::new("binance", "BTCUSDT", Granularity::M1);
        let key = engine.activate(&ctx, "sma", Params::new().with("period", 3)).unwrap();
        let info = engine.registry().info(&key).unwrap();
        assert_eq!(info.update_count, 10);
        assert!(info.warmed_up);

        engine.deactivate(&key).unwrap();
        assert!(engine.registry().is_empty());
    }
}
