//! Shared server state
use crate::config::{ApiConfig, ConfigError};
use crate::metrics::ApiMetrics;
use alpha_policy::{AdvisoryOracle, AuditLog, FallbackOracle, GuardrailConfig, HardeningPipeline};
use alpha_rollout::{
    ExecutionStore, FileStore, InMemoryApplier, InMemoryStore, MetricsSource, PolicyApplier,
    RolloutConfig, RolloutController, StaticMetrics,
};
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct AppState {
    pub pipeline: HardeningPipeline,
    pub oracle: Arc<dyn AdvisoryOracle>,
    pub controller: Arc<RolloutController>,
    pub audit: Arc<Mutex<AuditLog>>,
    pub metrics: ApiMetrics,
}

impl AppState {
    pub fn new(
        pipeline: HardeningPipeline,
        oracle: Arc<dyn AdvisoryOracle>,
        controller: RolloutController,
        audit: Arc<Mutex<AuditLog>>,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            pipeline,
            oracle,
            controller: Arc::new(controller),
            audit,
            metrics: ApiMetrics::new()?,
        })
    }

    /// Self-contained server: fallback oracle, in-memory applier, healthy metrics.
    ///
    /// Executions go to a file store when `state_dir` is configured.
    pub fn local(config: &ApiConfig) -> Result<Self, ConfigError> {
        let rollout = config.rollout_config()?;
        let store: Arc<dyn ExecutionStore> = match &config.state_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "using file execution store");
                Arc::new(FileStore::open(dir)?)
            }
            None => Arc::new(InMemoryStore::new()),
        };
        Self::with_collaborators(
            GuardrailConfig::new(config.guardrail_preset),
            rollout,
            store,
            Arc::new(InMemoryApplier::new()),
            Arc::new(StaticMetrics(0.0)),
        )
    }

    pub fn with_collaborators(
        guardrails: GuardrailConfig,
        rollout: RolloutConfig,
        store: Arc<dyn ExecutionStore>,
        applier: Arc<dyn PolicyApplier>,
        metrics: Arc<dyn MetricsSource>,
    ) -> Result<Self, ConfigError> {
        let audit = Arc::new(Mutex::new(AuditLog::new()));
        let controller =
            RolloutController::new(store, applier, metrics, rollout).with_audit_log(audit.clone());
        Ok(Self::new(
            HardeningPipeline::new(guardrails),
            Arc::new(FallbackOracle::new()),
            controller,
            audit,
        )?)
    }
}
