//! Rollout configuration
use crate::error::RolloutError;
use crate::stage::StagePlan;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RolloutConfig {
    /// Delay between health samples
    pub poll_interval_ms: u64,

    /// How long each forward stage is observed
    pub observation_window_ms: u64,

    /// How long the restored policy is observed after a rollback
    pub rollback_window_ms: u64,

    /// Default for requests that do not say
    pub require_approval: bool,

    pub stages: Vec<StagePlan>,

    /// Health threshold applied while verifying a rollback
    pub rollback_health_threshold: f64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            observation_window_ms: 60_000,
            rollback_window_ms: 60_000,
            require_approval: false,
            stages: StagePlan::default_plan(),
            rollback_health_threshold: 0.05,
        }
    }
}

impl RolloutConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, RolloutError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| RolloutError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RolloutError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| RolloutError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// Short timings, for tests and local simulation
    pub fn fast() -> Self {
        Self {
            poll_interval_ms: 5,
            observation_window_ms: 30,
            rollback_window_ms: 30,
            ..Self::default()
        }
    }

    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn observation_window(&self) -> Duration {
        Duration::from_millis(self.observation_window_ms)
    }

    pub fn rollback_window(&self) -> Duration {
        Duration::from_millis(self.rollback_window_ms)
    }

    pub fn validate(&self) -> Result<(), RolloutError> {
        if self.stages.is_empty() {
            return Err(RolloutError::Config("stage plan is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(RolloutError::Config("poll interval must be positive".to_string()));
        }
        if !self.stages.windows(2).all(|w| w[0].kind < w[1].kind) {
            return Err(RolloutError::Config(
                "stages must be listed in rollout order without repeats".to_string(),
            ));
        }
        for stage in &self.stages {
            if stage.traffic_percent > 100 {
                return Err(RolloutError::Config(format!(
                    "{} traffic {}% exceeds 100",
                    stage.kind, stage.traffic_percent
                )));
            }
            if !stage.health_threshold.is_finite() || stage.health_threshold < 0.0 {
                return Err(RolloutError::Config(format!(
                    "{} health threshold must be a non-negative number",
                    stage.kind
                )));
            }
        }
        if !self.rollback_health_threshold.is_finite() || self.rollback_health_threshold < 0.0 {
            return Err(RolloutError::Config(
                "rollback health threshold must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}
