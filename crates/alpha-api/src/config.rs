//! Server configuration from the environment
use alpha_policy::PresetName;
use alpha_rollout::RolloutConfig;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8787";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG/INVALID: {name}={value}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("CONFIG/ROLLOUT: {0}")]
    Rollout(#[from] alpha_rollout::RolloutError),

    #[error("CONFIG/STORE: {0}")]
    Store(#[from] alpha_rollout::StoreError),

    #[error("CONFIG/METRICS: {0}")]
    Metrics(#[from] prometheus::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// ALPHA_ADDR
    pub addr: String,
    /// ALPHA_STATE_DIR; executions stay in memory when unset
    pub state_dir: Option<PathBuf>,
    /// ALPHA_ROLLOUT_CONFIG, a YAML file
    pub rollout_config_path: Option<PathBuf>,
    /// ALPHA_GUARDRAIL_PRESET
    pub guardrail_preset: PresetName,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            state_dir: None,
            rollout_config_path: None,
            guardrail_preset: PresetName::Prod,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("ALPHA_ADDR") {
            config.addr = addr;
        }
        config.state_dir = get("ALPHA_STATE_DIR").map(PathBuf::from);
        config.rollout_config_path = get("ALPHA_ROLLOUT_CONFIG").map(PathBuf::from);
        if let Some(preset) = get("ALPHA_GUARDRAIL_PRESET") {
            config.guardrail_preset = preset.parse().map_err(|e: alpha_core::AlphaError| {
                ConfigError::Invalid {
                    name: "ALPHA_GUARDRAIL_PRESET",
                    value: preset.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(config)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Rollout timings and stage plan, defaults when no file is configured
    pub fn rollout_config(&self) -> Result<RolloutConfig, ConfigError> {
        match &self.rollout_config_path {
            Some(path) => Ok(RolloutConfig::from_file(path)?),
            None => Ok(RolloutConfig::default()),
        }
    }
}
