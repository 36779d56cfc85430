//! Rollout stages
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered deployment stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Sandbox,
    Canary,
    Production,
}

impl StageKind {
    /// Conventional traffic share for the stage
    pub fn default_traffic_percent(&self) -> u8 {
        match self {
            StageKind::Sandbox => 0,
            StageKind::Canary => 10,
            StageKind::Production => 100,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StageKind::Sandbox => write!(f, "SANDBOX"),
            StageKind::Canary => write!(f, "CANARY"),
            StageKind::Production => write!(f, "PRODUCTION"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    InProgress,
    Healthy,
    Failed,
    RolledBack,
}

/// One row of a rollout plan: which stage, how much traffic, what threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagePlan {
    pub kind: StageKind,
    pub traffic_percent: u8,
    /// Maximum tolerated health metric (e.g. authorization-denial rate)
    pub health_threshold: f64,
}

impl StagePlan {
    pub fn new(kind: StageKind, health_threshold: f64) -> Self {
        Self {
            kind,
            traffic_percent: kind.default_traffic_percent(),
            health_threshold,
        }
    }

    /// Sandbox 0% / 0.05, Canary 10% / 0.02, Production 100% / 0.01
    pub fn default_plan() -> Vec<StagePlan> {
        vec![
            StagePlan::new(StageKind::Sandbox, 0.05),
            StagePlan::new(StageKind::Canary, 0.02),
            StagePlan::new(StageKind::Production, 0.01),
        ]
    }
}

/// Health samples seen during a stage's observation window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub samples: u32,
    pub failed_fetches: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak: Option<f64>,
}

impl MetricSnapshot {
    pub fn record(&mut self, value: f64) {
        self.samples += 1;
        self.last = Some(value);
        self.peak = Some(self.peak.map_or(value, |p| p.max(value)));
    }

    pub fn record_failure(&mut self) {
        self.failed_fetches += 1;
    }
}

/// A stage owned by one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStage {
    pub kind: StageKind,
    pub traffic_percent: u8,
    pub health_threshold: f64,
    pub status: StageStatus,
    #[serde(default)]
    pub metrics: MetricSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RolloutStage {
    pub fn from_plan(plan: &StagePlan) -> Self {
        Self {
            kind: plan.kind,
            traffic_percent: plan.traffic_percent,
            health_threshold: plan.health_threshold,
            status: StageStatus::Pending,
            metrics: MetricSnapshot::default(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn plan(&self) -> StagePlan {
        StagePlan {
            kind: self.kind,
            traffic_percent: self.traffic_percent,
            health_threshold: self.health_threshold,
        }
    }
}
