//! Rollout executions and requests
use crate::config::RolloutConfig;
use crate::error::RolloutError;
use crate::stage::{MetricSnapshot, RolloutStage, StageKind, StageStatus};
use crate::transition::{transition, RolloutEvent, RolloutState, SideEffect};
use alpha_core::{ApprovalRecord, PolicyDocument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall execution status, derived from the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    pub fn from_state(state: &RolloutState) -> Self {
        match state {
            RolloutState::Pending => ExecutionStatus::Pending,
            RolloutState::Completed => ExecutionStatus::Completed,
            RolloutState::RolledBack { .. } => ExecutionStatus::RolledBack,
            RolloutState::Failed { .. } => ExecutionStatus::Failed,
            _ => ExecutionStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::RolledBack
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "PENDING"),
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Completed => write!(f, "COMPLETED"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
            ExecutionStatus::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Rollout request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutRequest {
    pub target_id: String,
    pub proposed_policy: PolicyDocument,
    /// Falls back to the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
    /// Canary traffic, 1..=100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_percent: Option<u8>,
    /// Health threshold applied to every stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_threshold: Option<f64>,
}

impl RolloutRequest {
    pub fn new(target_id: impl Into<String>, proposed_policy: PolicyDocument) -> Self {
        Self {
            target_id: target_id.into(),
            proposed_policy,
            require_approval: None,
            canary_percent: None,
            rollback_threshold: None,
        }
    }

    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.require_approval = Some(required);
        self
    }

    pub fn with_canary_percent(mut self, percent: u8) -> Self {
        self.canary_percent = Some(percent);
        self
    }

    pub fn with_rollback_threshold(mut self, threshold: f64) -> Self {
        self.rollback_threshold = Some(threshold);
        self
    }

    pub fn validate(&self) -> Result<(), RolloutError> {
        if self.target_id.trim().is_empty() {
            return Err(RolloutError::InvalidRequest("target id is empty".to_string()));
        }
        if let Some(pct) = self.canary_percent {
            if !(1..=100).contains(&pct) {
                return Err(RolloutError::InvalidRequest(format!(
                    "canary percent {} outside 1..=100",
                    pct
                )));
            }
        }
        if let Some(threshold) = self.rollback_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(RolloutError::InvalidRequest(
                    "rollback threshold must be a non-negative number".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Stage list for this request: the configured plan with overrides applied
    pub fn build_stages(&self, config: &RolloutConfig) -> Vec<RolloutStage> {
        config
            .stages
            .iter()
            .map(|plan| {
                let mut stage = RolloutStage::from_plan(plan);
                if let (StageKind::Canary, Some(pct)) = (stage.kind, self.canary_percent) {
                    stage.traffic_percent = pct;
                }
                if let Some(threshold) = self.rollback_threshold {
                    stage.health_threshold = threshold;
                }
                stage
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanAction {
    Attach,
    Restore,
    Detach,
}

/// One external action issued, or projected, for an execution.
///
/// Carries a policy fingerprint rather than the document so live and dry-run
/// plans compare directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub sequence: u32,
    pub action: PlanAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKind>,
    pub traffic_percent: u8,
    pub health_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_fingerprint: Option<String>,
}

/// A policy rollout against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutExecution {
    pub id: String,
    pub target_resource_id: String,
    pub proposed_policy: PolicyDocument,
    /// Snapshot taken at submission; `None` means nothing was attached
    pub previous_policy: Option<PolicyDocument>,
    pub stages: Vec<RolloutStage>,
    pub current_stage_index: usize,
    pub overall_status: ExecutionStatus,
    pub state: RolloutState,
    pub require_approval: bool,
    /// Threshold used while verifying a rollback
    pub rollback_health_threshold: f64,
    /// Samples taken while verifying a rollback
    #[serde(default)]
    pub rollback_metrics: MetricSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRecord>,
    #[serde(default)]
    pub plan: Vec<PlanEntry>,
    /// Drift and other advisory observations made during the run
    #[serde(default)]
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RolloutExecution {
    pub fn new(
        request: &RolloutRequest,
        previous_policy: Option<PolicyDocument>,
        config: &RolloutConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_resource_id: request.target_id.clone(),
            proposed_policy: request.proposed_policy.clone(),
            previous_policy,
            stages: request.build_stages(config),
            current_stage_index: 0,
            overall_status: ExecutionStatus::Pending,
            state: RolloutState::Pending,
            require_approval: request.require_approval.unwrap_or(config.require_approval),
            rollback_health_threshold: config.rollback_health_threshold,
            rollback_metrics: MetricSnapshot::default(),
            approval: None,
            plan: Vec::new(),
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True once approval is not needed or an approving record is attached
    pub fn is_approved(&self) -> bool {
        !self.require_approval || self.approval.as_ref().is_some_and(|a| a.approved)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Final reason for RolledBack and Failed executions
    pub fn reason(&self) -> Option<&str> {
        self.state.reason()
    }

    pub fn current_stage(&self) -> Option<&RolloutStage> {
        self.stages.get(self.current_stage_index)
    }

    /// Feed an event through the state machine and update stages to match.
    pub fn apply(&mut self, event: &RolloutEvent) -> Option<SideEffect> {
        let previous = self.state.clone();
        let (next, effect) = transition(&previous, event, self.stages.len());
        if next == previous {
            return None;
        }

        let now = Utc::now();
        if let RolloutState::Observing { stage } = previous {
            if matches!(next, RolloutState::Attaching { .. } | RolloutState::Completed) {
                self.mark_stage(stage, StageStatus::Healthy, now);
            }
        }

        match &next {
            RolloutState::Attaching { stage } => {
                self.current_stage_index = *stage;
                if let Some(s) = self.stages.get_mut(*stage) {
                    s.status = StageStatus::InProgress;
                    s.started_at = Some(now);
                }
            }
            RolloutState::RolledBack { .. } | RolloutState::Failed { .. } => {
                let status = if matches!(next, RolloutState::Failed { .. }) {
                    StageStatus::Failed
                } else {
                    StageStatus::RolledBack
                };
                if let Some(stage) = previous.stage() {
                    self.mark_stage(stage, status, now);
                }
            }
            _ => {}
        }

        self.state = next;
        self.overall_status = ExecutionStatus::from_state(&self.state);
        self.updated_at = now;
        effect
    }

    fn mark_stage(&mut self, index: usize, status: StageStatus, at: DateTime<Utc>) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.status = status;
            stage.finished_at = Some(at);
        }
    }

    pub fn record_plan(&mut self, action: PlanAction, stage: Option<usize>) {
        let entry_stage = stage.and_then(|i| self.stages.get(i));
        let (kind, traffic_percent, health_threshold, fingerprint) = match (action, entry_stage) {
            (PlanAction::Attach, Some(s)) => (
                Some(s.kind),
                s.traffic_percent,
                s.health_threshold,
                Some(self.proposed_policy.fingerprint()),
            ),
            (PlanAction::Attach, None) => (None, 0, 0.0, Some(self.proposed_policy.fingerprint())),
            (PlanAction::Restore, _) => (
                None,
                100,
                self.rollback_health_threshold,
                self.previous_policy.as_ref().map(PolicyDocument::fingerprint),
            ),
            (PlanAction::Detach, _) => (None, 0, self.rollback_health_threshold, None),
        };

        self.plan.push(PlanEntry {
            sequence: self.plan.len() as u32 + 1,
            action,
            stage: kind,
            traffic_percent,
            health_threshold,
            policy_fingerprint: fingerprint,
        });
    }
}
