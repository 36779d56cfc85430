//! Decision audit trail
//!
//! Records every pipeline decision and rollout outcome for later review.

use crate::gate::Verdict;
use crate::pipeline::PipelineReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Hardening pipeline verdict
    PipelineDecision,
    /// Terminal rollout state
    RolloutOutcome,
    /// Approval attached to an execution
    Approval,
}

/// An audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub target_id: String,

    /// Gate verdict or rollout status, upper-case
    pub verdict: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default)]
    pub fallback_used: bool,

    #[serde(default)]
    pub violations: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl AuditEntry {
    fn new(event_type: AuditEventType, target_id: impl Into<String>, verdict: impl Into<String>) -> Self {
        Self {
            id: format!("aud_{}", uuid::Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            event_type,
            target_id: target_id.into(),
            verdict: verdict.into(),
            exit_code: None,
            fallback_used: false,
            violations: Vec::new(),
            execution_id: None,
            reason: None,
            actor: None,
        }
    }

    pub fn from_report(report: &PipelineReport) -> Self {
        let mut entry = Self::new(
            AuditEventType::PipelineDecision,
            &report.target_id,
            report.decision.verdict.to_string(),
        );
        entry.exit_code = Some(report.exit_code());
        entry.fallback_used = report.fallback_used();
        entry.reason = Some(report.decision.reason.clone());
        entry.violations = report
            .proposal
            .iter()
            .flat_map(|p| p.guardrail_violations.iter().map(|v| v.to_string()))
            .collect();
        entry
    }

    /// Terminal rollout state, e.g. `COMPLETED` or `ROLLED_BACK`
    pub fn rollout(
        target_id: impl Into<String>,
        execution_id: impl Into<String>,
        status: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        let mut entry = Self::new(AuditEventType::RolloutOutcome, target_id, status);
        entry.execution_id = Some(execution_id.into());
        entry.reason = reason;
        entry
    }

    pub fn approval(
        target_id: impl Into<String>,
        execution_id: impl Into<String>,
        approved: bool,
        approver: impl Into<String>,
    ) -> Self {
        let verdict = if approved { "APPROVED" } else { "REJECTED" };
        let mut entry = Self::new(AuditEventType::Approval, target_id, verdict);
        entry.execution_id = Some(execution_id.into());
        entry.actor = Some(approver.into());
        entry
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Bounded in-memory audit log
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    max_entries: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_max_entries(10_000)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries: max,
        }
    }

    /// Log an entry, dropping the oldest ones past the limit
    pub fn log(&mut self, entry: AuditEntry) -> String {
        let id = entry.id.clone();
        self.entries.push(entry);

        if self.entries.len() > self.max_entries {
            let drain_count = self.entries.len() - self.max_entries;
            self.entries.drain(0..drain_count);
        }
        id
    }

    pub fn log_report(&mut self, report: &PipelineReport) -> String {
        self.log(AuditEntry::from_report(report))
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn entries_for_target(&self, target_id: &str) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.target_id == target_id)
            .collect()
    }

    pub fn entries_since(&self, since: DateTime<Utc>) -> Vec<&AuditEntry> {
        self.entries.iter().filter(|e| e.timestamp >= since).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries)
    }

    /// Export to JSON Lines
    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stats(&self) -> AuditStats {
        let decisions: Vec<&AuditEntry> = self
            .entries
            .iter()
            .filter(|e| e.event_type == AuditEventType::PipelineDecision)
            .collect();
        let count = |verdict: Verdict| {
            decisions
                .iter()
                .filter(|e| e.exit_code == Some(verdict.exit_code()))
                .count()
        };
        let outcome = |status: &str| {
            self.entries
                .iter()
                .filter(|e| e.event_type == AuditEventType::RolloutOutcome && e.verdict == status)
                .count()
        };

        let total = decisions.len();
        let blocked = count(Verdict::Blocked);
        let fallbacks = decisions.iter().filter(|e| e.fallback_used).count();

        AuditStats {
            decisions: total,
            safe: count(Verdict::Safe),
            risky: count(Verdict::Risky),
            blocked,
            tool_errors: count(Verdict::ToolError),
            completed: outcome("COMPLETED"),
            rolled_back: outcome("ROLLED_BACK"),
            failed: outcome("FAILED"),
            block_rate: if total > 0 { blocked as f64 / total as f64 } else { 0.0 },
            fallback_rate: if total > 0 { fallbacks as f64 / total as f64 } else { 0.0 },
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about audit entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub decisions: usize,
    pub safe: usize,
    pub risky: usize,
    pub blocked: usize,
    pub tool_errors: usize,
    pub completed: usize,
    pub rolled_back: usize,
    pub failed: usize,
    pub block_rate: f64,
    pub fallback_rate: f64,
}
