//! Data Model: RiskSignal, GuardrailViolation, PolicyDiff, PolicyProposal, ApprovalRecord
use crate::error::AlphaError;
use crate::policy::PolicyDocument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Where a risk signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Oracle,
    Fallback,
}

/// Advisory estimate that a proposed policy breaks existing workloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSignal {
    /// In [0, 1]
    pub probability_of_break: f64,
    pub confidence_rationale: String,
    #[serde(default)]
    pub remediation_notes: Vec<String>,
    pub source: SignalSource,
}

impl RiskSignal {
    /// Signal reported by the advisory oracle. Finite values are clamped
    /// into [0, 1]; NaN is kept so the gate can refuse it.
    pub fn from_oracle(probability_of_break: f64, rationale: impl Into<String>) -> Self {
        Self {
            probability_of_break: clamp_probability(probability_of_break),
            confidence_rationale: rationale.into(),
            remediation_notes: Vec::new(),
            source: SignalSource::Oracle,
        }
    }

    /// Signal substituted when the oracle could not answer
    pub fn fallback(probability_of_break: f64, rationale: impl Into<String>) -> Self {
        Self {
            probability_of_break: clamp_probability(probability_of_break),
            confidence_rationale: rationale.into(),
            remediation_notes: Vec::new(),
            source: SignalSource::Fallback,
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.remediation_notes = notes;
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.source == SignalSource::Fallback
    }

    /// Probability is a finite value in [0, 1]. Deserialized signals are not
    /// clamped, so this is checked wherever one is accepted.
    pub fn is_in_range(&self) -> bool {
        self.probability_of_break.is_finite() && (0.0..=1.0).contains(&self.probability_of_break)
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        p
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Guardrail finding codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    WildcardAction,
    BlockedAction,
    DisallowedService,
    MissingCondition,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCode::WildcardAction => "WILDCARD_ACTION",
            ViolationCode::BlockedAction => "BLOCKED_ACTION",
            ViolationCode::DisallowedService => "DISALLOWED_SERVICE",
            ViolationCode::MissingCondition => "MISSING_CONDITION",
        }
    }

    /// True when the guardrail removed something for this finding.
    /// MISSING_CONDITION is flag-only.
    pub fn strips(&self) -> bool {
        !matches!(self, ViolationCode::MissingCondition)
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementField {
    Action,
    Resource,
    Condition,
}

impl fmt::Display for StatementField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatementField::Action => write!(f, "Action"),
            StatementField::Resource => write!(f, "Resource"),
            StatementField::Condition => write!(f, "Condition"),
        }
    }
}

/// Locator into a policy document: `statement[2]` or `statement[2].Action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyPath {
    pub statement: usize,
    pub field: Option<StatementField>,
}

impl PolicyPath {
    pub fn statement(index: usize) -> Self {
        Self {
            statement: index,
            field: None,
        }
    }

    pub fn field(index: usize, field: StatementField) -> Self {
        Self {
            statement: index,
            field: Some(field),
        }
    }
}

impl fmt::Display for PolicyPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "statement[{}]", self.statement)?;
        if let Some(field) = self.field {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

impl FromStr for PolicyPath {
    type Err = AlphaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || AlphaError::ParseError(format!("invalid policy path '{}'", s));

        let rest = s.strip_prefix("statement[").ok_or_else(bad)?;
        let (index, tail) = rest.split_once(']').ok_or_else(bad)?;
        let statement: usize = index.parse().map_err(|_| bad())?;

        let field = match tail {
            "" => None,
            ".Action" => Some(StatementField::Action),
            ".Resource" => Some(StatementField::Resource),
            ".Condition" => Some(StatementField::Condition),
            _ => return Err(bad()),
        };

        Ok(Self { statement, field })
    }
}

impl Serialize for PolicyPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PolicyPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A recorded guardrail finding. Never raised as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailViolation {
    pub code: ViolationCode,
    pub message: String,
    pub path: PolicyPath,
}

impl GuardrailViolation {
    pub fn new(code: ViolationCode, message: impl Into<String>, path: PolicyPath) -> Self {
        Self {
            code,
            message: message.into(),
            path,
        }
    }
}

impl fmt::Display for GuardrailViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)
    }
}

/// Structural difference between two policy documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDiff {
    pub added_actions: BTreeSet<String>,
    pub removed_actions: BTreeSet<String>,
    pub added_resources: BTreeSet<String>,
    pub removed_resources: BTreeSet<String>,
    pub change_summary: String,
}

impl PolicyDiff {
    /// Build a diff and derive its summary from the action counts
    pub fn new(
        added_actions: BTreeSet<String>,
        removed_actions: BTreeSet<String>,
        added_resources: BTreeSet<String>,
        removed_resources: BTreeSet<String>,
    ) -> Self {
        let change_summary = format!(
            "+{} actions, -{} actions",
            added_actions.len(),
            removed_actions.len()
        );
        Self {
            added_actions,
            removed_actions,
            added_resources,
            removed_resources,
            change_summary,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_actions.is_empty()
            && self.removed_actions.is_empty()
            && self.added_resources.is_empty()
            && self.removed_resources.is_empty()
    }
}

/// Human or automated sign-off, created outside the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub approved: bool,
    pub approver: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub comments: String,
}

impl ApprovalRecord {
    pub fn approved(approver: impl Into<String>) -> Self {
        Self {
            approved: true,
            approver: approver.into(),
            timestamp: Utc::now(),
            comments: String::new(),
        }
    }

    pub fn rejected(approver: impl Into<String>) -> Self {
        Self {
            approved: false,
            ..Self::approved(approver)
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }
}

/// Collector metadata that travels with a usage-derived policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageContext {
    pub target_id: String,
    pub observation_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_diff: Option<PolicyDiff>,
}

impl UsageContext {
    pub fn new(target_id: impl Into<String>, observation_days: u32) -> Self {
        Self {
            target_id: target_id.into(),
            observation_days,
            usage_diff: None,
        }
    }

    pub fn with_usage_diff(mut self, diff: PolicyDiff) -> Self {
        self.usage_diff = Some(diff);
        self
    }
}

/// Hardened policy plus everything that went into deciding on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyProposal {
    pub proposed_policy: PolicyDocument,
    pub rationale: String,
    pub guardrail_violations: Vec<GuardrailViolation>,
    pub risk_signal: RiskSignal,
    pub remediation_notes: Vec<String>,
    pub fallback_used: bool,
}

impl PolicyProposal {
    pub fn has_violations(&self) -> bool {
        !self.guardrail_violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_path_display_and_parse() {
        let path = PolicyPath::field(2, StatementField::Action);
        assert_eq!(path.to_string(), "statement[2].Action");
        assert_eq!("statement[2].Action".parse::<PolicyPath>().unwrap(), path);
        assert_eq!("statement[0]".parse::<PolicyPath>().unwrap(), PolicyPath::statement(0));
        assert!("statement[x]".parse::<PolicyPath>().is_err());
        assert!("stmt[0]".parse::<PolicyPath>().is_err());
    }

    #[test]
    fn test_violation_serializes_code_and_path() {
        let violation = GuardrailViolation::new(
            ViolationCode::BlockedAction,
            "iam:PassRole is blocked",
            PolicyPath::field(0, StatementField::Action),
        );
        let json = serde_json::to_value(&violation).unwrap();
        assert_eq!(json["code"], "BLOCKED_ACTION");
        assert_eq!(json["path"], "statement[0].Action");
    }

    #[test]
    fn test_diff_summary_counts() {
        let added: BTreeSet<String> = ["s3:GetObject".to_string()].into_iter().collect();
        let removed: BTreeSet<String> = ["iam:*".to_string(), "ec2:*".to_string()].into_iter().collect();
        let diff = PolicyDiff::new(added, removed, BTreeSet::new(), BTreeSet::new());
        assert_eq!(diff.change_summary, "+1 actions, -2 actions");
        assert!(!diff.is_empty());
        assert!(PolicyDiff::new(BTreeSet::new(), BTreeSet::new(), BTreeSet::new(), BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_risk_signal_sources() {
        let oracle = RiskSignal::from_oracle(1.7, "confident");
        assert_eq!(oracle.probability_of_break, 1.0);
        assert!(!oracle.is_fallback());

        let fallback = RiskSignal::fallback(0.05, "FALLBACK: oracle unavailable");
        assert!(fallback.is_fallback());
        assert!(RiskSignal::from_oracle(f64::NAN, "bad").probability_of_break.is_nan());
    }

    #[test]
    fn test_risk_signal_camel_case() {
        let json = serde_json::to_value(RiskSignal::from_oracle(0.2, "r")).unwrap();
        assert!(json.get("probabilityOfBreak").is_some());
        assert_eq!(json["source"], "oracle");
    }

    #[test]
    fn test_rejected_approval() {
        let record = ApprovalRecord::rejected("alice").with_comments("too broad");
        assert!(!record.approved);
        assert_eq!(record.comments, "too broad");
    }
}
