//! Advisory oracle seam and the deterministic fallback
//!
//! The oracle explains and risk-scores a proposed policy. It may be
//! unavailable at any time; [`FallbackOracle`] always answers, with a
//! conservative non-zero estimate whose rationale starts with `FALLBACK`.

use alpha_core::{PolicyDocument, RiskSignal, UsageContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes of an advisory call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryError {
    #[error("ADVISORY/UNAVAILABLE: {0}")]
    Unavailable(String),

    #[error("ADVISORY/TIMEOUT: {0}")]
    Timeout(String),

    #[error("ADVISORY/MALFORMED: {0}")]
    MalformedResponse(String),

    #[error("ADVISORY/FATAL: {0}")]
    Fatal(String),
}

impl AdvisoryError {
    /// Whether the pipeline may substitute the fallback signal
    pub fn is_fallback_eligible(&self) -> bool {
        !matches!(self, AdvisoryError::Fatal(_))
    }
}

/// What the oracle returns for a proposed policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryResponse {
    pub risk_signal: RiskSignal,
    pub rationale: String,
    #[serde(default)]
    pub remediation_notes: Vec<String>,
    /// Revised policy, e.g. with condition values filled in. This is the
    /// only place permissions or conditions may be added; guardrails still
    /// run on it afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_policy: Option<PolicyDocument>,
}

impl AdvisoryResponse {
    pub fn new(risk_signal: RiskSignal, rationale: impl Into<String>) -> Self {
        Self {
            risk_signal,
            rationale: rationale.into(),
            remediation_notes: Vec::new(),
            revised_policy: None,
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.remediation_notes = notes;
        self
    }

    pub fn with_revised_policy(mut self, policy: PolicyDocument) -> Self {
        self.revised_policy = Some(policy);
        self
    }
}

/// Pluggable advisory capability
#[async_trait]
pub trait AdvisoryOracle: Send + Sync {
    /// Explain and risk-score `policy` given how it was derived.
    async fn evaluate(
        &self,
        policy: &PolicyDocument,
        usage: &UsageContext,
    ) -> Result<AdvisoryResponse, AdvisoryError>;

    /// Name used in logs and reports
    fn name(&self) -> &str {
        "oracle"
    }
}

/// Observation windows shorter than this are considered thin evidence
pub const SHORT_WINDOW_DAYS: u32 = 30;

/// Removing more actions than this is considered a large reduction
pub const LARGE_REDUCTION_ACTIONS: usize = 100;

/// A contribution to the fallback estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackFactor {
    pub name: String,
    pub impact: f64,
    pub recommendation: String,
}

/// Deterministic stand-in used when the oracle cannot answer
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOracle {
    pub base_probability: f64,
    pub short_window_increment: f64,
    pub large_reduction_increment: f64,
    pub max_probability: f64,
}

impl FallbackOracle {
    pub fn new() -> Self {
        Self {
            base_probability: 0.05,
            short_window_increment: 0.05,
            large_reduction_increment: 0.05,
            max_probability: 0.95,
        }
    }

    fn factors(&self, usage: &UsageContext) -> Vec<FallbackFactor> {
        let mut factors = Vec::new();

        if usage.observation_days < SHORT_WINDOW_DAYS {
            factors.push(FallbackFactor {
                name: "short_observation_window".to_string(),
                impact: self.short_window_increment,
                recommendation: format!(
                    "Extend the usage window to at least {} days before enforcing",
                    SHORT_WINDOW_DAYS
                ),
            });
        }

        let removed = usage
            .usage_diff
            .as_ref()
            .map(|d| d.removed_actions.len())
            .unwrap_or(0);
        if removed > LARGE_REDUCTION_ACTIONS {
            factors.push(FallbackFactor {
                name: "large_permission_reduction".to_string(),
                impact: self.large_reduction_increment,
                recommendation: format!(
                    "{} actions removed; keep the canary stage and watch denial rates",
                    removed
                ),
            });
        }

        factors
    }

    /// The fallback signal for `usage`, never failing.
    ///
    /// `reason` is what went wrong with the real oracle, if anything.
    pub fn signal(&self, usage: &UsageContext, reason: Option<&str>) -> AdvisoryResponse {
        let factors = self.factors(usage);
        let probability = (self.base_probability + factors.iter().map(|f| f.impact).sum::<f64>())
            .min(self.max_probability);

        let cause = reason.unwrap_or("advisory oracle not configured");
        let rationale = if factors.is_empty() {
            format!("FALLBACK: {}; baseline conservative estimate", cause)
        } else {
            let names: Vec<&str> = factors.iter().map(|f| f.name.as_str()).collect();
            format!(
                "FALLBACK: {}; conservative estimate raised for {}",
                cause,
                names.join(", ")
            )
        };

        let mut notes = vec!["Review the proposed policy manually; no advisory analysis ran".to_string()];
        notes.extend(factors.into_iter().map(|f| f.recommendation));

        AdvisoryResponse::new(
            RiskSignal::fallback(probability, rationale.clone()).with_notes(notes.clone()),
            rationale,
        )
        .with_notes(notes)
    }
}

impl Default for FallbackOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdvisoryOracle for FallbackOracle {
    async fn evaluate(
        &self,
        _policy: &PolicyDocument,
        usage: &UsageContext,
    ) -> Result<AdvisoryResponse, AdvisoryError> {
        Ok(self.signal(usage, None))
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
