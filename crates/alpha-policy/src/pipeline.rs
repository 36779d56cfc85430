//! Hardening pipeline
//!
//! ```text
//! observed policy ──→ diff vs baseline ──→ oracle (or fallback) ──→ guardrails ──→ gate
//!                                                                      ↓            ↓
//!                                                                  sanitized    verdict + exit code
//! ```

use crate::diff::diff;
use crate::gate::{GateDecision, RiskGate};
use crate::guardrail::enforce;
use crate::oracle::{AdvisoryError, AdvisoryOracle, AdvisoryResponse, FallbackOracle};
use crate::preset::GuardrailConfig;
use alpha_core::{
    AlphaError, PipelineContext, PolicyDiff, PolicyDocument, PolicyProposal, UsageContext,
    ALPHA_VERSION,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Collector output for one target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardeningInput {
    pub usage: UsageContext,
    /// Permissions derived from observed usage
    pub observed_policy: PolicyDocument,
    /// Currently attached policy, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<PolicyDocument>,
}

impl HardeningInput {
    pub fn new(usage: UsageContext, observed_policy: PolicyDocument) -> Self {
        Self {
            usage,
            observed_policy,
            baseline: None,
        }
    }

    pub fn with_baseline(mut self, baseline: PolicyDocument) -> Self {
        self.baseline = Some(baseline);
        self
    }

    fn validate(&self) -> Result<(), AlphaError> {
        if self.usage.target_id.trim().is_empty() {
            return Err(AlphaError::InvalidInput("target id is empty".to_string()));
        }
        if self.usage.observation_days == 0 {
            return Err(AlphaError::InvalidInput(
                "observation window must be at least one day".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the pipeline decided for one input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub trace_id: String,
    pub target_id: String,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Absent only when the pipeline failed before producing a policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<PolicyProposal>,
    /// Baseline → sanitized policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<PolicyDiff>,
    pub decision: GateDecision,
}

impl PipelineReport {
    pub fn exit_code(&self) -> i32 {
        self.decision.exit_code
    }

    pub fn fallback_used(&self) -> bool {
        self.proposal.as_ref().is_some_and(|p| p.fallback_used)
    }
}

/// Wires diff, oracle, guardrails and gate together
#[derive(Debug, Clone)]
pub struct HardeningPipeline {
    pub guardrails: GuardrailConfig,
    pub gate: RiskGate,
    pub fallback: FallbackOracle,
    pub oracle_timeout: Duration,
}

impl HardeningPipeline {
    pub fn new(guardrails: GuardrailConfig) -> Self {
        Self {
            guardrails,
            gate: RiskGate::new(),
            fallback: FallbackOracle::new(),
            oracle_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_gate(mut self, gate: RiskGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    async fn consult(
        &self,
        oracle: &dyn AdvisoryOracle,
        policy: &PolicyDocument,
        usage: &UsageContext,
    ) -> Result<AdvisoryResponse, AdvisoryError> {
        let advice = match tokio::time::timeout(self.oracle_timeout, oracle.evaluate(policy, usage)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AdvisoryError::Timeout(format!(
                    "no answer within {}ms",
                    self.oracle_timeout.as_millis()
                )))
            }
        };
        if !advice.risk_signal.is_in_range() {
            return Err(AdvisoryError::MalformedResponse(format!(
                "probability of break {} is outside [0, 1]",
                advice.risk_signal.probability_of_break
            )));
        }
        Ok(advice)
    }

    /// Run the pipeline. Failures are reported through the ToolError verdict
    /// rather than an `Err`, so every call yields an exit code.
    pub async fn run(&self, input: &HardeningInput, oracle: &dyn AdvisoryOracle) -> PipelineReport {
        let ctx = PipelineContext::new(input.usage.target_id.clone());
        let clock = Instant::now();

        let finish = |proposal: Option<PolicyProposal>,
                      diff: Option<PolicyDiff>,
                      decision: GateDecision| PipelineReport {
            trace_id: ctx.trace_id.clone(),
            target_id: ctx.target_id.clone(),
            engine_version: ALPHA_VERSION.to_string(),
            started_at: ctx.started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            proposal,
            diff,
            decision,
        };

        if let Err(e) = input.validate() {
            error!(trace_id = %ctx.trace_id, error = %e, "Rejected malformed pipeline input");
            return finish(None, None, GateDecision::tool_error(e.to_string()));
        }

        let usage_diff = diff(input.baseline.as_ref(), &input.observed_policy);
        let usage = input.usage.clone().with_usage_diff(usage_diff);

        let (advice, fallback_used) = match self.consult(oracle, &input.observed_policy, &usage).await {
            Ok(advice) => (advice, false),
            Err(e) if e.is_fallback_eligible() => {
                warn!(
                    trace_id = %ctx.trace_id,
                    target = %ctx.target_id,
                    oracle = oracle.name(),
                    error = %e,
                    "Advisory oracle failed, using fallback risk signal"
                );
                (self.fallback.signal(&usage, Some(&e.to_string())), true)
            }
            Err(e) => {
                error!(trace_id = %ctx.trace_id, target = %ctx.target_id, error = %e, "Advisory oracle failed fatally");
                return finish(None, None, GateDecision::tool_error(e.to_string()));
            }
        };

        let candidate = advice
            .revised_policy
            .clone()
            .unwrap_or_else(|| input.observed_policy.clone());
        let report = enforce(&candidate, &self.guardrails);
        let final_diff = diff(input.baseline.as_ref(), &report.sanitized);
        let decision = self.gate.evaluate(Some(&advice.risk_signal), &report.violations);

        info!(
            trace_id = %ctx.trace_id,
            target = %ctx.target_id,
            preset = %report.preset,
            violations = report.violations.len(),
            verdict = %decision.verdict,
            summary = %final_diff.change_summary,
            "Pipeline decision"
        );

        let proposal = PolicyProposal {
            proposed_policy: report.sanitized,
            rationale: advice.rationale,
            guardrail_violations: report.violations,
            risk_signal: advice.risk_signal,
            remediation_notes: advice.remediation_notes,
            fallback_used,
        };

        finish(Some(proposal), Some(final_diff), decision)
    }

    /// Run with no external oracle; the fallback answers.
    pub async fn run_offline(&self, input: &HardeningInput) -> PipelineReport {
        let fallback = self.fallback.clone();
        self.run(input, &fallback).await
    }
}

impl Default for HardeningPipeline {
    fn default() -> Self {
        Self::new(GuardrailConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Verdict;
    use crate::preset::PresetName;
    use alpha_core::{PolicyStatement, RiskSignal};
    use async_trait::async_trait;

    struct FixedOracle(Result<AdvisoryResponse, AdvisoryError>);

    #[async_trait]
    impl AdvisoryOracle for FixedOracle {
        async fn evaluate(
            &self,
            _policy: &PolicyDocument,
            _usage: &UsageContext,
        ) -> Result<AdvisoryResponse, AdvisoryError> {
            self.0.clone()
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl AdvisoryOracle for SlowOracle {
        async fn evaluate(
            &self,
            _policy: &PolicyDocument,
            _usage: &UsageContext,
        ) -> Result<AdvisoryResponse, AdvisoryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(AdvisoryError::Unavailable("never".into()))
        }
    }

    fn regional_read() -> PolicyDocument {
        PolicyDocument::new(vec![PolicyStatement::allow(["s3:GetObject"])
            .unwrap()
            .with_resources(["arn:aws:s3:::logs/*"])
            .with_condition("StringEquals", "aws:RequestedRegion", ["us-east-1"])])
    }

    fn input(policy: PolicyDocument) -> HardeningInput {
        HardeningInput::new(UsageContext::new("role/app", 90), policy)
    }

    fn prod() -> HardeningPipeline {
        HardeningPipeline::new(GuardrailConfig::new(PresetName::Prod))
    }

    #[tokio::test]
    async fn test_safe_with_oracle() {
        let oracle = FixedOracle(Ok(AdvisoryResponse::new(
            RiskSignal::from_oracle(0.02, "matches usage"),
            "observed reads only",
        )));
        let report = prod().run(&input(regional_read()), &oracle).await;

        assert_eq!(report.exit_code(), 0);
        assert!(!report.fallback_used());
        assert_eq!(report.diff.as_ref().unwrap().change_summary, "+1 actions, -0 actions");
    }

    #[tokio::test]
    async fn test_unavailable_oracle_falls_back() {
        let oracle = FixedOracle(Err(AdvisoryError::Unavailable("503".into())));
        let report = prod().run(&input(regional_read()), &oracle).await;

        assert!(report.fallback_used());
        let proposal = report.proposal.as_ref().unwrap();
        assert!(proposal.risk_signal.is_fallback());
        assert!(proposal.rationale.starts_with("FALLBACK"));
        // base fallback estimate is within the default threshold
        assert_eq!(report.decision.verdict, Verdict::Safe);
    }

    #[tokio::test]
    async fn test_out_of_range_signal_falls_back() {
        let signal: RiskSignal = serde_json::from_value(serde_json::json!({
            "probabilityOfBreak": -0.4,
            "confidenceRationale": "negative",
            "source": "oracle"
        }))
        .unwrap();
        let oracle = FixedOracle(Ok(AdvisoryResponse::new(signal, "unbounded")));
        let report = prod().run(&input(regional_read()), &oracle).await;

        assert!(report.fallback_used());
        let proposal = report.proposal.unwrap();
        assert!(proposal.risk_signal.is_fallback());
        assert!(proposal.rationale.contains("MALFORMED"));
    }

    #[tokio::test]
    async fn test_fatal_oracle_is_tool_error() {
        let oracle = FixedOracle(Err(AdvisoryError::Fatal("denied".into())));
        let report = prod().run(&input(regional_read()), &oracle).await;
        assert_eq!(report.exit_code(), 1);
        assert!(report.proposal.is_none());
    }

    #[tokio::test]
    async fn test_slow_oracle_times_out_to_fallback() {
        let pipeline = prod().with_oracle_timeout(Duration::from_millis(20));
        let report = pipeline.run(&input(regional_read()), &SlowOracle).await;
        assert!(report.fallback_used());
        assert!(report.proposal.unwrap().rationale.contains("TIMEOUT"));
    }

    #[tokio::test]
    async fn test_admin_policy_blocked() {
        let admin = PolicyDocument::new(vec![PolicyStatement::allow(["*"]).unwrap().with_resources(["*"])]);
        let report = prod().run_offline(&input(admin)).await;

        assert_eq!(report.exit_code(), 3);
        assert!(report.proposal.unwrap().proposed_policy.is_empty());
    }

    #[tokio::test]
    async fn test_revised_policy_is_still_guarded() {
        let revised = PolicyDocument::new(vec![PolicyStatement::allow(["s3:GetObject", "iam:PassRole"])
            .unwrap()
            .with_resources(["arn:x"])
            .with_condition("StringEquals", "aws:RequestedRegion", ["us-east-1"])]);
        let oracle = FixedOracle(Ok(AdvisoryResponse::new(RiskSignal::from_oracle(0.01, "ok"), "added region")
            .with_revised_policy(revised)));

        let report = prod().run(&input(regional_read()), &oracle).await;
        assert_eq!(report.decision.verdict, Verdict::Blocked);
        let proposal = report.proposal.unwrap();
        assert!(!proposal.proposed_policy.actions().contains("iam:PassRole"));
    }

    #[tokio::test]
    async fn test_malformed_input() {
        let mut bad = input(regional_read());
        bad.usage.observation_days = 0;
        assert_eq!(prod().run_offline(&bad).await.exit_code(), 1);

        let mut bad = input(regional_read());
        bad.usage.target_id = "  ".into();
        assert_eq!(prod().run_offline(&bad).await.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_risky_oracle() {
        let oracle = FixedOracle(Ok(AdvisoryResponse::new(RiskSignal::from_oracle(0.4, "batch jobs"), "monthly jobs unseen")));
        let report = prod().run(&input(regional_read()), &oracle).await;
        assert_eq!(report.exit_code(), 2);
    }
}
