//! End-to-end hardening scenarios through the public API

use alpha_core::{PolicyDocument, PolicyStatement, RiskSignal, UsageContext, ViolationCode};
use alpha_policy::{
    detect, enforce, AuditLog, GuardrailConfig, HardeningInput, HardeningPipeline, PresetName,
    RiskGate, Verdict,
};

// =============================================================================
// Fixtures
// =============================================================================

fn admin_policy() -> PolicyDocument {
    PolicyDocument::from_json(
        r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": "*", "Resource": "*"}]}"#,
    )
    .unwrap()
}

fn observed_usage() -> PolicyDocument {
    PolicyDocument::from_json(
        r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:ListBucket", "dynamodb:Query"],
                "Resource": ["arn:aws:s3:::reports", "arn:aws:s3:::reports/*", "arn:aws:dynamodb:us-east-1:1:table/orders"],
                "Condition": {"StringEquals": {"aws:RequestedRegion": "us-east-1"}}
            }]
        }"#,
    )
    .unwrap()
}

// =============================================================================
// Guardrails + gate
// =============================================================================

#[test]
fn test_admin_policy_under_prod_exits_blocked() {
    let report = enforce(&admin_policy(), &GuardrailConfig::new(PresetName::Prod));

    assert!(report.sanitized.is_empty());
    assert!(report.count(ViolationCode::WildcardAction) >= 1);

    let signal = RiskSignal::from_oracle(0.0, "no callers observed");
    let decision = RiskGate::new().evaluate(Some(&signal), &report.violations);
    assert_eq!(decision.exit_code, 3);
}

#[test]
fn test_single_blocked_action_beats_zero_risk() {
    let policy = PolicyDocument::new(vec![PolicyStatement::allow(["iam:PassRole", "s3:GetObject"])
        .unwrap()
        .with_resources(["arn:aws:s3:::reports/*"])]);
    let report = enforce(&policy, &GuardrailConfig::new(PresetName::Sandbox));
    assert_eq!(report.violations.len(), 1);

    let signal = RiskSignal::from_oracle(0.0, "safe");
    assert_eq!(RiskGate::new().evaluate(Some(&signal), &report.violations).exit_code, 3);
}

// =============================================================================
// Pipeline
// =============================================================================

#[tokio::test]
async fn test_minimization_against_admin_baseline() {
    let input = HardeningInput::new(UsageContext::new("role/reporting", 90), observed_usage())
        .with_baseline(admin_policy());

    let pipeline = HardeningPipeline::new(GuardrailConfig::new(PresetName::Prod));
    let report = pipeline.run_offline(&input).await;

    assert_eq!(report.decision.verdict, Verdict::Safe);
    let diff = report.diff.as_ref().unwrap();
    assert_eq!(diff.change_summary, "+3 actions, -1 actions");
    assert!(diff.removed_actions.contains("*"));

    let mut audit = AuditLog::new();
    audit.log_report(&report);
    assert_eq!(audit.stats().safe, 1);
    assert!((audit.stats().fallback_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_short_window_raises_fallback_estimate() {
    let input = HardeningInput::new(UsageContext::new("role/reporting", 3), observed_usage())
        .with_baseline(admin_policy());
    let report = HardeningPipeline::new(GuardrailConfig::new(PresetName::Prod))
        .run_offline(&input)
        .await;

    let signal = &report.proposal.as_ref().unwrap().risk_signal;
    assert!(signal.probability_of_break > 0.05);
    assert!(signal.is_fallback());
}

// =============================================================================
// Drift
// =============================================================================

#[test]
fn test_drift_detection() {
    let proposed = observed_usage();
    assert!(!detect(&proposed, &proposed).has_drift);

    let live = PolicyDocument::new(
        proposed
            .statements()
            .iter()
            .cloned()
            .chain(std::iter::once(
                PolicyStatement::allow(["s3:DeleteObject"])
                    .unwrap()
                    .with_resources(["arn:aws:s3:::reports/*"]),
            ))
            .collect(),
    );
    let report = detect(&proposed, &live);
    assert!(report.has_drift);
    assert_eq!(report.diff.added_actions.len(), 1);
    assert!(report.diff.added_actions.contains("s3:DeleteObject"));
}
