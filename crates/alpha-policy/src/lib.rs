//! ALPHA Policy: diff, guardrails, risk gate and drift
//!
//! Everything here except the pipeline is a pure function over policy
//! documents and safe to call from any number of tasks at once.
//!
//! # Architecture
//!
//! ```text
//! baseline ─┐
//!           ├─→ diff ──→ oracle / fallback ──→ guardrails ──→ gate ──→ exit code
//! observed ─┘                                      ↓
//!                                             violations
//! ```
//!
//! # Example
//!
//! ```
//! use alpha_core::{PolicyDocument, PolicyStatement, RiskSignal};
//! use alpha_policy::{enforce, GuardrailConfig, PresetName, RiskGate, Verdict};
//!
//! let policy = PolicyDocument::new(vec![
//!     PolicyStatement::allow(["*"]).unwrap().with_resources(["*"]),
//! ]);
//!
//! let report = enforce(&policy, &GuardrailConfig::new(PresetName::Prod));
//! assert!(report.sanitized.is_empty());
//!
//! let signal = RiskSignal::from_oracle(0.0, "no observed callers");
//! let decision = RiskGate::new().evaluate(Some(&signal), &report.violations);
//! assert_eq!(decision.verdict, Verdict::Blocked);
//! assert_eq!(decision.exit_code, 3);
//! ```

pub mod audit;
pub mod diff;
pub mod drift;
pub mod gap;
pub mod gate;
pub mod guardrail;
pub mod oracle;
pub mod pipeline;
pub mod preset;

pub use audit::{AuditEntry, AuditEventType, AuditLog, AuditStats};
pub use diff::{diff, diff_documents};
pub use drift::{detect, DriftReport};
pub use gap::{granted_action_count, rank_privilege_gaps, GapInput, GapSeverity, PrivilegeGap};
pub use gate::{GateDecision, RiskGate, Verdict, DEFAULT_RISK_THRESHOLD};
pub use guardrail::{action_matches, enforce, enforce_preset, GuardrailReport, GuardrailRule};
pub use oracle::{AdvisoryError, AdvisoryOracle, AdvisoryResponse, FallbackOracle};
pub use pipeline::{HardeningInput, HardeningPipeline, PipelineReport};
pub use preset::{GuardrailConfig, GuardrailPreset, PresetName};

use alpha_core::{PolicyDocument, RiskSignal};

/// Quick check: guardrails under `preset`, then the default gate.
pub fn check_policy(policy: &PolicyDocument, preset: PresetName, risk: &RiskSignal) -> GateDecision {
    let report = enforce(policy, &GuardrailConfig::new(preset));
    RiskGate::new().evaluate(Some(risk), &report.violations)
}

/// Returns `true` if `policy` passes `preset` untouched.
pub fn is_compliant(policy: &PolicyDocument, preset: PresetName) -> bool {
    enforce(policy, &GuardrailConfig::new(preset)).is_clean()
}
