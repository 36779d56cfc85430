//! Risk gate: the final verdict and its exit code
//!
//! Decision table, first match wins:
//!
//! | condition                                   | verdict   | exit |
//! |---------------------------------------------|-----------|------|
//! | no usable risk signal                       | ToolError | 1    |
//! | any guardrail violation                     | Blocked   | 3    |
//! | probability of break above the threshold    | Risky     | 2    |
//! | otherwise                                   | Safe      | 0    |
//!
//! The threshold is configurable; the precedence is not.

use alpha_core::{GuardrailViolation, RiskSignal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default probability-of-break threshold
pub const DEFAULT_RISK_THRESHOLD: f64 = 0.10;

/// Gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Safe,
    ToolError,
    Risky,
    Blocked,
}

impl Verdict {
    /// Exit code external automation keys on
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Safe => 0,
            Verdict::ToolError => 1,
            Verdict::Risky => 2,
            Verdict::Blocked => 3,
        }
    }

    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Verdict::Safe),
            1 => Some(Verdict::ToolError),
            2 => Some(Verdict::Risky),
            3 => Some(Verdict::Blocked),
            _ => None,
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::Safe => write!(f, "SAFE"),
            Verdict::ToolError => write!(f, "TOOL_ERROR"),
            Verdict::Risky => write!(f, "RISKY"),
            Verdict::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Gate output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub verdict: Verdict,
    pub exit_code: i32,
    pub reason: String,
}

impl GateDecision {
    fn new(verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            exit_code: verdict.exit_code(),
            reason: reason.into(),
        }
    }

    /// Decision for a pipeline that could not produce a policy or signal
    pub fn tool_error(reason: impl Into<String>) -> Self {
        Self::new(Verdict::ToolError, reason)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (exit {}): {}", self.verdict, self.exit_code, self.reason)
    }
}

/// Combines the advisory signal with guardrail findings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskGate {
    pub risk_threshold: f64,
}

impl RiskGate {
    pub fn new() -> Self {
        Self {
            risk_threshold: DEFAULT_RISK_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.risk_threshold = threshold;
        self
    }

    /// `risk` is `None` when upstream failed in a way the fallback does not
    /// cover. A probability outside [0, 1] is treated the same way.
    pub fn evaluate(
        &self,
        risk: Option<&RiskSignal>,
        violations: &[GuardrailViolation],
    ) -> GateDecision {
        let risk = match risk {
            Some(r) if r.is_in_range() => r,
            Some(r) => {
                return GateDecision::tool_error(format!(
                    "risk signal {} is outside [0, 1]",
                    r.probability_of_break
                ))
            }
            None => return GateDecision::tool_error("no risk signal available"),
        };

        if !violations.is_empty() {
            return GateDecision::new(
                Verdict::Blocked,
                format!("{} guardrail violation(s)", violations.len()),
            );
        }

        if risk.probability_of_break > self.risk_threshold {
            return GateDecision::new(
                Verdict::Risky,
                format!(
                    "probability of break {:.4} exceeds {:.2}",
                    risk.probability_of_break, self.risk_threshold
                ),
            );
        }

        GateDecision::new(
            Verdict::Safe,
            format!(
                "probability of break {:.4} within {:.2}",
                risk.probability_of_break, self.risk_threshold
            ),
        )
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_core::{PolicyPath, ViolationCode};

    fn blocked() -> GuardrailViolation {
        GuardrailViolation::new(ViolationCode::BlockedAction, "iam:PassRole", PolicyPath::statement(0))
    }

    #[test]
    fn test_violations_beat_low_risk() {
        let gate = RiskGate::new();
        let signal = RiskSignal::from_oracle(0.0, "none");
        let decision = gate.evaluate(Some(&signal), &[blocked()]);
        assert_eq!(decision.verdict, Verdict::Blocked);
        assert_eq!(decision.exit_code, 3);
    }

    #[test]
    fn test_threshold_boundary() {
        let gate = RiskGate::new();
        let at = RiskSignal::from_oracle(0.10, "edge");
        let over = RiskSignal::from_oracle(0.1000001, "edge");
        assert_eq!(gate.evaluate(Some(&at), &[]).exit_code, 0);
        assert_eq!(gate.evaluate(Some(&over), &[]).exit_code, 2);
    }

    #[test]
    fn test_missing_signal_is_tool_error() {
        let gate = RiskGate::new();
        assert_eq!(gate.evaluate(None, &[blocked()]).verdict, Verdict::ToolError);

        let nan = RiskSignal::from_oracle(f64::NAN, "broken");
        assert_eq!(gate.evaluate(Some(&nan), &[]).exit_code, 1);

        let negative: RiskSignal = serde_json::from_value(serde_json::json!({
            "probabilityOfBreak": -0.4,
            "confidenceRationale": "unbounded",
            "source": "oracle"
        }))
        .unwrap();
        assert_eq!(gate.evaluate(Some(&negative), &[]).verdict, Verdict::ToolError);
    }

    #[test]
    fn test_custom_threshold() {
        let gate = RiskGate::new().with_threshold(0.5);
        let signal = RiskSignal::from_oracle(0.3, "moderate");
        assert!(gate.evaluate(Some(&signal), &[]).verdict.is_safe());
    }

    #[test]
    fn test_exit_codes_round_trip() {
        for verdict in [Verdict::Safe, Verdict::ToolError, Verdict::Risky, Verdict::Blocked] {
            assert_eq!(Verdict::from_exit_code(verdict.exit_code()), Some(verdict));
        }
        assert_eq!(Verdict::from_exit_code(7), None);
    }
}
