//! Guardrail enforcement
//!
//! Rules run statement by statement in a fixed order:
//!
//! ```text
//! Allow statement → Wildcard → BlockedAction → DisallowedService → RequiredCondition
//!                      ↓             ↓                 ↓                   ↓
//!                 strip entries  strip entries   drop statement       flag only
//! ```
//!
//! Stripping runs before the condition check, so a statement removed by an
//! earlier rule never produces a MISSING_CONDITION finding. Deny statements
//! are passed through untouched. The engine only removes or flags; it never
//! adds actions or condition values.

use crate::preset::{GuardrailConfig, GuardrailPreset};
use alpha_core::{
    is_bare_wildcard, service_of, GuardrailViolation, PolicyDocument, PolicyPath, PolicyStatement,
    StatementField, ViolationCode,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One step of the guardrail pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailRule {
    Wildcard,
    BlockedAction,
    DisallowedService,
    RequiredCondition,
}

impl GuardrailRule {
    /// Evaluation order
    pub const ORDER: [GuardrailRule; 4] = [
        GuardrailRule::Wildcard,
        GuardrailRule::BlockedAction,
        GuardrailRule::DisallowedService,
        GuardrailRule::RequiredCondition,
    ];

    pub fn code(&self) -> ViolationCode {
        match self {
            GuardrailRule::Wildcard => ViolationCode::WildcardAction,
            GuardrailRule::BlockedAction => ViolationCode::BlockedAction,
            GuardrailRule::DisallowedService => ViolationCode::DisallowedService,
            GuardrailRule::RequiredCondition => ViolationCode::MissingCondition,
        }
    }

    /// Apply the rule to one statement. `None` in the result means the
    /// statement is gone from the sanitized document.
    fn apply(
        &self,
        preset: &GuardrailPreset,
        index: usize,
        statement: PolicyStatement,
        violations: &mut Vec<GuardrailViolation>,
    ) -> Option<PolicyStatement> {
        match self {
            GuardrailRule::Wildcard => check_wildcards(preset, index, statement, violations),
            GuardrailRule::BlockedAction => check_blocked(preset, index, statement, violations),
            GuardrailRule::DisallowedService => {
                check_disallowed(preset, index, statement, violations)
            }
            GuardrailRule::RequiredCondition => {
                check_conditions(preset, index, &statement, violations);
                Some(statement)
            }
        }
    }
}

/// Sanitized document plus every finding, in rule order per statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailReport {
    pub preset: String,
    pub sanitized: PolicyDocument,
    pub violations: Vec<GuardrailViolation>,
}

impl GuardrailReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn count(&self, code: ViolationCode) -> usize {
        self.violations.iter().filter(|v| v.code == code).count()
    }

    /// Findings for which something was removed
    pub fn stripping_violations(&self) -> impl Iterator<Item = &GuardrailViolation> {
        self.violations.iter().filter(|v| v.code.strips())
    }
}

/// Enforce the configured preset (plus overrides) on `policy`.
///
/// Never fails. An empty policy yields an empty policy and no findings.
pub fn enforce(policy: &PolicyDocument, config: &GuardrailConfig) -> GuardrailReport {
    enforce_preset(policy, &config.effective_preset())
}

/// Enforce an already-resolved rule bundle
pub fn enforce_preset(policy: &PolicyDocument, preset: &GuardrailPreset) -> GuardrailReport {
    if preset.is_empty() {
        return GuardrailReport {
            preset: preset.name.clone(),
            sanitized: policy.clone(),
            violations: Vec::new(),
        };
    }

    let mut violations = Vec::new();
    let mut kept = Vec::with_capacity(policy.len());

    for (index, statement) in policy.statements().iter().enumerate() {
        if !statement.is_allow() {
            kept.push(statement.clone());
            continue;
        }

        let mut current = Some(statement.clone());
        for rule in GuardrailRule::ORDER {
            current = match current {
                Some(s) => rule.apply(preset, index, s, &mut violations),
                None => break,
            };
        }

        if let Some(s) = current {
            kept.push(s);
        }
    }

    GuardrailReport {
        preset: preset.name.clone(),
        sanitized: policy.with_statements(kept),
        violations,
    }
}

fn lowercase_set(items: &BTreeSet<String>) -> BTreeSet<String> {
    items.iter().map(|s| s.to_ascii_lowercase()).collect()
}

fn joined(actions: &[String]) -> String {
    actions.join(", ")
}

fn check_wildcards(
    preset: &GuardrailPreset,
    index: usize,
    statement: PolicyStatement,
    violations: &mut Vec<GuardrailViolation>,
) -> Option<PolicyStatement> {
    if !preset.deny_wildcards {
        return Some(statement);
    }

    let sensitive = lowercase_set(&preset.sensitive_services);
    let open_resource = statement.has_wildcard_resource();

    let offending = |action: &str| {
        is_bare_wildcard(action)
            || (open_resource && service_of(action).is_some_and(|svc| sensitive.contains(&svc)))
    };

    let stripped: Vec<String> = statement
        .actions()
        .iter()
        .filter(|a| offending(a.as_str()))
        .cloned()
        .collect();

    if stripped.is_empty() {
        return Some(statement);
    }

    let message = if statement.has_wildcard_action() {
        format!("wildcard action removed: {}", joined(&stripped))
    } else {
        format!(
            "sensitive actions on wildcard resource removed: {}",
            joined(&stripped)
        )
    };
    violations.push(GuardrailViolation::new(
        ViolationCode::WildcardAction,
        message,
        PolicyPath::field(index, StatementField::Action),
    ));

    statement.retain_actions(|a| !offending(a))
}

/// Case-insensitive match of `action` against a deny-list `entry`.
///
/// Wildcards work in both directions: entry `iam:*` blocks `iam:PassRole`,
/// and action `iam:*` is blocked by entry `iam:PassRole` since it grants it.
pub fn action_matches(action: &str, entry: &str) -> bool {
    let action = action.to_ascii_lowercase();
    let entry = entry.to_ascii_lowercase();
    glob_match(&entry, &action) || glob_match(&action, &entry)
}

fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

fn check_blocked(
    preset: &GuardrailPreset,
    index: usize,
    statement: PolicyStatement,
    violations: &mut Vec<GuardrailViolation>,
) -> Option<PolicyStatement> {
    if preset.blocked_actions.is_empty() {
        return Some(statement);
    }

    let blocked_by = |action: &str| {
        preset
            .blocked_actions
            .iter()
            .find(|entry| action_matches(action, entry))
    };

    let mut any = false;
    for action in statement.actions() {
        if let Some(entry) = blocked_by(action.as_str()) {
            any = true;
            violations.push(GuardrailViolation::new(
                ViolationCode::BlockedAction,
                format!("{} removed (blocked by {})", action, entry),
                PolicyPath::field(index, StatementField::Action),
            ));
        }
    }

    if !any {
        return Some(statement);
    }
    statement.retain_actions(|a| blocked_by(a).is_none())
}

fn check_disallowed(
    preset: &GuardrailPreset,
    index: usize,
    statement: PolicyStatement,
    violations: &mut Vec<GuardrailViolation>,
) -> Option<PolicyStatement> {
    let disallowed = lowercase_set(&preset.disallowed_services);
    let hits: Vec<String> = statement
        .services()
        .into_iter()
        .filter(|svc| disallowed.contains(svc))
        .collect();

    if hits.is_empty() {
        return Some(statement);
    }

    violations.push(GuardrailViolation::new(
        ViolationCode::DisallowedService,
        format!("statement dropped, disallowed service: {}", joined(&hits)),
        PolicyPath::statement(index),
    ));
    None
}

fn check_conditions(
    preset: &GuardrailPreset,
    index: usize,
    statement: &PolicyStatement,
    violations: &mut Vec<GuardrailViolation>,
) {
    if preset.required_condition_keys.is_empty() {
        return;
    }

    let satisfied = preset
        .required_condition_keys
        .iter()
        .any(|key| statement.has_condition_key(key));

    if !satisfied {
        let keys: Vec<String> = preset.required_condition_keys.iter().cloned().collect();
        violations.push(GuardrailViolation::new(
            ViolationCode::MissingCondition,
            format!("statement must set a condition on one of: {}", joined(&keys)),
            PolicyPath::field(index, StatementField::Condition),
        ));
    }
}
