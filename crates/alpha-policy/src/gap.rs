//! Privilege-gap ranking across targets
//!
//! Granted vs used action counts, sorted so the most over-permissioned
//! targets come first.

use alpha_core::PolicyDocument;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Count assigned to a policy granting the bare wildcard
pub const ADMIN_GRANT_COUNT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for GapSeverity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GapSeverity::Low => write!(f, "LOW"),
            GapSeverity::Medium => write!(f, "MEDIUM"),
            GapSeverity::High => write!(f, "HIGH"),
        }
    }
}

/// Input row: one target and what it was granted and used
#[derive(Debug, Clone)]
pub struct GapInput {
    pub target_id: String,
    pub granted: PolicyDocument,
    pub used_actions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegeGap {
    pub target_id: String,
    pub granted: usize,
    pub used: usize,
    pub gap: usize,
    pub administrator: bool,
    pub severity: GapSeverity,
}

/// Distinct Allow actions; the bare wildcard counts as [`ADMIN_GRANT_COUNT`].
pub fn granted_action_count(policy: &PolicyDocument) -> (usize, bool) {
    let allows = policy.statements().iter().filter(|s| s.is_allow());
    let mut actions = BTreeSet::new();
    let mut administrator = false;

    for statement in allows {
        administrator |= statement.has_wildcard_action();
        actions.extend(statement.actions().iter().map(String::as_str));
    }

    if administrator {
        (ADMIN_GRANT_COUNT, true)
    } else {
        (actions.len(), false)
    }
}

fn severity(gap: usize, administrator: bool) -> GapSeverity {
    if administrator || gap > 100 {
        GapSeverity::High
    } else if gap > 20 {
        GapSeverity::Medium
    } else {
        GapSeverity::Low
    }
}

/// Rank targets by gap, descending. Administrators sort first; ties keep
/// input order.
pub fn rank_privilege_gaps(rows: &[GapInput]) -> Vec<PrivilegeGap> {
    let mut gaps: Vec<PrivilegeGap> = rows
        .iter()
        .map(|row| {
            let (granted, administrator) = granted_action_count(&row.granted);
            let gap = granted.saturating_sub(row.used_actions);
            PrivilegeGap {
                target_id: row.target_id.clone(),
                granted,
                used: row.used_actions,
                gap,
                administrator,
                severity: severity(gap, administrator),
            }
        })
        .collect();

    gaps.sort_by(|a, b| {
        b.administrator
            .cmp(&a.administrator)
            .then_with(|| b.gap.cmp(&a.gap))
    });
    gaps
}
