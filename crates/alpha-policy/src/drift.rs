//! Drift detection: out-of-band changes to the live policy
use crate::diff::diff_documents;
use alpha_core::{PolicyDiff, PolicyDocument};
use serde::{Deserialize, Serialize};

/// Diff from the last proposed policy to the live one. Advisory only;
/// nothing here blocks a rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    #[serde(flatten)]
    pub diff: PolicyDiff,
    pub has_drift: bool,
}

impl DriftReport {
    /// Actions someone granted outside the pipeline
    pub fn unauthorized_grants(&self) -> impl Iterator<Item = &String> {
        self.diff.added_actions.iter()
    }
}

pub fn detect(last_proposed: &PolicyDocument, current_live: &PolicyDocument) -> DriftReport {
    let diff = diff_documents(last_proposed, current_live);
    let has_drift = !diff.is_empty();
    DriftReport { diff, has_drift }
}
