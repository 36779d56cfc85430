//! Structural policy comparison
//!
//! Documents are flattened into `(effect, action, resource)` keys and compared
//! as sets, so statement order and statement grouping never show up as change.

use alpha_core::{is_bare_wildcard, Effect, PolicyDiff, PolicyDocument};
use std::collections::BTreeSet;

/// Single sentinel for every spelling of the all-actions wildcard
const WILDCARD_KEY: &str = "*";

/// Stand-in resource for statements that name none
const NO_RESOURCE: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PermissionKey {
    effect: Effect,
    action: String,
    resource: String,
}

fn normalize_action(action: &str) -> String {
    if is_bare_wildcard(action) {
        WILDCARD_KEY.to_string()
    } else {
        action.to_string()
    }
}

fn flatten(doc: &PolicyDocument) -> BTreeSet<PermissionKey> {
    let mut keys = BTreeSet::new();

    for statement in doc.statements() {
        let resources: Vec<&str> = if statement.resources().is_empty() {
            vec![NO_RESOURCE]
        } else {
            statement.resources().iter().map(String::as_str).collect()
        };

        for action in statement.actions() {
            for resource in &resources {
                keys.insert(PermissionKey {
                    effect: statement.effect(),
                    action: normalize_action(action),
                    resource: resource.to_string(),
                });
            }
        }
    }

    keys
}

fn project<'a, I>(keys: I) -> (BTreeSet<String>, BTreeSet<String>)
where
    I: Iterator<Item = &'a PermissionKey>,
{
    let mut actions = BTreeSet::new();
    let mut resources = BTreeSet::new();
    for key in keys {
        actions.insert(key.action.clone());
        if key.resource != NO_RESOURCE {
            resources.insert(key.resource.clone());
        }
    }
    (actions, resources)
}

/// Difference from `baseline` to `proposed`. A missing baseline counts as
/// the empty document, so every proposed action is reported as added.
pub fn diff(baseline: Option<&PolicyDocument>, proposed: &PolicyDocument) -> PolicyDiff {
    let before = baseline.map(flatten).unwrap_or_default();
    let after = flatten(proposed);

    let (added_actions, added_resources) = project(after.difference(&before));
    let (removed_actions, removed_resources) = project(before.difference(&after));

    PolicyDiff::new(added_actions, removed_actions, added_resources, removed_resources)
}

/// Diff between two present documents
pub fn diff_documents(baseline: &PolicyDocument, proposed: &PolicyDocument) -> PolicyDiff {
    diff(Some(baseline), proposed)
}
