//! Policy documents and statements
//!
//! IAM-shaped value types. `Action`, `Resource` and condition values accept a
//! single string or an array on input and are always written back as arrays.

use crate::error::AlphaError;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Schema tag written into every document this crate builds
pub const POLICY_VERSION: &str = "2012-10-17";

const WILDCARD: &str = "*";

/// Operator name → condition key → accepted values
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "Allow"),
            Effect::Deny => write!(f, "Deny"),
        }
    }
}

/// True for the all-services wildcard (`*` or `*:*`).
///
/// `service:*` is a service-scoped grant, not a bare wildcard.
pub fn is_bare_wildcard(action: &str) -> bool {
    action == WILDCARD || action == "*:*"
}

/// Service prefix of an action (`s3:GetObject` → `s3`), lowercased.
pub fn service_of(action: &str) -> Option<String> {
    let (service, rest) = action.split_once(':')?;
    if service.is_empty() || rest.is_empty() || service == WILDCARD {
        return None;
    }
    Some(service.to_ascii_lowercase())
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStatement")]
pub struct PolicyStatement {
    #[serde(rename = "Sid", skip_serializing_if = "Option::is_none")]
    sid: Option<String>,

    #[serde(rename = "Effect")]
    effect: Effect,

    #[serde(rename = "Action")]
    actions: BTreeSet<String>,

    #[serde(rename = "Resource")]
    resources: Vec<String>,

    #[serde(rename = "Condition", skip_serializing_if = "BTreeMap::is_empty")]
    conditions: ConditionBlock,
}

impl PolicyStatement {
    /// Build a statement; fails when no non-empty action is given.
    pub fn new<I, S>(effect: Effect, actions: I) -> Result<Self, AlphaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let actions: BTreeSet<String> = actions
            .into_iter()
            .map(|a| a.into().trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        if actions.is_empty() {
            return Err(AlphaError::MalformedPolicy(
                "statement must grant or deny at least one action".to_string(),
            ));
        }

        Ok(Self {
            sid: None,
            effect,
            actions,
            resources: Vec::new(),
            conditions: BTreeMap::new(),
        })
    }

    pub fn allow<I, S>(actions: I) -> Result<Self, AlphaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Effect::Allow, actions)
    }

    pub fn deny<I, S>(actions: I) -> Result<Self, AlphaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Effect::Deny, actions)
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Append resources, keeping first-seen order and dropping duplicates.
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for resource in resources {
            let resource = resource.into();
            if !resource.is_empty() && !self.resources.contains(&resource) {
                self.resources.push(resource);
            }
        }
        self
    }

    pub fn with_condition<I, S>(
        mut self,
        operator: impl Into<String>,
        key: impl Into<String>,
        values: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions
            .entry(operator.into())
            .or_default()
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn actions(&self) -> &BTreeSet<String> {
        &self.actions
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn conditions(&self) -> &ConditionBlock {
        &self.conditions
    }

    pub fn is_allow(&self) -> bool {
        self.effect == Effect::Allow
    }

    pub fn has_wildcard_action(&self) -> bool {
        self.actions.iter().any(|a| is_bare_wildcard(a))
    }

    /// True when the resource set is exactly the bare wildcard.
    pub fn has_wildcard_resource(&self) -> bool {
        self.resources.len() == 1 && self.resources[0] == WILDCARD
    }

    /// Distinct services referenced by the statement's actions
    pub fn services(&self) -> BTreeSet<String> {
        self.actions.iter().filter_map(|a| service_of(a)).collect()
    }

    /// Condition keys compare case-insensitively, under any operator.
    pub fn has_condition_key(&self, key: &str) -> bool {
        self.conditions
            .values()
            .flat_map(|keys| keys.keys())
            .any(|k| k.eq_ignore_ascii_case(key))
    }

    /// Copy of this statement keeping only the actions `keep` accepts.
    ///
    /// Returns `None` when nothing survives, since an actionless statement
    /// is not a valid statement.
    pub fn retain_actions<F>(&self, mut keep: F) -> Option<Self>
    where
        F: FnMut(&str) -> bool,
    {
        let actions: BTreeSet<String> = self
            .actions
            .iter()
            .filter(|a| keep(a.as_str()))
            .cloned()
            .collect();

        if actions.is_empty() {
            return None;
        }

        Some(Self {
            actions,
            ..self.clone()
        })
    }
}

/// Wire shape accepted on input; validated into [`PolicyStatement`].
#[derive(Deserialize)]
struct RawStatement {
    #[serde(rename = "Sid", default)]
    sid: Option<String>,

    #[serde(rename = "Effect")]
    effect: Effect,

    #[serde(rename = "Action", default, deserialize_with = "one_or_many")]
    actions: Vec<String>,

    #[serde(rename = "Resource", default, deserialize_with = "one_or_many")]
    resources: Vec<String>,

    #[serde(rename = "Condition", default)]
    conditions: BTreeMap<String, BTreeMap<String, OneOrMany>>,
}

impl TryFrom<RawStatement> for PolicyStatement {
    type Error = AlphaError;

    fn try_from(raw: RawStatement) -> Result<Self, Self::Error> {
        let mut statement = PolicyStatement::new(raw.effect, raw.actions)?.with_resources(raw.resources);
        statement.sid = raw.sid;

        for (operator, keys) in raw.conditions {
            for (key, values) in keys {
                statement = statement.with_condition(operator.clone(), key, values.into_vec());
            }
        }

        Ok(statement)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Flag(bool),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Flag(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.into_string()],
            OneOrMany::Many(items) => items.into_iter().map(Scalar::into_string).collect(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(OneOrMany::deserialize(deserializer)?.into_vec())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatementList {
    One(Box<PolicyStatement>),
    Many(Vec<PolicyStatement>),
}

fn statement_list<'de, D>(deserializer: D) -> Result<Vec<PolicyStatement>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StatementList::deserialize(deserializer)? {
        StatementList::One(statement) => vec![*statement],
        StatementList::Many(statements) => statements,
    })
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

/// A complete policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", default = "default_version")]
    version: String,

    #[serde(rename = "Statement", default, deserialize_with = "statement_list")]
    statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: default_version(),
            statements,
        }
    }

    /// The document with no statements; stands in for a missing baseline.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Parse an IAM JSON document
    pub fn from_json(json: &str) -> Result<Self, AlphaError> {
        serde_json::from_str(json).map_err(|e| AlphaError::ParseError(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, AlphaError> {
        serde_json::to_string_pretty(self).map_err(|e| AlphaError::ParseError(e.to_string()))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// New document with the same schema tag and the given statements
    pub fn with_statements(&self, statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: self.version.clone(),
            statements,
        }
    }

    /// Distinct actions across all statements
    pub fn actions(&self) -> BTreeSet<&str> {
        self.statements
            .iter()
            .flat_map(|s| s.actions.iter().map(String::as_str))
            .collect()
    }

    pub fn has_wildcard_action(&self) -> bool {
        self.statements.iter().any(PolicyStatement::has_wildcard_action)
    }

    /// Content fingerprint, `blake3:<hex>`.
    ///
    /// Built from a canonical rendering (sorted actions and conditions,
    /// statement order preserved) so equal documents hash equal.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.version.as_bytes());

        for statement in &self.statements {
            hasher.update(b"\x1e");
            hasher.update(statement.effect.to_string().as_bytes());
            for action in &statement.actions {
                hasher.update(b"\x1fA");
                hasher.update(action.as_bytes());
            }
            for resource in &statement.resources {
                hasher.update(b"\x1fR");
                hasher.update(resource.as_bytes());
            }
            for (operator, keys) in &statement.conditions {
                for (key, values) in keys {
                    hasher.update(b"\x1fC");
                    hasher.update(operator.as_bytes());
                    hasher.update(b"\x1f");
                    hasher.update(key.as_bytes());
                    for value in values {
                        hasher.update(b"\x1f");
                        hasher.update(value.as_bytes());
                    }
                }
            }
        }

        format!("blake3:{}", hasher.finalize())
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_string_fields() {
        let doc = PolicyDocument::from_json(
            r#"{
                "Version": "2012-10-17",
                "Statement": [
                    {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "arn:aws:s3:::bucket/*"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.len(), 1);
        let statement = &doc.statements()[0];
        assert!(statement.actions().contains("s3:GetObject"));
        assert_eq!(statement.resources(), ["arn:aws:s3:::bucket/*".to_string()]);
    }

    #[test]
    fn test_parse_conditions_with_scalars() {
        let doc = PolicyDocument::from_json(
            r#"{
                "Statement": [{
                    "Effect": "Allow",
                    "Action": ["s3:PutObject"],
                    "Resource": "*",
                    "Condition": {
                        "StringEquals": {"aws:RequestedRegion": "us-east-1"},
                        "Bool": {"aws:SecureTransport": true}
                    }
                }]
            }"#,
        )
        .unwrap();

        let statement = &doc.statements()[0];
        assert!(statement.has_condition_key("aws:requestedregion"));
        assert!(statement.conditions()["Bool"]["aws:SecureTransport"].contains("true"));
        assert_eq!(doc.version(), POLICY_VERSION);
    }

    #[test]
    fn test_parse_single_statement_object() {
        let doc = PolicyDocument::from_json(
            r#"{"Version": "2012-10-17", "Statement": {"Effect": "Deny", "Action": "s3:DeleteBucket", "Resource": "*"}}"#,
        )
        .unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.statements()[0].effect(), Effect::Deny);
    }

    #[test]
    fn test_statement_without_action_rejected() {
        let result = PolicyDocument::from_json(
            r#"{"Statement": [{"Effect": "Allow", "Resource": "*"}]}"#,
        );
        assert!(matches!(result, Err(AlphaError::ParseError(_))));
        assert!(PolicyStatement::allow(Vec::<String>::new()).is_err());
        assert!(PolicyStatement::allow(["  "]).is_err());
    }

    #[test]
    fn test_wildcard_detection() {
        let admin = PolicyStatement::allow(["*"]).unwrap().with_resources(["*"]);
        assert!(admin.has_wildcard_action());
        assert!(admin.has_wildcard_resource());

        let scoped = PolicyStatement::allow(["s3:*"]).unwrap().with_resources(["*", "arn:x"]);
        assert!(!scoped.has_wildcard_action());
        assert!(!scoped.has_wildcard_resource());
        assert!(is_bare_wildcard("*:*"));
    }

    #[test]
    fn test_service_of() {
        assert_eq!(service_of("IAM:PassRole"), Some("iam".to_string()));
        assert_eq!(service_of("*"), None);
        assert_eq!(service_of("s3:"), None);
    }

    #[test]
    fn test_retain_actions_drops_empty() {
        let statement = PolicyStatement::allow(["iam:PassRole"]).unwrap();
        assert!(statement.retain_actions(|a| !a.starts_with("iam:")).is_none());

        let mixed = PolicyStatement::allow(["iam:PassRole", "s3:GetObject"]).unwrap();
        let kept = mixed.retain_actions(|a| !a.starts_with("iam:")).unwrap();
        assert_eq!(kept.actions().len(), 1);
        // the source statement is untouched
        assert_eq!(mixed.actions().len(), 2);
    }

    #[test]
    fn test_fingerprint_ignores_action_order() {
        let a = PolicyDocument::new(vec![PolicyStatement::allow(["s3:GetObject", "s3:PutObject"]).unwrap()]);
        let b = PolicyDocument::new(vec![PolicyStatement::allow(["s3:PutObject", "s3:GetObject"]).unwrap()]);
        let c = PolicyDocument::new(vec![PolicyStatement::allow(["s3:GetObject"]).unwrap()]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(a.fingerprint().starts_with("blake3:"));
    }

    #[test]
    fn test_serialization_writes_arrays() {
        let doc = PolicyDocument::new(vec![PolicyStatement::allow(["s3:GetObject"])
            .unwrap()
            .with_resources(["*"])]);
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["Version"], POLICY_VERSION);
        assert!(json["Statement"][0]["Action"].is_array());
        assert!(json["Statement"][0].get("Condition").is_none());

        let parsed: PolicyDocument = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, doc);
    }
}
