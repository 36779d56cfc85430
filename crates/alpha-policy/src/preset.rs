//! Guardrail presets and caller overrides
//!
//! A preset is a named rule bundle (`none`, `sandbox`, `prod`). Callers pick
//! one through [`GuardrailConfig`] and may add exclusions on top of it; there
//! is no ambient "current preset".

use alpha_core::AlphaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Built-in preset names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    None,
    Sandbox,
    #[default]
    Prod,
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PresetName::None => write!(f, "none"),
            PresetName::Sandbox => write!(f, "sandbox"),
            PresetName::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for PresetName {
    type Err = AlphaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(PresetName::None),
            "sandbox" => Ok(PresetName::Sandbox),
            "prod" | "production" => Ok(PresetName::Prod),
            other => Err(AlphaError::ConfigError(format!("unknown guardrail preset '{}'", other))),
        }
    }
}

/// Rule bundle evaluated by the guardrail engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailPreset {
    /// Versioned name, e.g. "prod@1"
    pub name: String,

    /// Strip bare wildcard actions, and sensitive-service actions on `*` resources
    #[serde(default)]
    pub deny_wildcards: bool,

    /// Services whose actions may not be granted on a bare `*` resource
    #[serde(default)]
    pub sensitive_services: BTreeSet<String>,

    /// Exact actions or `service:*` prefixes that are stripped
    #[serde(default)]
    pub blocked_actions: BTreeSet<String>,

    /// Services whose statements are dropped entirely
    #[serde(default)]
    pub disallowed_services: BTreeSet<String>,

    /// Every surviving Allow statement must carry at least one of these keys
    #[serde(default)]
    pub required_condition_keys: BTreeSet<String>,
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl GuardrailPreset {
    /// No rules at all
    pub fn none() -> Self {
        Self {
            name: "none@1".to_string(),
            deny_wildcards: false,
            sensitive_services: BTreeSet::new(),
            blocked_actions: BTreeSet::new(),
            disallowed_services: BTreeSet::new(),
            required_condition_keys: BTreeSet::new(),
        }
    }

    /// Blocks privilege-escalation primitives only
    pub fn sandbox() -> Self {
        Self {
            name: "sandbox@1".to_string(),
            deny_wildcards: true,
            sensitive_services: set(&["iam", "sts"]),
            blocked_actions: set(&["iam:PassRole"]),
            ..Self::none()
        }
    }

    pub fn prod() -> Self {
        Self {
            name: "prod@1".to_string(),
            deny_wildcards: true,
            sensitive_services: set(&["iam", "kms", "organizations", "secretsmanager", "sts"]),
            blocked_actions: set(&["iam:*", "iam:PassRole", "sts:AssumeRole"]),
            disallowed_services: set(&["iam", "organizations"]),
            required_condition_keys: set(&["aws:RequestedRegion"]),
        }
    }

    pub fn for_name(name: PresetName) -> Self {
        match name {
            PresetName::None => Self::none(),
            PresetName::Sandbox => Self::sandbox(),
            PresetName::Prod => Self::prod(),
        }
    }

    /// Load a custom rule bundle from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, AlphaError> {
        serde_yaml::from_str(yaml).map_err(|e| AlphaError::ConfigError(e.to_string()))
    }

    /// True when the bundle has nothing to enforce
    pub fn is_empty(&self) -> bool {
        !self.deny_wildcards
            && self.blocked_actions.is_empty()
            && self.disallowed_services.is_empty()
            && self.required_condition_keys.is_empty()
    }
}

impl Default for GuardrailPreset {
    fn default() -> Self {
        Self::prod()
    }
}

/// Explicit guardrail selection passed into every enforcement call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfig {
    #[serde(default)]
    pub preset: PresetName,

    /// Extra disallowed services, on top of the preset
    #[serde(default)]
    pub excluded_services: BTreeSet<String>,

    /// Extra blocked actions, on top of the preset
    #[serde(default)]
    pub suppressed_actions: BTreeSet<String>,

    /// Replaces the built-in bundle for `preset` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_preset: Option<GuardrailPreset>,
}

impl GuardrailConfig {
    pub fn new(preset: PresetName) -> Self {
        Self {
            preset,
            ..Self::default()
        }
    }

    pub fn with_excluded_service(mut self, service: impl Into<String>) -> Self {
        self.excluded_services.insert(service.into());
        self
    }

    pub fn with_suppressed_action(mut self, action: impl Into<String>) -> Self {
        self.suppressed_actions.insert(action.into());
        self
    }

    pub fn with_custom_preset(mut self, preset: GuardrailPreset) -> Self {
        self.custom_preset = Some(preset);
        self
    }

    /// The preset with overrides folded in. Overrides only ever add.
    pub fn effective_preset(&self) -> GuardrailPreset {
        let mut preset = self
            .custom_preset
            .clone()
            .unwrap_or_else(|| GuardrailPreset::for_name(self.preset));

        preset
            .disallowed_services
            .extend(self.excluded_services.iter().map(|s| s.trim().to_ascii_lowercase()));
        preset
            .blocked_actions
            .extend(self.suppressed_actions.iter().map(|a| a.trim().to_string()));
        preset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names() {
        assert_eq!("PROD".parse::<PresetName>().unwrap(), PresetName::Prod);
        assert_eq!("sandbox".parse::<PresetName>().unwrap(), PresetName::Sandbox);
        assert!("lax".parse::<PresetName>().is_err());
        assert_eq!(PresetName::None.to_string(), "none");
    }

    #[test]
    fn test_none_is_empty() {
        assert!(GuardrailPreset::none().is_empty());
        assert!(!GuardrailPreset::sandbox().is_empty());
    }

    #[test]
    fn test_prod_is_stricter_than_sandbox() {
        let sandbox = GuardrailPreset::sandbox();
        let prod = GuardrailPreset::prod();
        assert!(sandbox.blocked_actions.is_subset(&prod.blocked_actions));
        assert!(prod.required_condition_keys.contains("aws:RequestedRegion"));
    }

    #[test]
    fn test_overrides_are_additive() {
        let config = GuardrailConfig::new(PresetName::Sandbox)
            .with_excluded_service("EC2")
            .with_suppressed_action("s3:DeleteBucket");
        let preset = config.effective_preset();

        assert!(preset.blocked_actions.contains("iam:PassRole"));
        assert!(preset.blocked_actions.contains("s3:DeleteBucket"));
        assert!(preset.disallowed_services.contains("ec2"));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
name: team@2
denyWildcards: true
blockedActions: ["s3:DeleteBucket"]
requiredConditionKeys: ["aws:SourceVpc"]
"#;
        let preset = GuardrailPreset::from_yaml(yaml).unwrap();
        assert_eq!(preset.name, "team@2");
        assert!(preset.deny_wildcards);
        assert!(preset.disallowed_services.is_empty());
        assert!(GuardrailPreset::from_yaml("name: [").is_err());
    }
}
