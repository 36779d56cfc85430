//! External collaborators of the controller
//!
//! The controller never talks to a cloud API directly. It attaches policies
//! through a [`PolicyApplier`] and reads health through a [`MetricsSource`].
//! The in-memory implementations here back tests, dry runs and the offline
//! server.

use crate::error::{ApplyError, MetricsError};
use crate::stage::StageKind;
use alpha_core::PolicyDocument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Attaches and detaches policies on targets
#[async_trait]
pub trait PolicyApplier: Send + Sync {
    /// Attach `policy` to `target` for `traffic_percent` of traffic
    async fn attach(
        &self,
        target: &str,
        policy: &PolicyDocument,
        traffic_percent: u8,
    ) -> Result<(), ApplyError>;

    /// Remove whatever policy is attached to `target`
    async fn detach(&self, target: &str) -> Result<(), ApplyError>;

    /// Policy currently attached, `None` if nothing is
    async fn current_policy(&self, target: &str) -> Result<Option<PolicyDocument>, ApplyError>;

    fn name(&self) -> &str {
        "applier"
    }
}

/// What a health sample is taken for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "stage", rename_all = "lowercase")]
pub enum MetricScope {
    Stage(StageKind),
    Rollback,
}

/// Source of the health metric (e.g. authorization-denial rate) for a target
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self, target: &str, scope: MetricScope) -> Result<f64, MetricsError>;
}

/// One call seen by [`InMemoryApplier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplierCall {
    Attach {
        target: String,
        fingerprint: String,
        traffic_percent: u8,
    },
    Detach {
        target: String,
    },
}

#[derive(Debug, Clone)]
struct Attachment {
    policy: PolicyDocument,
    traffic_percent: u8,
}

#[derive(Debug, Default)]
struct ApplierData {
    attached: HashMap<String, Attachment>,
    calls: Vec<ApplierCall>,
    failing_fingerprints: HashSet<String>,
    fail_detach: bool,
}

/// Applier that keeps attachments in memory and records every call
#[derive(Debug, Default)]
pub struct InMemoryApplier {
    data: Mutex<ApplierData>,
}

impl InMemoryApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `target` with an attached policy at 100%
    pub fn with_policy(self, target: impl Into<String>, policy: PolicyDocument) -> Self {
        if let Ok(mut data) = self.data.lock() {
            data.attached.insert(
                target.into(),
                Attachment {
                    policy,
                    traffic_percent: 100,
                },
            );
        }
        self
    }

    /// Reject every attach of `policy`
    pub fn failing_attach_of(self, policy: &PolicyDocument) -> Self {
        if let Ok(mut data) = self.data.lock() {
            data.failing_fingerprints.insert(policy.fingerprint());
        }
        self
    }

    pub fn failing_detach(self) -> Self {
        if let Ok(mut data) = self.data.lock() {
            data.fail_detach = true;
        }
        self
    }

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, ApplierData>, ApplyError> {
        self.data
            .lock()
            .map_err(|e| ApplyError::Unavailable(format!("applier lock poisoned: {}", e)))
    }

    pub fn calls(&self) -> Vec<ApplierCall> {
        self.lock_data().map(|d| d.calls.clone()).unwrap_or_default()
    }

    /// Attached policy and traffic share for `target`
    pub fn attached(&self, target: &str) -> Option<(PolicyDocument, u8)> {
        self.lock_data()
            .ok()?
            .attached
            .get(target)
            .map(|a| (a.policy.clone(), a.traffic_percent))
    }
}

#[async_trait]
impl PolicyApplier for InMemoryApplier {
    async fn attach(
        &self,
        target: &str,
        policy: &PolicyDocument,
        traffic_percent: u8,
    ) -> Result<(), ApplyError> {
        let mut data = self.lock_data()?;
        let fingerprint = policy.fingerprint();
        data.calls.push(ApplierCall::Attach {
            target: target.to_string(),
            fingerprint: fingerprint.clone(),
            traffic_percent,
        });
        if data.failing_fingerprints.contains(&fingerprint) {
            return Err(ApplyError::Rejected(format!("attach of {} refused", fingerprint)));
        }
        data.attached.insert(
            target.to_string(),
            Attachment {
                policy: policy.clone(),
                traffic_percent,
            },
        );
        Ok(())
    }

    async fn detach(&self, target: &str) -> Result<(), ApplyError> {
        let mut data = self.lock_data()?;
        data.calls.push(ApplierCall::Detach {
            target: target.to_string(),
        });
        if data.fail_detach {
            return Err(ApplyError::Unavailable(format!("detach from {} refused", target)));
        }
        data.attached.remove(target);
        Ok(())
    }

    async fn current_policy(&self, target: &str) -> Result<Option<PolicyDocument>, ApplyError> {
        Ok(self.lock_data()?.attached.get(target).map(|a| a.policy.clone()))
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Same value for every sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticMetrics(pub f64);

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn sample(&self, _target: &str, _scope: MetricScope) -> Result<f64, MetricsError> {
        Ok(self.0)
    }
}

/// Plays back a queue of samples per scope; `None` entries are fetch errors.
///
/// Once a scope's queue is drained every sample returns the default value.
#[derive(Debug)]
pub struct ScriptedMetrics {
    scripts: Mutex<HashMap<MetricScope, VecDeque<Option<f64>>>>,
    default: Option<f64>,
}

impl ScriptedMetrics {
    pub fn new(default: f64) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: Some(default),
        }
    }

    /// Every unscripted sample fails
    pub fn unavailable() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: None,
        }
    }

    pub fn with_script(
        self,
        scope: MetricScope,
        samples: impl IntoIterator<Item = Option<f64>>,
    ) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(scope).or_default().extend(samples);
        }
        self
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetrics {
    async fn sample(&self, target: &str, scope: MetricScope) -> Result<f64, MetricsError> {
        let next = {
            let mut scripts = self
                .scripts
                .lock()
                .map_err(|e| MetricsError::Unavailable(format!("metrics lock poisoned: {}", e)))?;
            scripts.get_mut(&scope).and_then(VecDeque::pop_front)
        };
        match next.unwrap_or(self.default) {
            Some(value) => Ok(value),
            None => Err(MetricsError::NoData(format!("no sample for {} ({:?})", target, scope))),
        }
    }
}
