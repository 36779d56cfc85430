//! ALPHA Core: policy model shared by every stage of the hardening loop
//!
//! Value types only. Documents are immutable once built; the diff, guardrail
//! and rollout crates all produce new documents rather than editing old ones.

pub mod context;
pub mod data_model;
pub mod error;
pub mod policy;

pub use context::PipelineContext;
pub use data_model::{
    ApprovalRecord, GuardrailViolation, PolicyDiff, PolicyPath, PolicyProposal, RiskSignal,
    SignalSource, StatementField, UsageContext, ViolationCode,
};
pub use error::{AlphaError, AlphaResult};
pub use policy::{is_bare_wildcard, service_of, Effect, PolicyDocument, PolicyStatement, POLICY_VERSION};

/// Engine version stamped into reports and audit entries
pub const ALPHA_VERSION: &str = "1.0.0";
