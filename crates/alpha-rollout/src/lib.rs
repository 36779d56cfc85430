//! ALPHA Rollout: staged policy rollout with health-gated rollback
//!
//! A hardened policy is never attached to a target in one step. It moves
//! through Sandbox, Canary and Production, each observed for a window of
//! health samples. A breach restores the previous policy, and the restore is
//! itself observed before the execution is declared RolledBack.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────────────────────┐
//! request ───→ │ RolloutController                    │ ───→ ExecutionStore
//!              │   state ─→ transition() ─→ effect    │       (memory / files)
//!              └──────┬───────────────────────┬───────┘
//!                     ↓                       ↓
//!               PolicyApplier           MetricsSource
//!            (attach / detach)        (health samples)
//! ```
//!
//! # Example
//!
//! ```
//! use alpha_core::{PolicyDocument, PolicyStatement};
//! use alpha_rollout::{
//!     ExecutionStatus, InMemoryApplier, InMemoryStore, RolloutConfig, RolloutController,
//!     RolloutRequest, StaticMetrics,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let controller = RolloutController::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryApplier::new()),
//!     Arc::new(StaticMetrics(0.0)),
//!     RolloutConfig::fast(),
//! );
//!
//! let policy = PolicyDocument::new(vec![PolicyStatement::allow(["s3:GetObject"]).unwrap()]);
//! let exec = controller.submit(RolloutRequest::new("role/app", policy)).await.unwrap();
//! let done = controller.run(&exec.id).await.unwrap();
//! assert_eq!(done.overall_status, ExecutionStatus::Completed);
//! # }
//! ```

pub mod applier;
pub mod config;
pub mod controller;
pub mod error;
pub mod execution;
pub mod stage;
pub mod store;
pub mod transition;

pub use applier::{
    ApplierCall, InMemoryApplier, MetricScope, MetricsSource, PolicyApplier, ScriptedMetrics,
    StaticMetrics,
};
pub use config::RolloutConfig;
pub use controller::{DryRunReport, RolloutController};
pub use error::{ApplyError, MetricsError, RolloutError, RolloutResult, StoreError};
pub use execution::{ExecutionStatus, PlanAction, PlanEntry, RolloutExecution, RolloutRequest};
pub use stage::{MetricSnapshot, RolloutStage, StageKind, StagePlan, StageStatus};
pub use store::{ExecutionStore, FileStore, InMemoryStore};
pub use transition::{transition, RolloutEvent, RolloutState, SideEffect, CANCELLED_REASON};
