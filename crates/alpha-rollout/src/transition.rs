//! Rollout state machine
//!
//! ```text
//! Pending ─Start(approved)→ Attaching(0) ─ok→ Observing(0) ─healthy→ Attaching(1) … → Completed
//!                               │                 │
//!                      attach failed     breach / no samples / cancel
//!                               └────────┬────────┘
//!                                        ↓
//!                                  RollingBack(i) ─restored→ VerifyingRollback(i) ─healthy→ RolledBack
//!                                        │                           │
//!                                  restore failed               breach / no samples
//!                                        └──────────→ Failed ←───────┘
//! ```
//!
//! [`transition`] is total over (state, event). Pairs with no meaning (an
//! event that cannot happen in that state, or anything after a terminal state)
//! leave the state unchanged and emit no effect. Every state carries enough
//! to derive the side effect still owed in it, which is what makes a
//! persisted execution resumable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason recorded when an operator aborts an execution
pub const CANCELLED_REASON: &str = "cancelled by operator";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    /// Not started, or waiting for approval
    Pending,
    /// Attach for `stage` is owed
    Attaching { stage: usize },
    /// Attach done; health is being sampled
    Observing { stage: usize },
    /// The previous policy must be restored
    RollingBack { stage: usize, cause: String },
    /// Previous policy restored; its health is being sampled
    VerifyingRollback { stage: usize, cause: String },
    Completed,
    RolledBack { reason: String },
    /// Rollback could not be completed; target state is unknown
    Failed { reason: String },
}

impl RolloutState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RolloutState::Completed | RolloutState::RolledBack { .. } | RolloutState::Failed { .. }
        )
    }

    /// Side effect owed in this state, if any
    pub fn pending_effect(&self) -> Option<SideEffect> {
        match self {
            RolloutState::Attaching { stage } => Some(SideEffect::Attach { stage: *stage }),
            RolloutState::Observing { stage } => Some(SideEffect::Observe { stage: *stage }),
            RolloutState::RollingBack { .. } => Some(SideEffect::RestorePrevious),
            RolloutState::VerifyingRollback { .. } => Some(SideEffect::ObserveRollback),
            _ => None,
        }
    }

    /// Stage currently in play, forward or being rolled back
    pub fn stage(&self) -> Option<usize> {
        match self {
            RolloutState::Attaching { stage }
            | RolloutState::Observing { stage }
            | RolloutState::RollingBack { stage, .. }
            | RolloutState::VerifyingRollback { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RolloutState::RollingBack { cause, .. } | RolloutState::VerifyingRollback { cause, .. } => {
                Some(cause)
            }
            RolloutState::RolledBack { reason } | RolloutState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RolloutState::Pending => write!(f, "PENDING"),
            RolloutState::Attaching { stage } => write!(f, "ATTACHING[{}]", stage),
            RolloutState::Observing { stage } => write!(f, "OBSERVING[{}]", stage),
            RolloutState::RollingBack { stage, .. } => write!(f, "ROLLING_BACK[{}]", stage),
            RolloutState::VerifyingRollback { stage, .. } => write!(f, "VERIFYING_ROLLBACK[{}]", stage),
            RolloutState::Completed => write!(f, "COMPLETED"),
            RolloutState::RolledBack { .. } => write!(f, "ROLLED_BACK"),
            RolloutState::Failed { .. } => write!(f, "FAILED"),
        }
    }
}

/// Something that happened to the execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutEvent {
    /// `approved` is false when approval is required but missing or rejected
    Start { approved: bool },
    AttachSucceeded,
    AttachFailed { error: String },
    WindowHealthy,
    HealthBreach { metric: f64, threshold: f64 },
    /// The window elapsed without a single successful sample
    NoSamples,
    Cancelled,
    RestoreSucceeded,
    RestoreFailed { error: String },
}

/// External action the controller must perform after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideEffect {
    /// Attach the proposed policy at the stage's traffic percentage
    Attach { stage: usize },
    /// Sample the stage's health metric for one observation window
    Observe { stage: usize },
    /// Re-attach the previous policy at 100%, or detach if there was none
    RestorePrevious,
    /// Sample health for one rollback observation window
    ObserveRollback,
}

fn rollback(stage: usize, cause: String) -> RolloutState {
    RolloutState::RollingBack { stage, cause }
}

/// Next state for `event` in `state`, given an execution of `stage_count` stages.
///
/// The returned effect is always `next.pending_effect()`.
pub fn transition(
    state: &RolloutState,
    event: &RolloutEvent,
    stage_count: usize,
) -> (RolloutState, Option<SideEffect>) {
    use RolloutEvent as E;
    use RolloutState as S;

    let next = match (state, event) {
        (S::Pending, E::Start { approved: true }) if stage_count > 0 => S::Attaching { stage: 0 },
        (S::Pending, E::Start { approved: true }) => S::Completed,
        (S::Pending, E::Start { approved: false }) => S::Pending,
        (S::Pending, E::Cancelled) => S::RolledBack {
            reason: CANCELLED_REASON.to_string(),
        },

        (S::Attaching { stage }, E::AttachSucceeded) => S::Observing { stage: *stage },
        (S::Attaching { stage }, E::AttachFailed { error }) => {
            rollback(*stage, format!("attach failed at stage {}: {}", stage, error))
        }
        (S::Attaching { stage }, E::Cancelled) => rollback(*stage, CANCELLED_REASON.to_string()),

        (S::Observing { stage }, E::WindowHealthy) if stage + 1 < stage_count => {
            S::Attaching { stage: stage + 1 }
        }
        (S::Observing { .. }, E::WindowHealthy) => S::Completed,
        (S::Observing { stage }, E::HealthBreach { metric, threshold }) => rollback(
            *stage,
            format!(
                "health breach at stage {}: metric {:.4} > threshold {:.4}",
                stage, metric, threshold
            ),
        ),
        (S::Observing { stage }, E::NoSamples) => rollback(
            *stage,
            format!("no health samples at stage {} within the observation window", stage),
        ),
        (S::Observing { stage }, E::Cancelled) => rollback(*stage, CANCELLED_REASON.to_string()),

        (S::RollingBack { stage, cause }, E::RestoreSucceeded) => S::VerifyingRollback {
            stage: *stage,
            cause: cause.clone(),
        },
        (S::RollingBack { cause, .. }, E::RestoreFailed { error }) => S::Failed {
            reason: format!("rollback failed after '{}': {}", cause, error),
        },

        (S::VerifyingRollback { cause, .. }, E::WindowHealthy) => S::RolledBack {
            reason: cause.clone(),
        },
        (S::VerifyingRollback { cause, .. }, E::HealthBreach { metric, threshold }) => S::Failed {
            reason: format!(
                "rollback unhealthy after '{}': metric {:.4} > threshold {:.4}",
                cause, metric, threshold
            ),
        },
        (S::VerifyingRollback { cause, .. }, E::NoSamples) => S::Failed {
            reason: format!("rollback unverified after '{}': no health samples", cause),
        },

        (current, _) => current.clone(),
    };

    let effect = if &next == state {
        None
    } else {
        next.pending_effect()
    };
    (next, effect)
}
