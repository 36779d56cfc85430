//! Rollout controller
//!
//! Drives executions through [`transition`](crate::transition::transition):
//! perform the side effect the current state owes, feed the outcome back as an
//! event, persist, repeat until nothing is owed. Live runs and dry runs share
//! that loop and differ only in the collaborators plugged into it.

use crate::applier::{InMemoryApplier, MetricScope, MetricsSource, PolicyApplier, StaticMetrics};
use crate::config::RolloutConfig;
use crate::error::{RolloutError, RolloutResult, StoreError};
use crate::execution::{PlanAction, PlanEntry, RolloutExecution, RolloutRequest};
use crate::stage::MetricSnapshot;
use crate::store::ExecutionStore;
use crate::transition::{RolloutEvent, RolloutState, SideEffect};
use alpha_core::{ApprovalRecord, PolicyDocument};
use alpha_policy::{detect, AuditEntry, AuditLog};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a dry run would have done
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    /// Projected execution, driven to completion
    pub execution: RolloutExecution,
    /// Attach/restore calls a live run would issue, in order
    pub plan: Vec<PlanEntry>,
    /// A live run would wait in Pending for approval first
    pub requires_approval: bool,
}

enum WindowOutcome {
    Healthy,
    Breach(f64),
    NoSamples,
    Cancelled,
}

/// Collaborators and timings for one drive of the state machine
struct Driver<'a> {
    applier: &'a dyn PolicyApplier,
    metrics: &'a dyn MetricsSource,
    store: Option<&'a dyn ExecutionStore>,
    poll_interval: Duration,
    observation_window: Duration,
    rollback_window: Duration,
}

impl Driver<'_> {
    async fn drive(
        &self,
        exec: &mut RolloutExecution,
        token: &CancellationToken,
    ) -> RolloutResult<()> {
        while let Some(effect) = exec.state.pending_effect() {
            let event = self.perform(exec, effect, token).await;
            let from = exec.state.to_string();
            exec.apply(&event);
            debug!(
                execution_id = %exec.id,
                from = %from,
                to = %exec.state,
                "transition"
            );
            if let Some(store) = self.store {
                store.save(exec)?;
            }
        }
        Ok(())
    }

    async fn perform(
        &self,
        exec: &mut RolloutExecution,
        effect: SideEffect,
        token: &CancellationToken,
    ) -> RolloutEvent {
        match effect {
            SideEffect::Attach { stage } => self.attach_stage(exec, stage, token).await,
            SideEffect::Observe { stage } => self.observe_stage(exec, stage, token).await,
            SideEffect::RestorePrevious => self.restore_previous(exec).await,
            SideEffect::ObserveRollback => self.observe_rollback(exec).await,
        }
    }

    async fn attach_stage(
        &self,
        exec: &mut RolloutExecution,
        stage: usize,
        token: &CancellationToken,
    ) -> RolloutEvent {
        // Cancellation is only acknowledged before a call is issued
        if token.is_cancelled() {
            return RolloutEvent::Cancelled;
        }
        let Some((kind, traffic_percent)) = exec.stages.get(stage).map(|s| (s.kind, s.traffic_percent))
        else {
            return RolloutEvent::AttachFailed {
                error: format!("stage {} is not in the plan", stage),
            };
        };

        self.check_drift(exec, stage).await;
        exec.record_plan(PlanAction::Attach, Some(stage));

        info!(
            execution_id = %exec.id,
            target = %exec.target_resource_id,
            stage = %kind,
            traffic_percent,
            "attaching proposed policy"
        );
        match self
            .applier
            .attach(&exec.target_resource_id, &exec.proposed_policy, traffic_percent)
            .await
        {
            Ok(()) => RolloutEvent::AttachSucceeded,
            Err(e) => {
                warn!(execution_id = %exec.id, stage = %kind, error = %e, "attach failed");
                RolloutEvent::AttachFailed { error: e.to_string() }
            }
        }
    }

    /// Compare what should be live with what is live. Advisory only.
    async fn check_drift(&self, exec: &mut RolloutExecution, stage: usize) {
        let expected = if stage == 0 {
            exec.previous_policy.clone()
        } else {
            Some(exec.proposed_policy.clone())
        };
        let live = match self.applier.current_policy(&exec.target_resource_id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(execution_id = %exec.id, error = %e, "drift check skipped");
                return;
            }
        };

        let empty = PolicyDocument::empty();
        let report = detect(
            expected.as_ref().unwrap_or(&empty),
            live.as_ref().unwrap_or(&empty),
        );
        if report.has_drift {
            warn!(
                execution_id = %exec.id,
                target = %exec.target_resource_id,
                stage,
                summary = %report.diff.change_summary,
                "live policy changed outside this rollout"
            );
            exec.notes.push(format!(
                "drift before stage {}: {}",
                stage, report.diff.change_summary
            ));
        }
    }

    async fn observe_stage(
        &self,
        exec: &mut RolloutExecution,
        stage: usize,
        token: &CancellationToken,
    ) -> RolloutEvent {
        let target = exec.target_resource_id.clone();
        let execution_id = exec.id.clone();
        let Some(current) = exec.stages.get_mut(stage) else {
            return RolloutEvent::NoSamples;
        };
        let (kind, threshold) = (current.kind, current.health_threshold);

        let outcome = self
            .sample_window(
                &target,
                MetricScope::Stage(kind),
                threshold,
                self.observation_window,
                &mut current.metrics,
                Some(token),
            )
            .await;

        match outcome {
            WindowOutcome::Healthy => {
                info!(execution_id = %execution_id, stage = %kind, "observation window elapsed without breach");
                RolloutEvent::WindowHealthy
            }
            WindowOutcome::Breach(metric) => {
                warn!(
                    execution_id = %execution_id,
                    stage = %kind,
                    metric,
                    threshold,
                    "health breach, leaving observation window early"
                );
                RolloutEvent::HealthBreach { metric, threshold }
            }
            WindowOutcome::NoSamples => {
                warn!(execution_id = %execution_id, stage = %kind, "observation window produced no samples");
                RolloutEvent::NoSamples
            }
            WindowOutcome::Cancelled => {
                info!(execution_id = %execution_id, stage = %kind, "cancelled during observation");
                RolloutEvent::Cancelled
            }
        }
    }

    async fn restore_previous(&self, exec: &mut RolloutExecution) -> RolloutEvent {
        let target = exec.target_resource_id.clone();
        let result = match exec.previous_policy.clone() {
            Some(previous) => {
                exec.record_plan(PlanAction::Restore, None);
                info!(execution_id = %exec.id, target = %target, "restoring previous policy");
                self.applier.attach(&target, &previous, 100).await
            }
            None => {
                exec.record_plan(PlanAction::Detach, None);
                info!(execution_id = %exec.id, target = %target, "no previous policy, detaching");
                self.applier.detach(&target).await
            }
        };

        match result {
            Ok(()) => RolloutEvent::RestoreSucceeded,
            Err(e) => {
                error!(execution_id = %exec.id, target = %target, error = %e, "restore failed");
                RolloutEvent::RestoreFailed { error: e.to_string() }
            }
        }
    }

    async fn observe_rollback(&self, exec: &mut RolloutExecution) -> RolloutEvent {
        let target = exec.target_resource_id.clone();
        let threshold = exec.rollback_health_threshold;
        let outcome = self
            .sample_window(
                &target,
                MetricScope::Rollback,
                threshold,
                self.rollback_window,
                &mut exec.rollback_metrics,
                None,
            )
            .await;

        match outcome {
            WindowOutcome::Breach(metric) => RolloutEvent::HealthBreach { metric, threshold },
            WindowOutcome::NoSamples => RolloutEvent::NoSamples,
            WindowOutcome::Healthy | WindowOutcome::Cancelled => {
                info!(execution_id = %exec.id, "rollback verified healthy");
                RolloutEvent::WindowHealthy
            }
        }
    }

    /// Sample until the window closes or the metric breaches `threshold`.
    ///
    /// Always takes at least one sample. Fetch errors are counted and retried
    /// on the next tick.
    async fn sample_window(
        &self,
        target: &str,
        scope: MetricScope,
        threshold: f64,
        window: Duration,
        snapshot: &mut MetricSnapshot,
        token: Option<&CancellationToken>,
    ) -> WindowOutcome {
        let deadline = Instant::now() + window;
        let mut samples = 0u32;

        loop {
            if token.is_some_and(|t| t.is_cancelled()) {
                return WindowOutcome::Cancelled;
            }

            match self.metrics.sample(target, scope).await {
                Ok(value) if value.is_finite() => {
                    samples += 1;
                    snapshot.record(value);
                    if value > threshold {
                        return WindowOutcome::Breach(value);
                    }
                }
                Ok(value) => {
                    snapshot.record_failure();
                    debug!(target = %target, value, "discarding non-finite sample");
                }
                Err(e) => {
                    snapshot.record_failure();
                    debug!(target = %target, error = %e, "metric fetch failed, retrying");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let pause = self.poll_interval.min(deadline - now);
            match token {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = token.cancelled() => return WindowOutcome::Cancelled,
                    }
                }
                None => tokio::time::sleep(pause).await,
            }
        }

        if samples == 0 {
            WindowOutcome::NoSamples
        } else {
            WindowOutcome::Healthy
        }
    }
}

/// Owns executions against targets and drives them through their stages
pub struct RolloutController {
    store: Arc<dyn ExecutionStore>,
    applier: Arc<dyn PolicyApplier>,
    metrics: Arc<dyn MetricsSource>,
    config: RolloutConfig,
    audit: Option<Arc<Mutex<AuditLog>>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl RolloutController {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        applier: Arc<dyn PolicyApplier>,
        metrics: Arc<dyn MetricsSource>,
        config: RolloutConfig,
    ) -> Self {
        Self {
            store,
            applier,
            metrics,
            config,
            audit: None,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Record approvals and terminal outcomes in `audit`
    pub fn with_audit_log(mut self, audit: Arc<Mutex<AuditLog>>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    fn driver(&self) -> Driver<'_> {
        Driver {
            applier: self.applier.as_ref(),
            metrics: self.metrics.as_ref(),
            store: Some(self.store.as_ref()),
            poll_interval: self.config.poll_interval(),
            observation_window: self.config.observation_window(),
            rollback_window: self.config.rollback_window(),
        }
    }

    fn load(&self, id: &str) -> RolloutResult<RolloutExecution> {
        self.store
            .get(id)?
            .ok_or_else(|| RolloutError::NotFound(id.to_string()))
    }

    fn lock_tokens(&self) -> RolloutResult<MutexGuard<'_, HashMap<String, CancellationToken>>> {
        self.tokens.lock().map_err(|e| {
            RolloutError::Store(StoreError::Lock(format!("failed to acquire lock: {}", e)))
        })
    }

    /// Claim the driving slot for `id`. Whoever holds it is the only writer of
    /// a started execution.
    fn register(&self, id: &str) -> RolloutResult<CancellationToken> {
        let mut tokens = self.lock_tokens()?;
        if tokens.contains_key(id) {
            return Err(RolloutError::AlreadyRunning(id.to_string()));
        }
        let token = CancellationToken::new();
        tokens.insert(id.to_string(), token.clone());
        Ok(token)
    }

    fn unregister(&self, id: &str) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(id);
        }
    }

    /// Validate a request, snapshot the live policy and record a Pending execution.
    ///
    /// Rejected with `TargetBusy` while the target has a non-terminal execution.
    pub async fn submit(&self, request: RolloutRequest) -> RolloutResult<RolloutExecution> {
        request.validate()?;
        let previous = self.applier.current_policy(&request.target_id).await?;
        let exec = RolloutExecution::new(&request, previous, &self.config);
        self.store.insert_exclusive(&exec)?;

        info!(
            execution_id = %exec.id,
            target = %exec.target_resource_id,
            stages = exec.stages.len(),
            require_approval = exec.require_approval,
            "rollout submitted"
        );
        Ok(exec)
    }

    /// Drive an execution until it is terminal or waiting for approval.
    ///
    /// Also resumes a persisted execution from whatever state it was saved in.
    pub async fn run(&self, id: &str) -> RolloutResult<RolloutExecution> {
        let token = self.register(id)?;
        let result = self.run_registered(id, &token).await;
        self.unregister(id);
        result
    }

    async fn run_registered(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> RolloutResult<RolloutExecution> {
        let mut exec = self.load(id)?;
        if exec.is_terminal() {
            return Ok(exec);
        }

        if exec.state == RolloutState::Pending {
            let (current, started) = self.start(id)?;
            exec = current;
            if exec.state == RolloutState::Pending {
                info!(execution_id = %exec.id, "awaiting approval");
                return Ok(exec);
            }
            if !started && exec.is_terminal() {
                // Cancelled before it could start
                return Ok(exec);
            }
        } else {
            info!(execution_id = %exec.id, state = %exec.state, "resuming rollout");
        }

        self.driver().drive(&mut exec, token).await?;
        self.report_outcome(&exec);
        Ok(exec)
    }

    /// Leave Pending if approved. Done under the store lock so a concurrent
    /// approval or cancellation is either seen here or sees this.
    fn start(&self, id: &str) -> RolloutResult<(RolloutExecution, bool)> {
        let mut started = false;
        let exec = self
            .store
            .update(id, &mut |exec| {
                if exec.state != RolloutState::Pending {
                    return false;
                }
                let approved = exec.is_approved();
                exec.apply(&RolloutEvent::Start { approved });
                started = approved;
                approved
            })?
            .ok_or_else(|| RolloutError::NotFound(id.to_string()))?;
        Ok((exec, started))
    }

    /// Run on a background task
    pub fn spawn(
        self: &Arc<Self>,
        id: impl Into<String>,
    ) -> JoinHandle<RolloutResult<RolloutExecution>> {
        let controller = Arc::clone(self);
        let id = id.into();
        tokio::spawn(async move {
            let result = controller.run(&id).await;
            match &result {
                Err(RolloutError::AlreadyRunning(_)) => {
                    debug!(execution_id = %id, "execution already has a driver");
                }
                Err(e) => error!(execution_id = %id, error = %e, "rollout driver stopped"),
                Ok(_) => {}
            }
            result
        })
    }

    /// Attach an approval record. A Pending execution proceeds on its next run.
    ///
    /// Only accepted while the execution is Pending; the check and the write
    /// happen under the store lock, so a driver that has already started is
    /// never overwritten.
    pub fn approve(&self, id: &str, record: ApprovalRecord) -> RolloutResult<RolloutExecution> {
        let mut rejection = None;
        let exec = self
            .store
            .update(id, &mut |exec| {
                if exec.is_terminal() {
                    rejection = Some(RolloutError::AlreadyFinished(id.to_string()));
                    return false;
                }
                if exec.state != RolloutState::Pending {
                    rejection = Some(RolloutError::NotPending {
                        id: id.to_string(),
                        state: exec.state.to_string(),
                    });
                    return false;
                }
                exec.approval = Some(record.clone());
                exec.updated_at = Utc::now();
                true
            })?
            .ok_or_else(|| RolloutError::NotFound(id.to_string()))?;
        if let Some(e) = rejection {
            return Err(e);
        }

        info!(
            execution_id = %exec.id,
            approver = %record.approver,
            approved = record.approved,
            "approval recorded"
        );
        self.audit(AuditEntry::approval(
            &exec.target_resource_id,
            &exec.id,
            record.approved,
            &record.approver,
        ));
        Ok(exec)
    }

    /// Operator abort.
    ///
    /// An execution being driven is signalled and rolls back at its next
    /// polling point. One that is not being driven has the cancellation
    /// applied directly: a Pending execution ends RolledBack right away, and a
    /// started one is handed to a background driver to restore the previous
    /// policy. Must be called within a Tokio runtime.
    pub fn cancel(self: &Arc<Self>, id: &str) -> RolloutResult<RolloutExecution> {
        let mut exec = self.load(id)?;
        if exec.is_terminal() {
            return Err(RolloutError::AlreadyFinished(id.to_string()));
        }

        // Pending needs no driver; settle it against a concurrent start
        if exec.state == RolloutState::Pending {
            let mut cancelled = false;
            exec = self
                .store
                .update(id, &mut |exec| {
                    if exec.state != RolloutState::Pending {
                        return false;
                    }
                    exec.apply(&RolloutEvent::Cancelled);
                    cancelled = true;
                    true
                })?
                .ok_or_else(|| RolloutError::NotFound(id.to_string()))?;
            if cancelled {
                info!(execution_id = %id, "pending execution cancelled");
                self.report_outcome(&exec);
                return Ok(exec);
            }
            if exec.is_terminal() {
                return Err(RolloutError::AlreadyFinished(id.to_string()));
            }
        }

        {
            let mut tokens = self.lock_tokens()?;
            if let Some(token) = tokens.get(id) {
                token.cancel();
                info!(execution_id = %id, "cancellation signalled");
                return Ok(exec);
            }
            // Hold the driving slot while the cancellation is written
            tokens.insert(id.to_string(), CancellationToken::new());
        }
        let result = self.cancel_undriven(id);
        self.unregister(id);

        let exec = result?;
        if exec.state.pending_effect().is_some() {
            info!(execution_id = %id, state = %exec.state, "driving rollback after cancellation");
            let _detached = self.spawn(id);
        }
        Ok(exec)
    }

    fn cancel_undriven(&self, id: &str) -> RolloutResult<RolloutExecution> {
        let mut finished = false;
        let exec = self
            .store
            .update(id, &mut |exec| {
                if exec.is_terminal() {
                    finished = true;
                    return false;
                }
                exec.apply(&RolloutEvent::Cancelled);
                true
            })?
            .ok_or_else(|| RolloutError::NotFound(id.to_string()))?;
        if finished {
            return Err(RolloutError::AlreadyFinished(id.to_string()));
        }

        info!(execution_id = %id, state = %exec.state, "cancellation applied");
        self.report_outcome(&exec);
        Ok(exec)
    }

    pub fn status(&self, id: &str) -> RolloutResult<RolloutExecution> {
        self.load(id)
    }

    /// Executions for a target, oldest first
    pub fn list(&self, target: &str) -> RolloutResult<Vec<RolloutExecution>> {
        Ok(self.store.list_for_target(target)?)
    }

    /// Non-terminal executions across all targets, oldest first
    pub fn active(&self) -> RolloutResult<Vec<RolloutExecution>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|e| !e.is_terminal())
            .collect())
    }

    /// Project a request through the same driver without touching the target.
    ///
    /// Attaches go to an in-memory copy of the target seeded with its live
    /// policy, every sample is healthy and windows are zero-length, so the
    /// plan is what a healthy, approved live run would issue.
    pub async fn dry_run(&self, request: &RolloutRequest) -> RolloutResult<DryRunReport> {
        request.validate()?;
        let previous = self.applier.current_policy(&request.target_id).await?;
        let mut exec = RolloutExecution::new(request, previous.clone(), &self.config);
        let requires_approval = exec.require_approval;

        let shadow = match previous {
            Some(policy) => InMemoryApplier::new().with_policy(request.target_id.clone(), policy),
            None => InMemoryApplier::new(),
        };
        let healthy = StaticMetrics(0.0);
        let driver = Driver {
            applier: &shadow,
            metrics: &healthy,
            store: None,
            poll_interval: self.config.poll_interval(),
            observation_window: Duration::ZERO,
            rollback_window: Duration::ZERO,
        };

        exec.apply(&RolloutEvent::Start { approved: true });
        driver.drive(&mut exec, &CancellationToken::new()).await?;

        debug!(target = %request.target_id, entries = exec.plan.len(), "dry run projected");
        Ok(DryRunReport {
            plan: exec.plan.clone(),
            requires_approval,
            execution: exec,
        })
    }

    fn report_outcome(&self, exec: &RolloutExecution) {
        match &exec.state {
            RolloutState::Completed => {
                info!(execution_id = %exec.id, target = %exec.target_resource_id, "rollout completed");
            }
            RolloutState::RolledBack { reason } => {
                warn!(
                    execution_id = %exec.id,
                    target = %exec.target_resource_id,
                    reason = %reason,
                    "rollout rolled back"
                );
            }
            RolloutState::Failed { reason } => {
                error!(
                    execution_id = %exec.id,
                    target = %exec.target_resource_id,
                    reason = %reason,
                    "rollback failed, target policy state unknown; requires human intervention"
                );
            }
            _ => return,
        }
        self.audit(AuditEntry::rollout(
            &exec.target_resource_id,
            &exec.id,
            exec.overall_status.to_string(),
            exec.reason().map(str::to_string),
        ));
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(audit) = &self.audit {
            match audit.lock() {
                Ok(mut log) => {
                    log.log(entry);
                }
                Err(e) => warn!(error = %e, "audit log unavailable"),
            }
        }
    }
}
