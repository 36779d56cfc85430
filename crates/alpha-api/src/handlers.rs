//! API Handlers
use crate::state::AppState;
use alpha_core::{ApprovalRecord, PolicyDocument, ALPHA_VERSION};
use alpha_policy::{detect, GuardrailConfig, HardeningInput, RiskGate, Verdict};
use alpha_rollout::{RolloutError, RolloutExecution, RolloutRequest};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

type Reply = (StatusCode, Json<Value>);

fn error_reply(status: StatusCode, message: impl Into<String>) -> Reply {
    (status, Json(json!({ "error": message.into() })))
}

fn rollout_error(e: RolloutError) -> Reply {
    let status = match &e {
        RolloutError::NotFound(_) => StatusCode::NOT_FOUND,
        RolloutError::TargetBusy { .. }
        | RolloutError::AlreadyFinished(_)
        | RolloutError::AlreadyRunning(_)
        | RolloutError::NotPending { .. } => StatusCode::CONFLICT,
        RolloutError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RolloutError::Apply(_) => StatusCode::BAD_GATEWAY,
        RolloutError::Config(_) | RolloutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "rollout request failed");
    }
    error_reply(status, e.to_string())
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, Reply> {
    serde_json::to_value(value)
        .map_err(|e| error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn execution_reply(status: StatusCode, exec: &RolloutExecution) -> Reply {
    match to_value(exec) {
        Ok(body) => (status, Json(body)),
        Err(reply) => reply,
    }
}

// =============================================================================
// Analysis
// =============================================================================

/// Collector output plus per-call guardrail overrides
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(flatten)]
    pub input: HardeningInput,
    #[serde(default)]
    pub preset: Option<alpha_policy::PresetName>,
    #[serde(default)]
    pub excluded_services: Vec<String>,
    #[serde(default)]
    pub suppressed_actions: Vec<String>,
    #[serde(default)]
    pub risk_threshold: Option<f64>,
}

/// Run the hardening pipeline. The verdict travels in the body; a ToolError
/// verdict is answered with 422.
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AnalyzeRequest>,
) -> Reply {
    let mut pipeline = state.pipeline.clone();
    if let Some(preset) = payload.preset {
        pipeline.guardrails = GuardrailConfig::new(preset);
    }
    for service in payload.excluded_services {
        pipeline.guardrails = pipeline.guardrails.with_excluded_service(service);
    }
    for action in payload.suppressed_actions {
        pipeline.guardrails = pipeline.guardrails.with_suppressed_action(action);
    }
    if let Some(threshold) = payload.risk_threshold {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return error_reply(StatusCode::BAD_REQUEST, "riskThreshold must be within 0..=1");
        }
        pipeline = pipeline.with_gate(RiskGate::new().with_threshold(threshold));
    }

    let report = pipeline.run(&payload.input, state.oracle.as_ref()).await;

    state
        .metrics
        .analyses
        .with_label_values(&[report.decision.verdict.to_string().as_str()])
        .inc();
    if let Ok(mut audit) = state.audit.lock() {
        audit.log_report(&report);
    }

    let status = if report.decision.verdict == Verdict::ToolError {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    match to_value(&report) {
        Ok(mut body) => {
            body["exitCode"] = json!(report.exit_code());
            (status, Json(body))
        }
        Err(reply) => reply,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRequest {
    pub last_proposed: PolicyDocument,
    pub current_live: PolicyDocument,
}

pub async fn drift(State(state): State<Arc<AppState>>, Json(payload): Json<DriftRequest>) -> Reply {
    let report = detect(&payload.last_proposed, &payload.current_live);
    if report.has_drift {
        state.metrics.drift_detected.inc();
        info!(summary = %report.diff.change_summary, "drift detected");
    }
    match to_value(&report) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(reply) => reply,
    }
}

// =============================================================================
// Rollouts
// =============================================================================

/// Submit and start driving in the background. An execution that needs
/// approval stays Pending until approved.
pub async fn submit_rollout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RolloutRequest>,
) -> Reply {
    let exec = match state.controller.submit(request).await {
        Ok(exec) => exec,
        Err(e) => return rollout_error(e),
    };
    state.metrics.rollouts_submitted.inc();
    spawn_run(&state, exec.id.clone());
    execution_reply(StatusCode::ACCEPTED, &exec)
}

pub async fn dry_run_rollout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RolloutRequest>,
) -> Reply {
    match state.controller.dry_run(&request).await {
        Ok(report) => match to_value(&report) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(reply) => reply,
        },
        Err(e) => rollout_error(e),
    }
}

pub async fn get_rollout(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Reply {
    match state.controller.status(&id) {
        Ok(exec) => execution_reply(StatusCode::OK, &exec),
        Err(e) => rollout_error(e),
    }
}

pub async fn list_target_rollouts(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
) -> Reply {
    match state.controller.list(&target) {
        Ok(executions) => match to_value(&executions) {
            Ok(list) => (
                StatusCode::OK,
                Json(json!({ "target": target, "executions": list })),
            ),
            Err(reply) => reply,
        },
        Err(e) => rollout_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub approver: String,
    #[serde(default = "default_approved")]
    pub approved: bool,
    #[serde(default)]
    pub comments: String,
}

fn default_approved() -> bool {
    true
}

pub async fn approve_rollout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ApproveRequest>,
) -> Reply {
    if payload.approver.trim().is_empty() {
        return error_reply(StatusCode::BAD_REQUEST, "approver is required");
    }
    let record = if payload.approved {
        ApprovalRecord::approved(payload.approver)
    } else {
        ApprovalRecord::rejected(payload.approver)
    }
    .with_comments(payload.comments);

    match state.controller.approve(&id, record) {
        Ok(exec) => {
            if exec.is_approved() {
                spawn_run(&state, exec.id.clone());
            }
            execution_reply(StatusCode::OK, &exec)
        }
        Err(e) => rollout_error(e),
    }
}

pub async fn cancel_rollout(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Reply {
    match state.controller.cancel(&id) {
        Ok(exec) => execution_reply(StatusCode::OK, &exec),
        Err(e) => rollout_error(e),
    }
}

/// Drive `id` on a background task and count its terminal state
pub fn spawn_run(state: &Arc<AppState>, id: String) {
    let handle = state.controller.spawn(id);
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Ok(Ok(exec)) = handle.await {
            if exec.is_terminal() {
                state
                    .metrics
                    .rollout_outcomes
                    .with_label_values(&[exec.overall_status.to_string().as_str()])
                    .inc();
            }
        }
    });
}

// =============================================================================
// Operational
// =============================================================================

pub async fn health() -> Reply {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": ALPHA_VERSION })),
    )
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
