//! Route-level tests through the axum router

use alpha_api::{create_app, AppState};
use alpha_policy::{GuardrailConfig, PresetName};
use alpha_rollout::{
    ExecutionStore, FileStore, InMemoryApplier, InMemoryStore, RolloutConfig, RolloutExecution,
    RolloutRequest, StaticMetrics,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app_on(store: Arc<dyn ExecutionStore>, config: RolloutConfig, metric: f64) -> Router {
    let state = AppState::with_collaborators(
        GuardrailConfig::new(PresetName::Prod),
        config,
        store,
        Arc::new(InMemoryApplier::new()),
        Arc::new(StaticMetrics(metric)),
    )
    .unwrap();
    create_app(Arc::new(state))
}

fn app_with(config: RolloutConfig, metric: f64) -> Router {
    app_on(Arc::new(InMemoryStore::new()), config, metric)
}

fn app() -> Router {
    app_with(RolloutConfig::fast(), 0.0)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn proposed_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["s3:GetObject"],
            "Resource": "arn:aws:s3:::reports/*"
        }]
    })
}

async fn wait_for_status(app: &Router, id: &str, wanted: &str) -> Value {
    for _ in 0..400 {
        let (_, body) = send(app, "GET", &format!("/v1/rollouts/{}", id), None).await;
        if body["overallStatus"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution {} never reached {}", id, wanted);
}

// =============================================================================
// Analysis
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_analyze_admin_policy_is_blocked() {
    let payload = json!({
        "usage": { "targetId": "role/admin", "observationDays": 90 },
        "observedPolicy": {
            "Version": "2012-10-17",
            "Statement": { "Effect": "Allow", "Action": "*", "Resource": "*" }
        }
    });
    let (status, body) = send(&app(), "POST", "/v1/analyze", Some(payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exitCode"], 3);
    assert_eq!(body["decision"]["verdict"], "BLOCKED");
}

#[tokio::test]
async fn test_analyze_invalid_input_is_tool_error() {
    let payload = json!({
        "usage": { "targetId": "role/app", "observationDays": 0 },
        "observedPolicy": proposed_policy(),
        "preset": "none"
    });
    let (status, body) = send(&app(), "POST", "/v1/analyze", Some(payload)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["exitCode"], 1);
}

#[tokio::test]
async fn test_drift_reports_added_action() {
    let live = json!({
        "Statement": [{
            "Effect": "Allow",
            "Action": ["s3:GetObject", "s3:DeleteObject"],
            "Resource": "arn:aws:s3:::reports/*"
        }]
    });
    let payload = json!({ "lastProposed": proposed_policy(), "currentLive": live });
    let (status, body) = send(&app(), "POST", "/v1/drift", Some(payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasDrift"], true);
    assert_eq!(body["addedActions"], json!(["s3:DeleteObject"]));
}

// =============================================================================
// Rollouts
// =============================================================================

#[tokio::test]
async fn test_rollout_runs_to_completion() {
    let app = app();
    let payload = json!({ "targetId": "role/app", "proposedPolicy": proposed_policy() });

    let (status, body) = send(&app, "POST", "/v1/rollouts", Some(payload)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_string();

    let done = wait_for_status(&app, &id, "COMPLETED").await;
    assert_eq!(done["stages"].as_array().unwrap().len(), 3);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/rollouts/{}/approve", id),
        Some(json!({ "approver": "late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, list) = send(&app, "GET", "/v1/targets/role%2Fapp/rollouts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["executions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_approval_flow_over_http() {
    let app = app_with(RolloutConfig::fast().with_approval_required(true), 0.0);
    let payload = json!({ "targetId": "role/app", "proposedPolicy": proposed_policy() });

    let (_, body) = send(&app, "POST", "/v1/rollouts", Some(payload.clone())).await;
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(body["overallStatus"], "PENDING");

    let (status, _) = send(&app, "POST", "/v1/rollouts", Some(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/rollouts/{}/approve", id),
        Some(json!({ "approver": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/rollouts/{}/approve", id),
        Some(json!({ "approver": "secops", "comments": "reviewed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approval"]["approver"], "secops");

    wait_for_status(&app, &id, "COMPLETED").await;
}

#[tokio::test]
async fn test_cancel_pending_rollout() {
    let app = app_with(RolloutConfig::fast().with_approval_required(true), 0.0);
    let payload = json!({ "targetId": "role/app", "proposedPolicy": proposed_policy() });
    let (_, body) = send(&app, "POST", "/v1/rollouts", Some(payload)).await;
    let id = body["id"].as_str().unwrap().to_string();

    // Give the background run time to observe the missing approval
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (status, body) = send(&app, "POST", &format!("/v1/rollouts/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overallStatus"], "ROLLED_BACK");

    let (status, _) = send(&app, "POST", &format!("/v1/rollouts/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unhealthy_rollback_fails_over_http() {
    let app = app_with(RolloutConfig::fast(), 0.5);
    let payload = json!({ "targetId": "role/app", "proposedPolicy": proposed_policy() });
    let (_, body) = send(&app, "POST", "/v1/rollouts", Some(payload)).await;
    let id = body["id"].as_str().unwrap().to_string();

    // The rollback is observed against the same unhealthy metric
    let done = wait_for_status(&app, &id, "FAILED").await;
    assert_eq!(done["state"]["state"], "FAILED");
}

#[tokio::test]
async fn test_dry_run_does_not_create_execution() {
    let app = app();
    let payload = json!({
        "targetId": "role/app",
        "proposedPolicy": proposed_policy(),
        "canaryPercent": 30
    });
    let (status, body) = send(&app, "POST", "/v1/rollouts/dry-run", Some(payload)).await;

    assert_eq!(status, StatusCode::OK);
    let plan = body["plan"].as_array().unwrap();
    assert_eq!(plan.len(), 3);
    assert_eq!(plan[1]["trafficPercent"], 30);

    let (_, list) = send(&app, "GET", "/v1/targets/role%2Fapp/rollouts", None).await;
    assert!(list["executions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_and_unknown_rollouts() {
    let app = app();
    let payload = json!({
        "targetId": "role/app",
        "proposedPolicy": proposed_policy(),
        "canaryPercent": 0
    });
    let (status, _) = send(&app, "POST", "/v1/rollouts", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/v1/rollouts/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ROLLOUT/NOT_FOUND"));
}

#[tokio::test]
async fn test_rollout_ids_cannot_leave_state_dir() {
    let root = tempfile::tempdir().unwrap();
    let store = FileStore::open(root.path().join("state")).unwrap();
    let request = RolloutRequest::new(
        "role/app",
        serde_json::from_value(proposed_policy()).unwrap(),
    );
    let outside = RolloutExecution::new(&request, None, &RolloutConfig::fast());
    std::fs::write(
        root.path().join("secret.json"),
        serde_json::to_vec(&outside).unwrap(),
    )
    .unwrap();
    let app = app_on(Arc::new(store), RolloutConfig::fast(), 0.0);

    for uri in ["/v1/rollouts/..%2Fsecret", "/v1/rollouts/%2E%2E%2Fsecret"] {
        let (status, _) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app();
    send(&app, "GET", "/v1/health", None).await;

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("alpha_http_requests_total"));
}
