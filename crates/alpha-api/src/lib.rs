//! ALPHA API /v1: REST endpoints over the hardening pipeline and rollouts
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod state;

pub use config::{ApiConfig, ConfigError};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/analyze", post(handlers::analyze))
        .route("/v1/drift", post(handlers::drift))
        .route("/v1/rollouts", post(handlers::submit_rollout))
        .route("/v1/rollouts/dry-run", post(handlers::dry_run_rollout))
        .route("/v1/rollouts/{id}", get(handlers::get_rollout))
        .route("/v1/rollouts/{id}/approve", post(handlers::approve_rollout))
        .route("/v1/rollouts/{id}/cancel", post(handlers::cancel_rollout))
        .route("/v1/targets/{target}/rollouts", get(handlers::list_target_rollouts))
        .route("/v1/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::track_requests,
                )),
        )
        .with_state(state)
}

/// Pick up executions a previous process left mid-flight
pub fn resume_active(state: &Arc<AppState>) -> usize {
    let active = match state.controller.active() {
        Ok(active) => active,
        Err(e) => {
            tracing::warn!(error = %e, "could not list executions to resume");
            return 0;
        }
    };
    let mut resumed = 0;
    for exec in active.into_iter().filter(|e| e.is_approved()) {
        tracing::info!(execution_id = %exec.id, target = %exec.target_resource_id, "resuming execution");
        handlers::spawn_run(state, exec.id);
        resumed += 1;
    }
    resumed
}

pub async fn run(state: Arc<AppState>, addr: &str) -> std::io::Result<()> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("ALPHA API listening on {}", addr);
    axum::serve(listener, app).await
}
