//! Binary entrypoint for the ALPHA API server.
use alpha_api::{resume_active, run, ApiConfig, AppState};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ApiConfig::from_env().context("reading configuration")?;
    let state = Arc::new(AppState::local(&config).context("building server state")?);

    let resumed = resume_active(&state);
    if resumed > 0 {
        tracing::info!(resumed, "resumed executions from state dir");
    }

    run(state, &config.addr)
        .await
        .with_context(|| format!("serving on {}", config.addr))
}
