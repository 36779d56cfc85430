//! Prometheus metrics served on `/metrics`
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub analyses: IntCounterVec,
    pub rollouts_submitted: IntCounter,
    pub rollout_outcomes: IntCounterVec,
    pub drift_detected: IntCounter,
}

impl ApiMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("alpha_http_requests_total", "HTTP requests by method and status"),
            &["method", "status"],
        )?;
        let analyses = IntCounterVec::new(
            Opts::new("alpha_analyses_total", "Hardening pipeline runs by verdict"),
            &["verdict"],
        )?;
        let rollouts_submitted =
            IntCounter::new("alpha_rollouts_submitted_total", "Rollout executions accepted")?;
        let rollout_outcomes = IntCounterVec::new(
            Opts::new("alpha_rollout_outcomes_total", "Terminal rollout states observed by the API"),
            &["status"],
        )?;
        let drift_detected =
            IntCounter::new("alpha_drift_detected_total", "Drift checks that found a difference")?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(analyses.clone()))?;
        registry.register(Box::new(rollouts_submitted.clone()))?;
        registry.register(Box::new(rollout_outcomes.clone()))?;
        registry.register(Box::new(drift_detected.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            analyses,
            rollouts_submitted,
            rollout_outcomes,
            drift_detected,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        encode(&self.registry)
    }
}

pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}
