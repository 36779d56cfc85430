//! Pipeline context: per-run identity carried through logs and reports
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub trace_id: String,
    pub target_id: String,
    pub started_at: DateTime<Utc>,
}

impl PipelineContext {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            started_at: Utc::now(),
        }
    }
}
