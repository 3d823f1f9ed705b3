use crate::credits::{BatchResetSummary, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchResetResponse {
    pub total_candidates: usize,
    pub reset_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl From<BatchResetSummary> for BatchResetResponse {
    fn from(summary: BatchResetSummary) -> Self {
        Self {
            total_candidates: summary.total_candidates,
            reset_count: summary.reset_count,
            skipped_count: summary.skipped_count,
            error_count: summary.error_count,
            timestamp: summary.timestamp,
            duration_ms: summary.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub running: bool,
    pub scheduled: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_run: Option<BatchResetResponse>,
}

impl From<JobStatus> for JobStatusResponse {
    fn from(status: JobStatus) -> Self {
        Self {
            running: status.running,
            scheduled: status.scheduled,
            next_execution: status.next_execution,
            last_run: status.last_run.map(BatchResetResponse::from),
        }
    }
}
