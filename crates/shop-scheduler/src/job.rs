//! Job definitions and per-job run status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job failed: {0}")]
    Failed(String),
}

/// One unit of scheduled work. The returned value is kept as the job's last result.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> Result<serde_json::Value, JobError>;
}

/// Entry in the scheduler's job list.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub interval: Duration,
    pub handler: Arc<dyn JobHandler>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, interval: Duration, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name: name.into(),
            interval,
            handler,
        }
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Never run.
    Pending,
    Running,
    Done,
    Failed,
}

/// Observed state of one job. Held for observability only; runs never read it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub name: String,
    pub interval_secs: u64,
    pub status: JobStatus,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_result: Option<serde_json::Value>,
    pub run_count: u64,
    pub failure_count: u64,
}

impl JobInfo {
    pub(crate) fn pending(def: &JobDefinition) -> Self {
        Self {
            name: def.name.clone(),
            interval_secs: def.interval.as_secs(),
            status: JobStatus::Pending,
            last_started_at: None,
            last_finished_at: None,
            last_result: None,
            run_count: 0,
            failure_count: 0,
        }
    }
}
