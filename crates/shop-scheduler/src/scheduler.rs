//! Interval scheduler: one ticker task per job definition, each firing run in its own task.

use crate::job::{JobDefinition, JobInfo, JobStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler error: {0}")]
    Other(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
}

type StatusMap = Arc<RwLock<HashMap<String, JobInfo>>>;

/// Owns the job list and its start/stop lifecycle.
///
/// A failing or panicking run is recorded as `Failed` and never affects later firings
/// or other jobs. Runs of the same job may overlap; handlers must tolerate that.
pub struct Scheduler {
    jobs: Vec<JobDefinition>,
    status: StatusMap,
    shutdown: watch::Sender<bool>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(jobs: Vec<JobDefinition>) -> Self {
        let status = jobs
            .iter()
            .map(|def| (def.name.clone(), JobInfo::pending(def)))
            .collect();
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs,
            status: Arc::new(RwLock::new(status)),
            shutdown,
            tickers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one ticker per job. First firing is one interval after start.
    /// Calling `start` on a running scheduler is a no-op.
    pub async fn start(&self) {
        let mut tickers = self.tickers.lock().await;
        if !tickers.is_empty() {
            tracing::warn!("scheduler already started");
            return;
        }
        self.shutdown.send_replace(false);
        for job in &self.jobs {
            let def = job.clone();
            let status = Arc::clone(&self.status);
            let mut shutdown = self.shutdown.subscribe();
            tickers.push(tokio::spawn(async move {
                let period = def.interval;
                let mut ticker = time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            tokio::spawn(execute(def.clone(), Arc::clone(&status)));
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                tracing::debug!(job = %def.name, "ticker stopped");
            }));
            tracing::info!(job = %job.name, interval_secs = job.interval.as_secs(), "job scheduled");
        }
    }

    /// Stop all tickers. Runs already in flight finish on their own.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = self.tickers.lock().await.drain(..).collect();
        for h in handles {
            if let Err(e) = h.await {
                tracing::warn!(error = %e, "ticker task ended abnormally");
            }
        }
        tracing::info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        !self.tickers.lock().await.is_empty()
    }

    /// Run one job now, outside its schedule, and wait for the result.
    pub async fn trigger(&self, name: &str) -> Result<JobInfo, SchedulerError> {
        let def = self
            .jobs
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        tracing::info!(job = %name, "manual trigger");
        Ok(execute(def, Arc::clone(&self.status)).await)
    }

    /// Job status in definition order.
    pub async fn list(&self) -> Vec<JobInfo> {
        let guard = self.status.read().await;
        self.jobs
            .iter()
            .filter_map(|d| guard.get(&d.name).cloned())
            .collect()
    }

    pub async fn get_status(&self, name: &str) -> Option<JobInfo> {
        self.status.read().await.get(name).cloned()
    }
}

/// Run the handler in its own task so a panic is contained, then record the outcome.
async fn execute(def: JobDefinition, status: StatusMap) -> JobInfo {
    let started = Utc::now();
    {
        let mut guard = status.write().await;
        if let Some(info) = guard.get_mut(&def.name) {
            info.status = JobStatus::Running;
            info.last_started_at = Some(started);
        }
    }
    tracing::info!(job = %def.name, "job started");

    let handler = Arc::clone(&def.handler);
    let outcome = tokio::spawn(async move { handler.run().await }).await;
    let (job_status, result) = match outcome {
        Ok(Ok(value)) => {
            tracing::info!(job = %def.name, "job finished");
            (JobStatus::Done, value)
        }
        Ok(Err(e)) => {
            tracing::error!(job = %def.name, error = %e, "job failed");
            (JobStatus::Failed, serde_json::json!({ "error": e.to_string() }))
        }
        Err(e) => {
            tracing::error!(job = %def.name, error = %e, "job panicked");
            (JobStatus::Failed, serde_json::json!({ "error": e.to_string() }))
        }
    };

    let mut guard = status.write().await;
    let info = guard
        .entry(def.name.clone())
        .or_insert_with(|| JobInfo::pending(&def));
    info.status = job_status;
    info.last_finished_at = Some(Utc::now());
    info.last_result = Some(result);
    info.run_count += 1;
    if job_status == JobStatus::Failed {
        info.failure_count += 1;
    }
    info.clone()
}
