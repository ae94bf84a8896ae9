//! Scheduler job definitions for the correlator passes and the retention sweep.

use crate::config::JobIntervals;
use async_trait::async_trait;
use shop_correlator::{AbandonmentCorrelator, PassKind, RetentionSweep};
use shop_scheduler::{JobDefinition, JobError, JobHandler};
use std::sync::Arc;

pub const CART_PASS_JOB: &str = "cart_abandonment";
pub const CHECKOUT_PASS_JOB: &str = "checkout_abandonment";
pub const RETENTION_JOB: &str = "webhook_log_cleanup";

/// One correlator pass. A candidate-set read failure marks the run failed; per-candidate
/// failures are already counted in the report.
pub struct PassJob {
    correlator: Arc<AbandonmentCorrelator>,
    kind: PassKind,
}

#[async_trait]
impl JobHandler for PassJob {
    async fn run(&self) -> Result<serde_json::Value, JobError> {
        let report = self.correlator.run_pass(self.kind).await;
        if let Some(err) = &report.error {
            return Err(JobError::Failed(err.clone()));
        }
        serde_json::to_value(&report).map_err(|e| JobError::Failed(e.to_string()))
    }
}

pub struct RetentionJob {
    sweep: Arc<RetentionSweep>,
}

#[async_trait]
impl JobHandler for RetentionJob {
    async fn run(&self) -> Result<serde_json::Value, JobError> {
        let report = self
            .sweep
            .run()
            .await
            .map_err(|e| JobError::Failed(e.to_string()))?;
        serde_json::to_value(&report).map_err(|e| JobError::Failed(e.to_string()))
    }
}

/// The scheduler's job list: cart pass, checkout pass, retention sweep.
pub fn job_definitions(
    correlator: Arc<AbandonmentCorrelator>,
    sweep: Arc<RetentionSweep>,
    intervals: JobIntervals,
) -> Vec<JobDefinition> {
    vec![
        JobDefinition::new(
            CART_PASS_JOB,
            intervals.cart_pass,
            Arc::new(PassJob {
                correlator: Arc::clone(&correlator),
                kind: PassKind::Cart,
            }),
        ),
        JobDefinition::new(
            CHECKOUT_PASS_JOB,
            intervals.checkout_pass,
            Arc::new(PassJob {
                correlator,
                kind: PassKind::Checkout,
            }),
        ),
        JobDefinition::new(RETENTION_JOB, intervals.retention, Arc::new(RetentionJob { sweep })),
    ]
}
