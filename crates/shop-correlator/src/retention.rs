//! Audit-log retention.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shop_types::{AuditLogError, AuditLogStore, Clock, AUDIT_RETENTION_DAYS};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub removed: u64,
}

/// Deletes webhook audit entries older than the retention horizon.
/// Commerce events are never touched.
pub struct RetentionSweep {
    audit_log: Arc<dyn AuditLogStore>,
    clock: Arc<dyn Clock>,
    horizon: Duration,
}

impl RetentionSweep {
    pub fn new(audit_log: Arc<dyn AuditLogStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            audit_log,
            clock,
            horizon: Duration::days(AUDIT_RETENTION_DAYS),
        }
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = horizon;
        self
    }

    pub async fn run(&self) -> Result<SweepReport, AuditLogError> {
        let cutoff = self.clock.now() - self.horizon;
        let removed = self.audit_log.purge_older_than(cutoff).await?;
        tracing::info!(removed, %cutoff, "cleaned up old webhook audit entries");
        Ok(SweepReport { cutoff, removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_store::InMemoryAuditLog;
    use shop_types::{FixedClock, WebhookAuditEntry};

    #[tokio::test]
    async fn sweep_keeps_entries_inside_horizon() {
        let now = Utc::now();
        let log = Arc::new(InMemoryAuditLog::new());
        for (id, age) in [("old", Duration::days(30) + Duration::seconds(1)), ("edge", Duration::days(30)), ("new", Duration::hours(1))] {
            log.append(WebhookAuditEntry {
                id: id.into(),
                tenant_id: "t1".into(),
                source: "shopify".into(),
                event_type: "orders/create".into(),
                payload: serde_json::json!({"id": id}),
                created_at: now - age,
            })
            .await
            .unwrap();
        }
        let sweep = RetentionSweep::new(log.clone(), Arc::new(FixedClock::new(now)));
        let report = sweep.run().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.cutoff, now - Duration::days(30));
        let ids: Vec<String> = log.list("t1", 10).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["new", "edge"]);

        assert_eq!(sweep.run().await.unwrap().removed, 0);
    }
}
