//! Raw webhook audit log, kept for debugging and subject to age-based deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit entries older than this are removed by the retention sweep.
pub const AUDIT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuditEntry {
    pub id: String,
    pub tenant_id: String,
    /// Upstream system, e.g. `shopify`.
    pub source: String,
    /// Webhook topic, e.g. `carts/update`.
    pub event_type: String,
    /// Parsed JSON body, or the raw body as a string when it did not parse.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
