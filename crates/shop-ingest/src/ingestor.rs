//! Ingest operation: one webhook delivery, one attempt.

use crate::payload::normalize;
use shop_types::{
    AuditLogError, AuditLogStore, Clock, CommerceEvent, EventStore, EventStoreError, EventType,
    TenantDirectory, TenantError, WebhookAuditEntry,
};
use std::sync::Arc;
use uuid::Uuid;

const AUDIT_SOURCE: &str = "shopify";

/// Inbound Shopify webhook topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookTopic {
    CartsUpdate,
    CheckoutsCreate,
    CheckoutsUpdate,
    OrdersCreate,
}

impl WebhookTopic {
    pub const ALL: [WebhookTopic; 4] = [
        WebhookTopic::CartsUpdate,
        WebhookTopic::CheckoutsCreate,
        WebhookTopic::CheckoutsUpdate,
        WebhookTopic::OrdersCreate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WebhookTopic::CartsUpdate => "carts/update",
            WebhookTopic::CheckoutsCreate => "checkouts/create",
            WebhookTopic::CheckoutsUpdate => "checkouts/update",
            WebhookTopic::OrdersCreate => "orders/create",
        }
    }

    /// Topic from its Shopify name, e.g. `"orders/create"`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn event_type(self) -> EventType {
        match self {
            WebhookTopic::CartsUpdate => EventType::CartUpdated,
            WebhookTopic::CheckoutsCreate => EventType::CheckoutStarted,
            WebhookTopic::CheckoutsUpdate => EventType::CheckoutUpdated,
            WebhookTopic::OrdersCreate => EventType::OrderPlaced,
        }
    }
}

impl std::fmt::Display for WebhookTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("missing shop domain")]
    MissingShopDomain,
    #[error("tenant not found for domain {0}")]
    TenantNotFound(String),
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("tenant directory: {0}")]
    Directory(String),
    #[error(transparent)]
    Store(#[from] EventStoreError),
    #[error(transparent)]
    AuditLog(#[from] AuditLogError),
}

impl From<TenantError> for IngestError {
    fn from(value: TenantError) -> Self {
        match value {
            TenantError::NotFound(domain) => IngestError::TenantNotFound(domain),
            TenantError::Other(msg) => IngestError::Directory(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Normalized and appended.
    Recorded(CommerceEvent),
    /// Audit-logged and acknowledged; no event (e.g. an empty cart).
    AuditedOnly,
}

/// Webhook ingestion over the store traits. Payloads are assumed signature-verified.
pub struct WebhookIngestor {
    events: Arc<dyn EventStore>,
    audit_log: Arc<dyn AuditLogStore>,
    tenants: Arc<dyn TenantDirectory>,
    clock: Arc<dyn Clock>,
}

impl WebhookIngestor {
    pub fn new(
        events: Arc<dyn EventStore>,
        audit_log: Arc<dyn AuditLogStore>,
        tenants: Arc<dyn TenantDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            audit_log,
            tenants,
            clock,
        }
    }

    /// Ingest one delivery.
    ///
    /// Order: shop domain check, tenant lookup, raw audit entry, normalization, append.
    /// Nothing is written before the tenant is known; the audit entry is written even when
    /// the body turns out to be malformed.
    pub async fn ingest(
        &self,
        topic: WebhookTopic,
        shop_domain: Option<&str>,
        body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let shop_domain = shop_domain
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(IngestError::MissingShopDomain)?;
        let tenant = self.tenants.find_by_shop_domain(shop_domain).await?;
        let now = self.clock.now();

        let parsed = serde_json::from_slice::<serde_json::Value>(body);
        let audit_payload = match &parsed {
            Ok(v) => v.clone(),
            Err(_) => serde_json::Value::String(String::from_utf8_lossy(body).into_owned()),
        };
        self.audit_log
            .append(WebhookAuditEntry {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant.id.clone(),
                source: AUDIT_SOURCE.to_string(),
                event_type: topic.as_str().to_string(),
                payload: audit_payload,
                created_at: now,
            })
            .await?;

        let data = parsed.map_err(|e| {
            tracing::warn!(tenant_id = %tenant.id, topic = %topic, error = %e, "unparseable webhook body");
            IngestError::Validation(format!("body is not valid JSON: {e}"))
        })?;
        let Some(event) = normalize(topic, &data, &tenant.id, now)? else {
            tracing::debug!(tenant_id = %tenant.id, topic = %topic, "webhook audited, no event recorded");
            return Ok(IngestOutcome::AuditedOnly);
        };
        let stored = self.events.append(event).await?;
        tracing::info!(
            tenant_id = %stored.tenant_id,
            topic = %topic,
            event_id = %stored.id,
            event_type = %stored.event_type,
            "webhook ingested"
        );
        Ok(IngestOutcome::Recorded(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use shop_store::{InMemoryAuditLog, InMemoryEventStore, InMemoryTenantDirectory};
    use shop_types::{EventQuery, FixedClock, Tenant};

    struct Harness {
        ingestor: WebhookIngestor,
        events: Arc<InMemoryEventStore>,
        audit: Arc<InMemoryAuditLog>,
    }

    fn harness() -> Harness {
        let events = Arc::new(InMemoryEventStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let tenants = Arc::new(InMemoryTenantDirectory::with_tenants(vec![Tenant {
            id: "t1".into(),
            name: "Acme".into(),
            shopify_url: "acme.myshopify.com".into(),
        }]));
        let ingestor = WebhookIngestor::new(
            events.clone(),
            audit.clone(),
            tenants,
            Arc::new(FixedClock::new(Utc::now())),
        );
        Harness {
            ingestor,
            events,
            audit,
        }
    }

    #[tokio::test]
    async fn missing_shop_domain_writes_nothing() {
        let h = harness();
        let body = json!({"token": "x", "line_items": [{}]}).to_string();
        for domain in [None, Some("  ")] {
            let err = h
                .ingestor
                .ingest(WebhookTopic::CartsUpdate, domain, body.as_bytes())
                .await
                .unwrap_err();
            assert!(matches!(err, IngestError::MissingShopDomain));
        }
        assert!(h.events.is_empty().await);
        assert!(h.audit.list("t1", 10).await.unwrap().is_empty());
    }

    #[test]
    fn topic_names_round_trip() {
        for topic in WebhookTopic::ALL {
            assert_eq!(WebhookTopic::parse(topic.as_str()), Some(topic));
        }
        assert_eq!(WebhookTopic::parse("orders/paid"), None);
    }

    #[tokio::test]
    async fn unknown_shop_is_not_found() {
        let h = harness();
        let err = h
            .ingestor
            .ingest(WebhookTopic::OrdersCreate, Some("other.myshopify.com"), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_audited_but_not_recorded() {
        let h = harness();
        let err = h
            .ingestor
            .ingest(WebhookTopic::CheckoutsCreate, Some("acme.myshopify.com"), b"{not json")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        let audit = h.audit.list("t1", 10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].payload, json!("{not json"));
        assert_eq!(audit[0].event_type, "checkouts/create");
        assert!(h.events.is_empty().await);
    }

    #[tokio::test]
    async fn duplicate_deliveries_produce_duplicate_rows() {
        let h = harness();
        let body = json!({"token": "chk", "email": "a@x.com", "total_price": "5.00"}).to_string();
        for _ in 0..2 {
            let out = h
                .ingestor
                .ingest(WebhookTopic::CheckoutsCreate, Some("acme.myshopify.com"), body.as_bytes())
                .await
                .unwrap();
            assert!(matches!(out, IngestOutcome::Recorded(_)));
        }
        let all = h.events.query(&EventQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.tenant_id == "t1" && e.event_type == EventType::CheckoutStarted));
        assert_eq!(h.audit.list("t1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_cart_is_audited_only() {
        let h = harness();
        let body = json!({"token": "cart", "line_items": []}).to_string();
        let out = h
            .ingestor
            .ingest(WebhookTopic::CartsUpdate, Some("acme.myshopify.com"), body.as_bytes())
            .await
            .unwrap();
        assert!(matches!(out, IngestOutcome::AuditedOnly));
        assert!(h.events.is_empty().await);
        assert_eq!(h.audit.list("t1", 10).await.unwrap().len(), 1);
    }
}
