//! Storage and directory traits implemented by `shop-store`.

use crate::{
    CommerceEvent, EventQuery, EventStats, EventType, MatchPredicate, NewCommerceEvent, Tenant,
    TimeRange, WebhookAuditEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Append-only commerce event log, scoped per tenant.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event and return it with its assigned id.
    ///
    /// Abandonment events are unique on (tenant, type, abandonment key); a second insert
    /// for the same key fails with `EventStoreError::Conflict` and stores nothing.
    async fn append(&self, event: NewCommerceEvent) -> Result<CommerceEvent, EventStoreError>;

    /// Events matching the filter, newest first.
    async fn query(&self, query: &EventQuery) -> Result<Vec<CommerceEvent>, EventStoreError>;

    /// Number of events matching the filter, ignoring `limit`/`offset`.
    async fn count(&self, query: &EventQuery) -> Result<u64, EventStoreError>;

    /// Any one event of `event_type` for `tenant_id` satisfying the predicate.
    async fn find_one(
        &self,
        tenant_id: &str,
        event_type: EventType,
        predicate: &MatchPredicate,
    ) -> Result<Option<CommerceEvent>, EventStoreError>;

    /// Count and summed value per type for one tenant.
    async fn stats(&self, tenant_id: &str, range: TimeRange) -> Result<EventStats, EventStoreError>;
}

/// Raw webhook audit log.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, entry: WebhookAuditEntry) -> Result<(), AuditLogError>;

    /// Entries for one tenant, newest first.
    async fn list(&self, tenant_id: &str, limit: u32) -> Result<Vec<WebhookAuditEntry>, AuditLogError>;

    /// Delete entries created strictly before `cutoff`; returns how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditLogError>;
}

/// Tenant lookup. Tenants are created elsewhere; this is read-mostly.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_by_shop_domain(&self, domain: &str) -> Result<Tenant, TenantError>;

    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, TenantError>;

    async fn register(&self, tenant: Tenant) -> Result<(), TenantError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("{event_type} already recorded for key {key} (tenant {tenant_id})")]
    Conflict {
        tenant_id: String,
        event_type: EventType,
        key: String,
    },
    #[error("event store error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("audit log error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("tenant not found for domain {0}")]
    NotFound(String),
    #[error("tenant directory error: {0}")]
    Other(String),
}
