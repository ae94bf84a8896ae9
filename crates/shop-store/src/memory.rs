//! In-memory stores (process lifetime only).

use shop_types::{
    AuditLogError, AuditLogStore, CommerceEvent, EventQuery, EventStats, EventStore,
    EventStoreError, EventType, MatchPredicate, NewCommerceEvent, Tenant, TenantDirectory,
    TenantError, TimeRange, WebhookAuditEntry,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

type AbandonmentKey = (String, EventType, String);

#[derive(Default)]
struct EventLog {
    /// Append order; queries sort by `created_at`.
    events: Vec<CommerceEvent>,
    /// (tenant_id, abandonment type, key) for every stored abandonment event.
    abandonment_keys: HashSet<AbandonmentKey>,
}

/// In-memory implementation of EventStore.
/// The uniqueness check and the insert happen under one write lock, so concurrent
/// appends of the same abandonment cannot both succeed.
pub struct InMemoryEventStore {
    log: Arc<RwLock<EventLog>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(EventLog::default())),
        }
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn sorted_matches(events: &[CommerceEvent], query: &EventQuery) -> Vec<CommerceEvent> {
        let mut out: Vec<CommerceEvent> = events.iter().filter(|e| query.matches(e)).cloned().collect();
        // stable: equal timestamps keep reverse append order
        out.reverse();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: NewCommerceEvent) -> Result<CommerceEvent, EventStoreError> {
        let mut log = self.log.write().await;
        if let Some(key) = event.abandonment_key() {
            let k = (event.tenant_id.clone(), event.event_type, key.to_string());
            if log.abandonment_keys.contains(&k) {
                return Err(EventStoreError::Conflict {
                    tenant_id: k.0,
                    event_type: k.1,
                    key: k.2,
                });
            }
            log.abandonment_keys.insert(k);
        }
        let stored = event.into_stored(Uuid::new_v4().to_string());
        log.events.push(stored.clone());
        Ok(stored)
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<CommerceEvent>, EventStoreError> {
        let log = self.log.read().await;
        let offset = query.offset.unwrap_or(0) as usize;
        let out = Self::sorted_matches(&log.events, query).into_iter().skip(offset);
        Ok(match query.limit {
            Some(limit) => out.take(limit as usize).collect(),
            None => out.collect(),
        })
    }

    async fn count(&self, query: &EventQuery) -> Result<u64, EventStoreError> {
        let log = self.log.read().await;
        Ok(log.events.iter().filter(|e| query.matches(e)).count() as u64)
    }

    async fn find_one(
        &self,
        tenant_id: &str,
        event_type: EventType,
        predicate: &MatchPredicate,
    ) -> Result<Option<CommerceEvent>, EventStoreError> {
        let log = self.log.read().await;
        Ok(log
            .events
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.event_type == event_type && predicate.matches(e))
            .cloned())
    }

    async fn stats(&self, tenant_id: &str, range: TimeRange) -> Result<EventStats, EventStoreError> {
        let log = self.log.read().await;
        let mut stats = EventStats::default();
        for e in log
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && range.contains(e.created_at))
        {
            stats.record(e.event_type, e.value);
        }
        Ok(stats)
    }
}

/// In-memory implementation of AuditLogStore.
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<WebhookAuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuditLogStore for InMemoryAuditLog {
    async fn append(&self, entry: WebhookAuditEntry) -> Result<(), AuditLogError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn list(&self, tenant_id: &str, limit: u32) -> Result<Vec<WebhookAuditEntry>, AuditLogError> {
        let guard = self.entries.read().await;
        let mut out: Vec<WebhookAuditEntry> = guard
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.reverse();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn purge_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64, AuditLogError> {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|e| e.created_at >= cutoff);
        Ok((before - guard.len()) as u64)
    }
}

/// In-memory implementation of TenantDirectory.
pub struct InMemoryTenantDirectory {
    tenants: RwLock<Vec<Tenant>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(Vec::new()),
        }
    }

    pub fn with_tenants(tenants: Vec<Tenant>) -> Self {
        Self {
            tenants: RwLock::new(tenants),
        }
    }
}

impl Default for InMemoryTenantDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_by_shop_domain(&self, domain: &str) -> Result<Tenant, TenantError> {
        let guard = self.tenants.read().await;
        guard
            .iter()
            .find(|t| t.matches_shop_domain(domain))
            .cloned()
            .ok_or_else(|| TenantError::NotFound(domain.to_string()))
    }

    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, TenantError> {
        let guard = self.tenants.read().await;
        Ok(guard.iter().find(|t| t.id == tenant_id).cloned())
    }

    async fn register(&self, tenant: Tenant) -> Result<(), TenantError> {
        let mut guard = self.tenants.write().await;
        guard.retain(|t| t.id != tenant.id);
        guard.push(tenant);
        Ok(())
    }
}
