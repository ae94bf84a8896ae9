//! SQLite-backed stores (persistence).
//!
//! One connection serves the event log, the audit log, and the tenant table. Abandonment
//! uniqueness is a partial unique index, so a duplicate insert fails inside SQLite rather
//! than relying on a prior lookup.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params_from_iter, ErrorCode, OptionalExtension};
use shop_types::{
    AuditLogError, AuditLogStore, CommerceEvent, EventMetadata, EventQuery, EventStats, EventStore,
    EventStoreError, EventType, MatchPredicate, NewCommerceEvent, ProductSnapshot, Tenant,
    TenantDirectory, TenantError, TimeRange, WebhookAuditEntry,
};
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS commerce_events (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    customer_email TEXT,
    customer_name TEXT,
    external_customer_id TEXT,
    value REAL,
    products TEXT NOT NULL,
    metadata TEXT NOT NULL,
    abandonment_key TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_tenant_type_created
    ON commerce_events(tenant_id, event_type, created_at);
CREATE INDEX IF NOT EXISTS idx_events_type_created
    ON commerce_events(event_type, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS ux_events_abandonment
    ON commerce_events(tenant_id, event_type, abandonment_key)
    WHERE abandonment_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS webhook_audit_log (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    source TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_created ON webhook_audit_log(created_at);

CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    shopify_url TEXT NOT NULL
);
"#;

const EVENT_COLUMNS: &str = "id, tenant_id, event_type, customer_email, customer_name, external_customer_id, value, products, metadata, created_at";

/// SQLite-backed store for events, audit log, and tenants.
pub struct SqliteStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

/// Fixed-width UTC timestamps so that text comparison orders like time.
///
/// Truncated to microseconds: instants within the same microsecond compare equal, so a
/// range bound carrying nanoseconds admits events from earlier in that microsecond.
fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn decode_json<T: serde::de::DeserializeOwned>(idx: usize, value: &str) -> Result<T, rusqlite::Error> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

fn map_event_row(row: &rusqlite::Row<'_>) -> Result<CommerceEvent, rusqlite::Error> {
    let event_type: String = row.get(2)?;
    let products: String = row.get(7)?;
    let metadata: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    Ok(CommerceEvent {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        event_type: event_type.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        customer_email: row.get(3)?,
        customer_name: row.get(4)?,
        external_customer_id: row.get(5)?,
        value: row.get(6)?,
        products: decode_json::<Vec<ProductSnapshot>>(7, &products)?,
        metadata: decode_json::<EventMetadata>(8, &metadata)?,
        created_at: parse_ts(&created_at)?,
    })
}

/// WHERE clause and bound parameters for an event query.
fn event_filter(query: &EventQuery) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(ref t) = query.tenant_id {
        params.push(t.clone());
        clauses.push(format!("tenant_id = ?{}", params.len()));
    }
    if !query.types.is_empty() {
        let mut slots = Vec::with_capacity(query.types.len());
        for t in &query.types {
            params.push(t.as_str().to_string());
            slots.push(format!("?{}", params.len()));
        }
        clauses.push(format!("event_type IN ({})", slots.join(",")));
    }
    if let Some(ref email) = query.customer_email {
        params.push(email.clone());
        clauses.push(format!("customer_email = ?{}", params.len()));
    }
    push_range(&query.range, &mut clauses, &mut params);
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, params)
}

fn push_range(range: &TimeRange, clauses: &mut Vec<String>, params: &mut Vec<String>) {
    if let Some(from) = range.from {
        params.push(ts(&from));
        clauses.push(format!("created_at >= ?{}", params.len()));
    }
    if let Some(to) = range.to {
        params.push(ts(&to));
        clauses.push(format!("created_at < ?{}", params.len()));
    }
}

impl SqliteStore {
    /// Open (or create) a SQLite store at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EventStoreError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| EventStoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, EventStoreError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| EventStoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, EventStoreError> {
        conn.pragma_update(None, "busy_timeout", 5000)
            .and_then(|_| conn.execute_batch(SCHEMA))
            .map_err(|e| EventStoreError::Other(e.to_string()))?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("failed to acquire lock: {}", e))?;
        f(&conn).map_err(|e| e.to_string())
    }
}

#[async_trait::async_trait]
impl EventStore for SqliteStore {
    async fn append(&self, event: NewCommerceEvent) -> Result<CommerceEvent, EventStoreError> {
        let id = Uuid::new_v4().to_string();
        let key = event.abandonment_key().map(str::to_string);
        let conn = self
            .conn
            .lock()
            .map_err(|e| EventStoreError::Other(format!("failed to acquire lock: {}", e)))?;
        let products = serde_json::to_string(&event.products).map_err(|e| EventStoreError::Other(e.to_string()))?;
        let metadata = serde_json::to_string(&event.metadata).map_err(|e| EventStoreError::Other(e.to_string()))?;
        let res = conn.execute(
            "INSERT INTO commerce_events (id, tenant_id, event_type, customer_email, customer_name, external_customer_id, value, products, metadata, abandonment_key, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                id,
                event.tenant_id,
                event.event_type.as_str(),
                event.customer_email,
                event.customer_name,
                event.external_customer_id,
                event.value,
                products,
                metadata,
                key,
                ts(&event.created_at),
            ],
        );
        match res {
            Ok(_) => Ok(event.into_stored(id)),
            Err(e) if is_unique_violation(&e) => Err(EventStoreError::Conflict {
                tenant_id: event.tenant_id,
                event_type: event.event_type,
                key: key.unwrap_or_default(),
            }),
            Err(e) => Err(EventStoreError::Other(e.to_string())),
        }
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<CommerceEvent>, EventStoreError> {
        let (filter, params) = event_filter(query);
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM commerce_events{filter} ORDER BY created_at DESC, rowid DESC");
        if query.limit.is_some() || query.offset.is_some() {
            let limit = query.limit.map_or(-1, i64::from);
            let offset = query.offset.unwrap_or(0);
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), map_event_row)?;
            rows.collect()
        })
        .map_err(EventStoreError::Other)
    }

    async fn count(&self, query: &EventQuery) -> Result<u64, EventStoreError> {
        let (filter, params) = event_filter(query);
        let sql = format!("SELECT COUNT(*) FROM commerce_events{filter}");
        self.with_conn(|conn| {
            conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get::<_, i64>(0))
        })
        .map(|n| n as u64)
        .map_err(EventStoreError::Other)
    }

    async fn find_one(
        &self,
        tenant_id: &str,
        event_type: EventType,
        predicate: &MatchPredicate,
    ) -> Result<Option<CommerceEvent>, EventStoreError> {
        let mut params: Vec<String> = vec![tenant_id.to_string(), event_type.as_str().to_string()];
        let mut identity: Vec<String> = Vec::new();
        if let Some(ref email) = predicate.customer_email {
            params.push(email.clone());
            identity.push(format!("customer_email = ?{}", params.len()));
        }
        if let Some(ref token) = predicate.token {
            params.push(token.value.clone());
            identity.push(format!(
                "json_extract(metadata, '$.{}') = ?{}",
                token.key.json_name(),
                params.len()
            ));
        }
        if identity.is_empty() {
            return Ok(None);
        }
        let mut sql = format!(
            "SELECT {EVENT_COLUMNS} FROM commerce_events WHERE tenant_id = ?1 AND event_type = ?2 AND ({})",
            identity.join(" OR ")
        );
        if let Some(at) = predicate.created_at_or_after {
            params.push(ts(&at));
            sql.push_str(&format!(" AND created_at >= ?{}", params.len()));
        }
        sql.push_str(" LIMIT 1");
        self.with_conn(|conn| {
            conn.query_row(&sql, params_from_iter(params.iter()), map_event_row)
                .optional()
        })
        .map_err(EventStoreError::Other)
    }

    async fn stats(&self, tenant_id: &str, range: TimeRange) -> Result<EventStats, EventStoreError> {
        let mut clauses = vec!["tenant_id = ?1".to_string()];
        let mut params = vec![tenant_id.to_string()];
        push_range(&range, &mut clauses, &mut params);
        let sql = format!(
            "SELECT event_type, COUNT(*), COALESCE(SUM(value), 0.0) FROM commerce_events WHERE {} GROUP BY event_type",
            clauses.join(" AND ")
        );
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .map_err(EventStoreError::Other)?;
        let mut stats = EventStats::default();
        for (event_type, count, total) in rows {
            let event_type: EventType = event_type
                .parse()
                .map_err(|e: shop_types::UnknownEventType| EventStoreError::Other(e.to_string()))?;
            let entry = stats.by_type.entry(event_type).or_default();
            entry.count = count as u64;
            entry.total_value = total;
            stats.totals.count += count as u64;
            stats.totals.total_value += total;
        }
        Ok(stats)
    }
}

#[async_trait::async_trait]
impl AuditLogStore for SqliteStore {
    async fn append(&self, entry: WebhookAuditEntry) -> Result<(), AuditLogError> {
        let payload = serde_json::to_string(&entry.payload).map_err(|e| AuditLogError::Other(e.to_string()))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO webhook_audit_log (id, tenant_id, source, event_type, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    entry.id,
                    entry.tenant_id,
                    entry.source,
                    entry.event_type,
                    payload,
                    ts(&entry.created_at),
                ],
            )
        })
        .map_err(AuditLogError::Other)?;
        Ok(())
    }

    async fn list(&self, tenant_id: &str, limit: u32) -> Result<Vec<WebhookAuditEntry>, AuditLogError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, source, event_type, payload, created_at FROM webhook_audit_log WHERE tenant_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![tenant_id, limit], |row| {
                let payload: String = row.get(4)?;
                let created_at: String = row.get(5)?;
                Ok(WebhookAuditEntry {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    source: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: decode_json(4, &payload)?,
                    created_at: parse_ts(&created_at)?,
                })
            })?;
            rows.collect()
        })
        .map_err(AuditLogError::Other)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditLogError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM webhook_audit_log WHERE created_at < ?1",
                [ts(&cutoff)],
            )
        })
        .map(|n| n as u64)
        .map_err(AuditLogError::Other)
    }
}

#[async_trait::async_trait]
impl TenantDirectory for SqliteStore {
    async fn find_by_shop_domain(&self, domain: &str) -> Result<Tenant, TenantError> {
        let tenants = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT id, name, shopify_url FROM tenants ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Tenant {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        shopify_url: row.get(2)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .map_err(TenantError::Other)?;
        tenants
            .into_iter()
            .find(|t| t.matches_shop_domain(domain))
            .ok_or_else(|| TenantError::NotFound(domain.to_string()))
    }

    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, TenantError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, shopify_url FROM tenants WHERE id = ?1",
                [tenant_id],
                |row| {
                    Ok(Tenant {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        shopify_url: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .map_err(TenantError::Other)
    }

    async fn register(&self, tenant: Tenant) -> Result<(), TenantError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tenants (id, name, shopify_url) VALUES (?1, ?2, ?3)",
                rusqlite::params![tenant.id, tenant.name, tenant.shopify_url],
            )
        })
        .map_err(TenantError::Other)?;
        Ok(())
    }
}
