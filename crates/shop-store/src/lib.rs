//! Event store, audit log, and tenant directory backends.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{InMemoryAuditLog, InMemoryEventStore, InMemoryTenantDirectory};
pub use shop_types::{
    AuditLogError, AuditLogStore, EventStore, EventStoreError, TenantDirectory, TenantError,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
