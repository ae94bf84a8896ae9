//! Commerce analytics API server: Shopify webhooks, event queries, scheduled abandonment detection.

use shop_api::config::Config;
use shop_api::server::{self, AppState};
use shop_store::{InMemoryAuditLog, InMemoryEventStore, InMemoryTenantDirectory, SqliteStore};
use shop_types::{AuditLogStore, Clock, EventStore, SystemClock, TenantDirectory};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Stores = (
    Arc<dyn EventStore>,
    Arc<dyn AuditLogStore>,
    Arc<dyn TenantDirectory>,
);

fn open_stores(config: &Config) -> Result<Stores, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(path) = &config.db_path {
        tracing::info!(path = %path.display(), "using SQLite stores");
        let store = Arc::new(SqliteStore::new(path)?);
        let events: Arc<dyn EventStore> = store.clone();
        let audit_log: Arc<dyn AuditLogStore> = store.clone();
        let tenants: Arc<dyn TenantDirectory> = store;
        return Ok((events, audit_log, tenants));
    }
    tracing::info!("using in-memory stores");
    Ok((
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryAuditLog::new()),
        Arc::new(InMemoryTenantDirectory::new()),
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let (events, audit_log, tenants) = open_stores(&config)?;
    for tenant in &config.tenants {
        tenants.register(tenant.clone()).await?;
        tracing::info!(tenant_id = %tenant.id, shop = %tenant.shopify_url, "tenant registered");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = Arc::new(AppState::new(events, audit_log, tenants, clock, config.intervals));
    state.scheduler.start().await;

    let app = server::router(Arc::clone(&state));
    tracing::info!("commerce analytics API listening on {}", config.listen);
    axum::serve(
        tokio::net::TcpListener::bind(config.listen).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
    })
    .await?;

    state.scheduler.stop().await;
    Ok(())
}
