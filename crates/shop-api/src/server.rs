//! Axum server and routes.

use crate::config::JobIntervals;
use crate::error::ApiError;
use crate::jobs::job_definitions;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shop_correlator::{AbandonmentCorrelator, RetentionSweep};
use shop_ingest::{IngestOutcome, WebhookIngestor, WebhookTopic};
use shop_scheduler::{JobInfo, Scheduler};
use shop_types::{
    AuditLogStore, BaseResponse, Clock, CommerceEvent, EventMetadata, EventPage, EventQuery,
    EventStats, EventStore, EventType, NewCommerceEvent, ProductSnapshot, Tenant, TenantDirectory,
    TimeRange, WebhookAuditEntry,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";
const TENANT_HEADER: &str = "x-tenant-id";
const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;

pub struct AppState {
    pub events: Arc<dyn EventStore>,
    pub audit_log: Arc<dyn AuditLogStore>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub clock: Arc<dyn Clock>,
    pub ingestor: WebhookIngestor,
    pub correlator: Arc<AbandonmentCorrelator>,
    pub scheduler: Scheduler,
}

impl AppState {
    /// Wire ingestion, correlator, sweep, and the scheduler's job list over the given stores.
    /// The scheduler is not started.
    pub fn new(
        events: Arc<dyn EventStore>,
        audit_log: Arc<dyn AuditLogStore>,
        tenants: Arc<dyn TenantDirectory>,
        clock: Arc<dyn Clock>,
        intervals: JobIntervals,
    ) -> Self {
        let ingestor = WebhookIngestor::new(
            Arc::clone(&events),
            Arc::clone(&audit_log),
            Arc::clone(&tenants),
            Arc::clone(&clock),
        );
        let correlator = Arc::new(AbandonmentCorrelator::new(Arc::clone(&events), Arc::clone(&clock)));
        let sweep = Arc::new(RetentionSweep::new(Arc::clone(&audit_log), Arc::clone(&clock)));
        let scheduler = Scheduler::new(job_definitions(Arc::clone(&correlator), sweep, intervals));
        Self {
            events,
            audit_log,
            tenants,
            clock,
            ingestor,
            correlator,
            scheduler,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/webhooks/test", get(handle_webhook_list))
        .route("/api/webhooks/shopify/:resource/:action", post(handle_webhook))
        .route(
            "/api/customer-events",
            get(handle_list_events).post(handle_create_event),
        )
        .route("/api/customer-events/stats", get(handle_event_stats))
        .route("/api/audit-log", get(handle_audit_list))
        .route("/api/jobs", get(handle_job_list))
        .route("/api/jobs/:name/run", post(handle_job_run))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Tenant named by the upstream auth layer; must be registered.
async fn require_tenant(state: &AppState, headers: &HeaderMap) -> Result<Tenant, ApiError> {
    let id = header(headers, TENANT_HEADER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {TENANT_HEADER} header")))?;
    state
        .tenants
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown tenant {id}")))
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path((resource, action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BaseResponse<serde_json::Value>>, ApiError> {
    let name = format!("{resource}/{action}");
    let topic = WebhookTopic::parse(&name)
        .ok_or_else(|| ApiError::NotFound(format!("unsupported webhook topic {name}")))?;
    let outcome = state
        .ingestor
        .ingest(topic, header(&headers, SHOP_DOMAIN_HEADER), &body)
        .await
        .map_err(|e| {
            tracing::warn!(topic = %topic, error = %e, "webhook rejected");
            ApiError::from(e)
        })?;
    let data = match outcome {
        IngestOutcome::Recorded(ev) => serde_json::json!({ "recorded": true, "eventId": ev.id }),
        IngestOutcome::AuditedOnly => serde_json::json!({ "recorded": false }),
    };
    Ok(Json(BaseResponse::ok(data)))
}

async fn handle_webhook_list() -> Json<BaseResponse<serde_json::Value>> {
    let endpoints: Vec<serde_json::Value> = WebhookTopic::ALL
        .iter()
        .map(|t| {
            serde_json::json!({
                "topic": t.as_str(),
                "path": format!("/api/webhooks/shopify/{}", t.as_str()),
                "eventType": t.event_type(),
            })
        })
        .collect();
    Json(BaseResponse {
        code: 200,
        message: "Webhook endpoints are active".to_string(),
        data: Some(serde_json::json!({ "endpoints": endpoints })),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListQuery {
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

fn parse_type_filter(raw: Option<&str>) -> Result<Vec<EventType>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Vec::new()),
        Some(list) => list
            .split(',')
            .map(|t| t.trim().parse::<EventType>().map_err(|e| ApiError::BadRequest(e.to_string())))
            .collect(),
    }
}

async fn handle_list_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<EventListQuery>,
) -> Result<Json<BaseResponse<EventPage>>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = q.offset.unwrap_or(0);
    let filter = EventQuery {
        tenant_id: Some(tenant.id),
        types: parse_type_filter(q.event_type.as_deref())?,
        range: TimeRange {
            from: q.start_date,
            to: q.end_date,
        },
        ..Default::default()
    };
    let total = state.events.count(&filter).await?;
    let events = state
        .events
        .query(&EventQuery {
            limit: Some(limit),
            offset: Some(offset),
            ..filter
        })
        .await?;
    Ok(Json(BaseResponse::ok(EventPage {
        events,
        total,
        limit,
        offset,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

async fn handle_event_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<StatsQuery>,
) -> Result<Json<BaseResponse<EventStats>>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;
    let range = TimeRange {
        from: q.start_date,
        to: q.end_date,
    };
    let stats = state.events.stats(&tenant.id, range).await?;
    Ok(Json(BaseResponse::ok(stats)))
}

/// Manually recorded event. Abandonment types are correlator-only.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub external_customer_id: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub products: Vec<ProductSnapshot>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

async fn handle_create_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateEventRequest>,
) -> Result<Json<BaseResponse<CommerceEvent>>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;
    let event_type: EventType = req
        .event_type
        .parse()
        .map_err(|e: shop_types::UnknownEventType| ApiError::BadRequest(e.to_string()))?;
    if event_type.is_abandonment() {
        return Err(ApiError::BadRequest(format!(
            "{event_type} events are recorded by abandonment detection only"
        )));
    }
    let mut ev = NewCommerceEvent::new(tenant.id, event_type, state.clock.now());
    ev.customer_email = req.customer_email;
    ev.customer_name = req.customer_name;
    ev.external_customer_id = req.external_customer_id;
    ev.value = req.value;
    ev.products = req.products;
    ev.metadata = req.metadata;
    let stored = state.events.append(ev).await?;
    tracing::info!(tenant_id = %stored.tenant_id, event_id = %stored.id, event_type = %stored.event_type, "event created");
    Ok(Json(BaseResponse::ok(stored)))
}

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

async fn handle_audit_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<AuditListQuery>,
) -> Result<Json<BaseResponse<Vec<WebhookAuditEntry>>>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let entries = state.audit_log.list(&tenant.id, limit).await?;
    Ok(Json(BaseResponse::ok(entries)))
}

async fn handle_job_list(State(state): State<Arc<AppState>>) -> Json<BaseResponse<Vec<JobInfo>>> {
    Json(BaseResponse::ok(state.scheduler.list().await))
}

async fn handle_job_run(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<BaseResponse<JobInfo>>, ApiError> {
    let info = state.scheduler.trigger(&name).await?;
    Ok(Json(BaseResponse::ok(info)))
}

async fn handle_health() -> &'static str {
    "ok"
}
