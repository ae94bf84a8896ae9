//! Integration tests: webhooks, query API, job triggers, audit log.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use shop_api::config::JobIntervals;
use shop_api::server::{self, AppState};
use shop_store::{InMemoryAuditLog, InMemoryEventStore, InMemoryTenantDirectory};
use shop_types::{FixedClock, Tenant};
use std::sync::Arc;
use tower::util::ServiceExt;

struct TestApp {
    router: axum::Router,
    clock: Arc<FixedClock>,
}

fn test_app() -> TestApp {
    let tenants = Arc::new(InMemoryTenantDirectory::with_tenants(vec![
        Tenant {
            id: "t1".into(),
            name: "Acme".into(),
            shopify_url: "acme.myshopify.com".into(),
        },
        Tenant {
            id: "t2".into(),
            name: "Beta".into(),
            shopify_url: "https://beta.myshopify.com".into(),
        },
    ]));
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = Arc::new(AppState::new(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryAuditLog::new()),
        tenants,
        clock.clone(),
        JobIntervals::default(),
    ));
    TestApp {
        router: server::router(state),
        clock,
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    let j = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, j)
}

fn webhook(topic: &str, shop: Option<&str>, body: Value) -> Request<Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/shopify/{topic}"))
        .header("content-type", "application/json");
    if let Some(shop) = shop {
        b = b.header("x-shopify-shop-domain", shop);
    }
    b.body(Body::from(body.to_string())).unwrap()
}

fn tenant_get(uri: &str, tenant: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-tenant-id", tenant)
        .body(Body::empty())
        .unwrap()
}

fn run_job(name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/jobs/{name}/run"))
        .body(Body::empty())
        .unwrap()
}

fn cart_payload(token: &str, email: &str) -> Value {
    json!({
        "id": "cart-1",
        "token": token,
        "email": email,
        "updated_at": "2026-10-19T10:00:00Z",
        "total_price": "49.90",
        "line_items": [{"product_id": 1, "title": "Tee", "quantity": 2, "price": "24.95"}]
    })
}

#[tokio::test]
async fn health() {
    let app = test_app();
    let res = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn webhook_requires_shop_domain() {
    let app = test_app();
    let (status, j) = send(&app, webhook("carts/update", None, cart_payload("tok", "a@x.com"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["code"], 400);

    let (_, audit) = send(&app, tenant_get("/api/audit-log", "t1")).await;
    assert_eq!(audit["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn webhook_for_unknown_shop_is_not_found() {
    let app = test_app();
    let (status, j) = send(
        &app,
        webhook("orders/create", Some("nobody.myshopify.com"), json!({"id": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(j["code"], 404);
}

#[tokio::test]
async fn unsupported_topic_is_not_found() {
    let app = test_app();
    let (status, _) = send(&app, webhook("orders/paid", Some("acme.myshopify.com"), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_list_names_all_topics() {
    let app = test_app();
    let (status, j) = send(
        &app,
        Request::builder().uri("/api/webhooks/test").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let endpoints = j["data"]["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 4);
    assert!(endpoints.iter().any(|e| e["path"] == "/api/webhooks/shopify/checkouts/update"));
    for e in endpoints {
        assert!(e["path"].as_str().unwrap().starts_with("/api/webhooks/shopify/"));
    }
}

#[tokio::test]
async fn webhook_without_shopify_prefix_is_not_routed() {
    let app = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/webhooks/carts/update")
        .header("x-shopify-shop-domain", "acme.myshopify.com")
        .header("content-type", "application/json")
        .body(Body::from(cart_payload("tok", "a@x.com").to_string()))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, audit) = send(&app, tenant_get("/api/audit-log", "t1")).await;
    assert_eq!(audit["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn ingested_cart_is_listed_for_its_tenant_only() {
    let app = test_app();
    let (status, j) = send(
        &app,
        webhook("carts/update", Some("acme.myshopify.com"), cart_payload("tok", "a@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["recorded"], true);

    let (status, j) = send(&app, tenant_get("/api/customer-events", "t1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["total"], 1);
    let ev = &j["data"]["events"][0];
    assert_eq!(ev["type"], "cart_updated");
    assert_eq!(ev["customerEmail"], "a@x.com");
    assert_eq!(ev["value"], 49.9);
    assert_eq!(ev["metadata"]["cartToken"], "tok");
    assert_eq!(ev["metadata"]["cartId"], "cart-1");
    assert_eq!(ev["products"][0]["quantity"], 2);

    let (_, j) = send(&app, tenant_get("/api/customer-events", "t2")).await;
    assert_eq!(j["data"]["total"], 0);

    let (_, audit) = send(&app, tenant_get("/api/audit-log", "t1")).await;
    assert_eq!(audit["data"][0]["eventType"], "carts/update");
}

#[tokio::test]
async fn shop_domain_matches_registered_url_with_scheme() {
    let app = test_app();
    let (status, _) = send(
        &app,
        webhook(
            "checkouts/create",
            Some("BETA.myshopify.com"),
            json!({"token": "chk", "email": "b@x.com", "total_price": "10.00"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, j) = send(&app, tenant_get("/api/customer-events?type=checkout_started", "t2")).await;
    assert_eq!(j["data"]["total"], 1);
}

#[tokio::test]
async fn malformed_webhook_is_rejected_but_audited() {
    let app = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/webhooks/shopify/orders/create")
        .header("x-shopify-shop-domain", "acme.myshopify.com")
        .body(Body::from("{oops"))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, audit) = send(&app, tenant_get("/api/audit-log", "t1")).await;
    assert_eq!(audit["data"].as_array().unwrap().len(), 1);
    let (_, events) = send(&app, tenant_get("/api/customer-events", "t1")).await;
    assert_eq!(events["data"]["total"], 0);
}

#[tokio::test]
async fn empty_cart_is_acknowledged_without_event() {
    let app = test_app();
    let (status, j) = send(
        &app,
        webhook("carts/update", Some("acme.myshopify.com"), json!({"token": "tok", "line_items": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["recorded"], false);
}

#[tokio::test]
async fn query_api_requires_known_tenant() {
    let app = test_app();
    let req = Request::builder().uri("/api/customer-events").body(Body::empty()).unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, tenant_get("/api/customer-events/stats", "ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, tenant_get("/api/customer-events?type=bogus", "t1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_events_reject_abandonment_types() {
    let app = test_app();
    let create = |body: Value| {
        Request::builder()
            .method("POST")
            .uri("/api/customer-events")
            .header("x-tenant-id", "t1")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };
    let (status, _) = send(&app, create(json!({"type": "cart_abandoned"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, j) = send(
        &app,
        create(json!({"type": "order_placed", "customerEmail": "a@x.com", "value": 12.5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["type"], "order_placed");

    let (_, stats) = send(&app, tenant_get("/api/customer-events/stats", "t1")).await;
    assert_eq!(stats["data"]["byType"]["order_placed"]["count"], 1);
    assert_eq!(stats["data"]["byType"]["order_placed"]["totalValue"], 12.5);
}

#[tokio::test]
async fn cart_pass_detects_abandonment_once() {
    let app = test_app();
    send(
        &app,
        webhook("carts/update", Some("acme.myshopify.com"), cart_payload("tok", "a@x.com")),
    )
    .await;

    // inside the grace period: nothing yet
    let (status, j) = send(&app, run_job("cart_abandonment")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["status"], "done");
    assert_eq!(j["data"]["lastResult"]["detected"], 0);

    app.clock.advance(Duration::hours(2));
    let (_, j) = send(&app, run_job("cart_abandonment")).await;
    assert_eq!(j["data"]["lastResult"]["detected"], 1);
    let (_, j) = send(&app, run_job("cart_abandonment")).await;
    assert_eq!(j["data"]["lastResult"]["detected"], 0);
    assert_eq!(j["data"]["lastResult"]["alreadyRecorded"], 1);

    let (_, j) = send(&app, tenant_get("/api/customer-events?type=cart_abandoned", "t1")).await;
    assert_eq!(j["data"]["total"], 1);
    let ab = &j["data"]["events"][0];
    assert_eq!(ab["metadata"]["originalCartToken"], "tok");
    assert_eq!(ab["metadata"]["detectedBy"], "scheduled_job");
    assert_eq!(ab["customerEmail"], "a@x.com");
}

#[tokio::test]
async fn order_resolves_checkout_by_token() {
    let app = test_app();
    send(
        &app,
        webhook(
            "checkouts/create",
            Some("acme.myshopify.com"),
            json!({"token": "tok1", "email": "a@x.com", "total_price": "20.00"}),
        ),
    )
    .await;
    app.clock.advance(Duration::minutes(10));
    send(
        &app,
        webhook(
            "orders/create",
            Some("acme.myshopify.com"),
            json!({"id": 9, "checkout_token": "tok1", "email": "other@x.com", "total_price": "20.00"}),
        ),
    )
    .await;
    app.clock.advance(Duration::hours(3));

    let (_, j) = send(&app, run_job("checkout_abandonment")).await;
    assert_eq!(j["data"]["lastResult"]["resolved"], 1);
    assert_eq!(j["data"]["lastResult"]["detected"], 0);
}

#[tokio::test]
async fn jobs_are_listed_and_unknown_job_is_not_found() {
    let app = test_app();
    let (status, j) = send(&app, Request::builder().uri("/api/jobs").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = j["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|job| job["name"].as_str())
        .collect();
    assert_eq!(names, vec!["cart_abandonment", "checkout_abandonment", "webhook_log_cleanup"]);
    assert_eq!(j["data"][0]["intervalSecs"], 3600);
    assert_eq!(j["data"][0]["status"], "pending");

    let (status, _) = send(&app, run_job("nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retention_job_purges_old_audit_entries() {
    let app = test_app();
    send(
        &app,
        webhook("orders/create", Some("acme.myshopify.com"), json!({"id": 1, "email": "a@x.com"})),
    )
    .await;
    app.clock.advance(Duration::days(31));
    send(
        &app,
        webhook("orders/create", Some("acme.myshopify.com"), json!({"id": 2, "email": "a@x.com"})),
    )
    .await;

    let (_, j) = send(&app, run_job("webhook_log_cleanup")).await;
    assert_eq!(j["data"]["lastResult"]["removed"], 1);
    let (_, audit) = send(&app, tenant_get("/api/audit-log", "t1")).await;
    assert_eq!(audit["data"].as_array().unwrap().len(), 1);
    let (_, events) = send(&app, tenant_get("/api/customer-events", "t1")).await;
    assert_eq!(events["data"]["total"], 2);
}
