use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use newsdesk::application::articles::{ArticleService, ArticleServiceConfig};
use newsdesk::application::saves::SaveService;
use newsdesk::application::warmer::{CacheWarmer, WarmerConfig};
use newsdesk::cache::{
    CacheConfig, CacheManager, IdempotencyConfig, IdempotentWriteCoordinator, MemoryTier,
    SharedClock, SystemClock,
};
use newsdesk::infra::http::{HttpState, build_router};
use newsdesk::infra::memory::MemoryOrigin;
use serde_json::{Value, json};
use tower::ServiceExt;

struct Harness {
    router: Router,
    origin: Arc<MemoryOrigin>,
    tier: Arc<MemoryTier>,
}

fn harness() -> Harness {
    let clock: SharedClock = Arc::new(SystemClock);
    let origin = Arc::new(MemoryOrigin::seeded());
    let tier = Arc::new(MemoryTier::new(clock.clone()));
    let manager =
        CacheManager::new(&CacheConfig::default(), tier.clone(), clock.clone()).expect("manager");
    let coordinator = IdempotentWriteCoordinator::new(
        manager.tier().clone(),
        IdempotencyConfig::default(),
        clock.clone(),
    );
    let articles = ArticleService::new(
        manager.clone(),
        origin.clone(),
        ArticleServiceConfig::default(),
    );
    let saves = SaveService::new(origin.clone(), coordinator, articles.clone());
    let warmer = Arc::new(CacheWarmer::new(
        articles.clone(),
        origin.clone(),
        WarmerConfig::default(),
        clock,
    ));

    let router = build_router(HttpState {
        articles,
        saves,
        warmer,
        origin: origin.clone(),
        tier: manager.tier().clone(),
    });
    Harness {
        router,
        origin,
        tier,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn get(router: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(router, request).await
}

fn save_request(
    article: &str,
    actor: Option<&str>,
    key: Option<&str>,
    body: Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("/articles/{article}/save"))
        .header("content-type", "application/json");
    if let Some(actor) = actor {
        builder = builder.header("x-actor-id", actor);
    }
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

async fn json_body(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn cache_header(response: &Response) -> &str {
    response
        .headers()
        .get("x-cache")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn article_detail_reports_the_answering_tier() {
    let h = harness();

    let first = get(&h.router, "/articles/art-1").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_header(&first), "fresh-origin");
    let body = json_body(first).await;
    assert_eq!(body["id"], "art-1");

    let second = get(&h.router, "/articles/art-1").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(cache_header(&second), "local");
    assert_eq!(h.origin.calls("article"), 1);
}

#[tokio::test]
async fn unknown_article_is_not_found() {
    let h = harness();

    let response = get(&h.router, "/articles/art-404").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn category_listing_validates_the_page() {
    let h = harness();

    let ok = get(&h.router, "/categories/football/articles?page=1&sort=most_viewed").await;
    assert_eq!(ok.status(), StatusCode::OK);
    let body = json_body(ok).await;
    assert_eq!(body["items"][0]["id"], "art-5");

    let invalid = get(&h.router, "/categories/football/articles?page=0").await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    let body = json_body(invalid).await;
    assert_eq!(body["error"]["code"], "invalid_input");

    let unknown = get(&h.router, "/categories/weather/articles").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn category_tree_and_related_are_served() {
    let h = harness();

    let tree = get(&h.router, "/categories").await;
    assert_eq!(tree.status(), StatusCode::OK);
    let body = json_body(tree).await;
    assert!(body.as_array().is_some_and(|nodes| !nodes.is_empty()));

    let related = get(&h.router, "/articles/art-5/related").await;
    assert_eq!(related.status(), StatusCode::OK);
    let body = json_body(related).await;
    assert_eq!(body[0]["id"], "art-6");
}

#[tokio::test]
async fn origin_outage_without_cache_is_unavailable() {
    let h = harness();
    h.origin.set_available(false);

    let response = get(&h.router, "/articles/art-2").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "origin_unavailable");
}

#[tokio::test]
async fn save_is_idempotent_per_key() {
    let h = harness();

    let first = send(
        &h.router,
        save_request("art-1", Some("u-9"), Some("r-1"), json!({"action": "save"})),
    )
    .await;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-idempotent-replay").is_none());
    let first_body = json_body(first).await;
    assert_eq!(first_body["saved"], true);
    assert_eq!(first_body["save_count"], 1);

    let replay = send(
        &h.router,
        save_request("art-1", Some("u-9"), Some("r-1"), json!({"action": "save"})),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(
        replay
            .headers()
            .get("x-idempotent-replay")
            .and_then(|value| value.to_str().ok()),
        Some("true")
    );
    assert_eq!(json_body(replay).await, first_body);
    assert_eq!(h.origin.calls("apply_saved_state"), 1);
}

#[tokio::test]
async fn save_accepts_a_flag_body() {
    let h = harness();

    let response = send(
        &h.router,
        save_request("art-2", Some("u-1"), None, json!({"saved": true})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.origin.is_saved("u-1", "art-2"));
}

#[tokio::test]
async fn save_requires_an_actor_and_a_known_action() {
    let h = harness();

    let anonymous = send(&h.router, save_request("art-1", None, None, json!({}))).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let unknown = send(
        &h.router,
        save_request("art-1", Some("u-9"), None, json!({"action": "like"})),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let missing = send(
        &h.router,
        save_request("art-404", Some("u-9"), Some("r-9"), json!({})),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreadable_idempotency_key_is_rejected_before_the_write() {
    let h = harness();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/articles/art-1/save")
        .header("x-actor-id", "u-9")
        .header(
            "idempotency-key",
            HeaderValue::from_bytes(b"r-\xff\xfe").expect("opaque header bytes"),
        )
        .body(Body::from(json!({"action": "save"}).to_string()))
        .expect("request should build");
    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_input");
    assert_eq!(h.origin.calls("apply_saved_state"), 0);
    assert!(!h.origin.is_saved("u-9", "art-1"));
}

#[tokio::test]
async fn warm_endpoint_returns_a_summary() {
    let h = harness();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/admin/cache/warm")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"resource_ids": ["art-1", "art-404"]}).to_string(),
        ))
        .expect("request should build");
    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["warmed"], 1);
    assert_eq!(body["errors"][0]["resource_id"], "art-404");
    assert!(body["duration_ms"].is_u64());
    assert!(h.tier.contains("article:art-1"));
}

#[tokio::test]
async fn warm_endpoint_defaults_to_top_articles() {
    let h = harness();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/admin/cache/warm")
        .body(Body::empty())
        .expect("request should build");
    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["total"], 12);
    assert_eq!(body["warmed"], 12);
}

#[tokio::test]
async fn health_reflects_dependencies() {
    let h = harness();

    let healthy = get(&h.router, "/health").await;
    assert_eq!(healthy.status(), StatusCode::OK);
    assert_eq!(json_body(healthy).await["status"], "ok");

    h.tier.set_available(false);
    let degraded = get(&h.router, "/health").await;
    assert_eq!(degraded.status(), StatusCode::OK);
    assert_eq!(json_body(degraded).await["status"], "degraded");

    h.origin.set_available(false);
    let down = get(&h.router, "/health").await;
    assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
}
