use std::time::Instant;

use axum::{
    body::Body,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::error::ErrorReport;
use super::{ACTOR_HEADER, CACHE_SOURCE_HEADER, IDEMPOTENCY_HEADER, REPLAY_HEADER};

const TARGET: &str = "newsdesk::http::response";

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Request fields captured before the handler takes ownership of the request.
#[derive(Debug)]
struct RequestSummary {
    method: Method,
    path: String,
    query: String,
    actor_id: String,
    idempotency_key: bool,
    request_id: String,
}

impl RequestSummary {
    fn capture(request: &Request<Body>) -> Self {
        let headers = request.headers();
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request.uri().query().unwrap_or("").to_string(),
            actor_id: headers
                .get(ACTOR_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string(),
            idempotency_key: headers.contains_key(IDEMPOTENCY_HEADER),
            request_id: request
                .extensions()
                .get::<RequestContext>()
                .map(|ctx| ctx.request_id.clone())
                .unwrap_or_default(),
        }
    }
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let summary = RequestSummary::capture(&request);
    let start = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();

    if !status.is_client_error() && !status.is_server_error() {
        let headers = response.headers();
        debug!(
            target = TARGET,
            status = status.as_u16(),
            method = %summary.method,
            path = %summary.path,
            elapsed_ms,
            cache = headers
                .get(CACHE_SOURCE_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or(""),
            replay = headers.contains_key(REPLAY_HEADER),
            request_id = %summary.request_id,
            "request served",
        );
        return response;
    }

    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .map(String::as_str)
        .unwrap_or("no diagnostic available");

    if status.is_server_error() {
        error!(
            target = TARGET,
            status = status.as_u16(),
            method = %summary.method,
            path = %summary.path,
            query = %summary.query,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            request_id = %summary.request_id,
            actor_id = %summary.actor_id,
            idempotency_key = summary.idempotency_key,
            "request failed",
        );
    } else {
        warn!(
            target = TARGET,
            status = status.as_u16(),
            method = %summary.method,
            path = %summary.path,
            query = %summary.query,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            request_id = %summary.request_id,
            actor_id = %summary.actor_id,
            idempotency_key = summary.idempotency_key,
            "client request error",
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_captures_actor_query_and_key() {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri("/categories/sports/articles?page=2&sort=most_viewed")
            .header(ACTOR_HEADER, "u-9")
            .header(IDEMPOTENCY_HEADER, "r-1")
            .body(Body::empty())
            .expect("request");
        request.extensions_mut().insert(RequestContext {
            request_id: "req-1".to_string(),
        });

        let summary = RequestSummary::capture(&request);
        assert_eq!(summary.path, "/categories/sports/articles");
        assert_eq!(summary.query, "page=2&sort=most_viewed");
        assert_eq!(summary.actor_id, "u-9");
        assert!(summary.idempotency_key);
        assert_eq!(summary.request_id, "req-1");
    }

    #[test]
    fn summary_tolerates_missing_context() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");

        let summary = RequestSummary::capture(&request);
        assert_eq!(summary.query, "");
        assert_eq!(summary.actor_id, "");
        assert!(!summary.idempotency_key);
        assert!(summary.request_id.is_empty());
    }
}
