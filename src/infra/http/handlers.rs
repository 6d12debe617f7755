use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::application::saves::SaveAction;
use crate::application::warmer::WarmSelection;
use crate::cache::{Resolved, WriteOutcome};
use crate::domain::entities::ListingSort;
use crate::domain::error::DomainError;

use super::error::{ApiError, codes};
use super::{ACTOR_HEADER, CACHE_SOURCE_HEADER, HttpState, IDEMPOTENCY_HEADER, REPLAY_HEADER};

fn resolved_response<T: Serialize>(resolved: Resolved<T>) -> Response {
    let mut response = Json(resolved.value).into_response();
    response.headers_mut().insert(
        CACHE_SOURCE_HEADER,
        HeaderValue::from_static(resolved.source.as_str()),
    );
    response
}

/// Empty bodies deserialize to the default request.
fn parse_optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request("Malformed JSON body", Some(err.to_string())))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// A key that cannot be read would silently disable deduplication, so it is
/// rejected rather than ignored.
fn idempotency_key(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    value.to_str().map(Some).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Idempotency key must be visible ASCII",
            Some(format!("Check the `{IDEMPOTENCY_HEADER}` header")),
        )
    })
}

pub(super) async fn article_detail(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let resolved = state.articles.article(&id).await?;
    Ok(resolved_response(resolved))
}

pub(super) async fn related_articles(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let resolved = state.articles.related(&id).await?;
    Ok(resolved_response(resolved))
}

pub(super) async fn category_tree(State(state): State<HttpState>) -> Result<Response, ApiError> {
    let resolved = state.articles.category_tree().await?;
    Ok(resolved_response(resolved))
}

#[derive(Debug, Deserialize)]
pub(super) struct ListingParams {
    page: Option<u32>,
    sort: Option<ListingSort>,
}

pub(super) async fn category_listing(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
    Query(params): Query<ListingParams>,
) -> Result<Response, ApiError> {
    let resolved = state
        .articles
        .category_listing(
            &slug,
            params.page.unwrap_or(1),
            params.sort.unwrap_or_default(),
        )
        .await?;
    Ok(resolved_response(resolved))
}

#[derive(Debug, Default, Deserialize)]
struct SaveRequest {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    saved: Option<bool>,
}

impl SaveRequest {
    fn action(&self) -> Result<SaveAction, ApiError> {
        match (&self.action, self.saved) {
            (Some(action), _) => action.parse().map_err(|err: DomainError| {
                ApiError::bad_request("Unknown save action", Some(err.to_string()))
            }),
            (None, Some(saved)) => Ok(SaveAction::from_flag(saved)),
            (None, None) => Ok(SaveAction::Toggle),
        }
    }
}

pub(super) async fn save_article(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let actor_id = header_str(&headers, ACTOR_HEADER)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Actor identity required"))?;
    let request: SaveRequest = parse_optional_json(&body)?;
    let action = request.action()?;
    let request_id = idempotency_key(&headers)?;

    let outcome = state
        .saves
        .apply(actor_id, &id, action, request_id)
        .await?;

    let response = match outcome {
        WriteOutcome::Applied(body) => Json(body).into_response(),
        WriteOutcome::Replayed(body) => {
            let mut response = Json(body).into_response();
            response
                .headers_mut()
                .insert(REPLAY_HEADER, HeaderValue::from_static("true"));
            response
        }
        WriteOutcome::InFlight => {
            let mut response =
                (StatusCode::ACCEPTED, Json(json!({ "status": "processing" }))).into_response();
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, HeaderValue::from_static("1"));
            response
        }
    };
    Ok(response)
}

#[derive(Debug, Default, Deserialize)]
struct WarmRequest {
    #[serde(default)]
    resource_ids: Option<Vec<String>>,
    #[serde(default)]
    limit: Option<u32>,
}

pub(super) async fn warm_cache(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: WarmRequest = parse_optional_json(&body)?;
    let selection = match request.resource_ids {
        Some(ids) if !ids.is_empty() => WarmSelection::Explicit(ids),
        _ => WarmSelection::Top {
            limit: request.limit,
        },
    };
    let summary = state.warmer.warm(selection).await;
    Ok(Json(summary).into_response())
}

pub(super) async fn health(State(state): State<HttpState>) -> Response {
    let origin_ok = state.origin.ping().await.is_ok();
    let tier_ok = state.tier.ping().await.is_ok();

    let status = match (origin_ok, tier_ok) {
        (true, true) => "ok",
        (true, false) => "degraded",
        (false, _) => "unavailable",
    };
    let code = if origin_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": status,
        "origin": if origin_ok { "ok" } else { "unavailable" },
        "distributed": {
            "backend": state.tier.backend_name(),
            "status": if tier_ok { "ok" } else { "unavailable" },
        },
    });
    (code, Json(body)).into_response()
}
