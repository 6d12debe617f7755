//! HTTP surface over the cached read paths, the save toggle and the warmer.

mod error;
mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::articles::ArticleService;
use crate::application::origin::OriginStore;
use crate::application::saves::SaveService;
use crate::application::warmer::CacheWarmer;
use crate::cache::SharedTier;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, ErrorReport, codes};

/// Identifies the caller of a write. Authentication happens upstream.
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
/// Which tier answered a read; see [`crate::cache::ResolvedFrom::as_str`].
pub const CACHE_SOURCE_HEADER: &str = "x-cache";
pub const REPLAY_HEADER: &str = "x-idempotent-replay";

#[derive(Clone)]
pub struct HttpState {
    pub articles: ArticleService,
    pub saves: SaveService,
    pub warmer: Arc<CacheWarmer>,
    pub origin: Arc<dyn OriginStore>,
    pub tier: SharedTier,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/articles/{id}", get(handlers::article_detail))
        .route("/articles/{id}/related", get(handlers::related_articles))
        .route("/articles/{id}/save", post(handlers::save_article))
        .route("/categories", get(handlers::category_tree))
        .route(
            "/categories/{slug}/articles",
            get(handlers::category_listing),
        )
        .route("/admin/cache/warm", post(handlers::warm_cache))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
