//! Origin store boundary.
//!
//! The system of record is external; the cache layer only needs these calls.
//! Every call is fallible and is time-boxed by its caller.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{
    Article, ArticlePage, ArticleSummary, CategoryNode, ListingSort, WarmTarget,
};

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin store unavailable: {0}")]
    Unavailable(String),
    #[error("origin call timed out after {0:?}")]
    Timeout(Duration),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("origin rejected input: {0}")]
    Invalid(String),
}

impl OriginError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True when the origin gave a definite answer rather than failing to answer.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Invalid(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    pub category: String,
    pub page: u32,
    pub page_size: u32,
    pub sort: ListingSort,
}

/// Result of [`OriginStore::apply_saved_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveTransition {
    pub changed: bool,
    pub save_count: i64,
}

#[async_trait]
pub trait OriginStore: Send + Sync {
    async fn article(&self, id: &str) -> Result<Article, OriginError>;

    async fn list_articles(&self, query: &ListingQuery) -> Result<ArticlePage, OriginError>;

    async fn category_tree(&self) -> Result<Vec<CategoryNode>, OriginError>;

    async fn related_articles(
        &self,
        id: &str,
        limit: u32,
    ) -> Result<Vec<ArticleSummary>, OriginError>;

    /// Most viewed articles within the trailing window, highest score first.
    async fn top_viewed(
        &self,
        window_hours: u32,
        limit: u32,
    ) -> Result<Vec<WarmTarget>, OriginError>;

    async fn saved_state(&self, actor_id: &str, article_id: &str) -> Result<bool, OriginError>;

    /// Move the actor's saved flag to `saved` and the article's save counter with
    /// it in one atomic step. The counter only moves when the flag changed and
    /// never drops below zero. Either both changes land or neither does.
    async fn apply_saved_state(
        &self,
        actor_id: &str,
        article_id: &str,
        saved: bool,
    ) -> Result<SaveTransition, OriginError>;

    async fn ping(&self) -> Result<(), OriginError>;
}
