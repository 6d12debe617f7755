//! Cached read paths for article content.

use std::sync::Arc;

use crate::cache::{CacheError, CacheManager, Resolved, listing_params, namespaces};
use crate::domain::entities::{Article, ArticlePage, ArticleSummary, CategoryNode, ListingSort};
use crate::domain::error::require_identifier;

use super::origin::{ListingQuery, OriginStore};

const CATEGORY_TREE_PARAMS: &str = "all";
const MAX_PAGE: u32 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct ArticleServiceConfig {
    pub page_size: u32,
    pub related_limit: u32,
}

impl Default for ArticleServiceConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            related_limit: 6,
        }
    }
}

impl From<&crate::config::ArticlesSettings> for ArticleServiceConfig {
    fn from(settings: &crate::config::ArticlesSettings) -> Self {
        Self {
            page_size: settings.page_size.get(),
            related_limit: settings.related_limit.get(),
        }
    }
}

#[derive(Clone)]
pub struct ArticleService {
    cache: CacheManager,
    origin: Arc<dyn OriginStore>,
    config: ArticleServiceConfig,
}

impl ArticleService {
    pub fn new(
        cache: CacheManager,
        origin: Arc<dyn OriginStore>,
        config: ArticleServiceConfig,
    ) -> Self {
        Self {
            cache,
            origin,
            config,
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub async fn article(&self, id: &str) -> Result<Resolved<Article>, CacheError> {
        require_identifier("article_id", id)?;
        let origin = self.origin.clone();
        let id_owned = id.to_string();
        self.cache
            .get(namespaces::ARTICLE, id, move || async move {
                origin.article(&id_owned).await
            })
            .await
    }

    pub async fn category_listing(
        &self,
        category: &str,
        page: u32,
        sort: ListingSort,
    ) -> Result<Resolved<ArticlePage>, CacheError> {
        require_identifier("category", category)?;
        if page == 0 || page > MAX_PAGE {
            return Err(CacheError::validation(format!(
                "page must be between 1 and {MAX_PAGE}"
            )));
        }

        let origin = self.origin.clone();
        let query = ListingQuery {
            category: category.to_string(),
            page,
            page_size: self.config.page_size,
            sort,
        };
        self.cache
            .get(
                namespaces::ARTICLE_LIST,
                &listing_params(category, page, sort),
                move || async move { origin.list_articles(&query).await },
            )
            .await
    }

    pub async fn category_tree(&self) -> Result<Resolved<Vec<CategoryNode>>, CacheError> {
        let origin = self.origin.clone();
        self.cache
            .get(
                namespaces::CATEGORY_TREE,
                CATEGORY_TREE_PARAMS,
                move || async move { origin.category_tree().await },
            )
            .await
    }

    pub async fn related(&self, id: &str) -> Result<Resolved<Vec<ArticleSummary>>, CacheError> {
        require_identifier("article_id", id)?;
        let origin = self.origin.clone();
        let id_owned = id.to_string();
        let limit = self.config.related_limit;
        self.cache
            .get(namespaces::RELATED, id, move || async move {
                origin.related_articles(&id_owned, limit).await
            })
            .await
    }

    /// Drop the cached detail view of an article after a write changed it.
    pub async fn invalidate_article(&self, id: &str) {
        self.cache.invalidate(namespaces::ARTICLE, id).await;
    }
}
