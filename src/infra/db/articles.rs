use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::origin::{ListingQuery, OriginError, OriginStore, SaveTransition},
    domain::entities::{
        Article, ArticlePage, ArticleSummary, CategoryNode, CategoryRecord, ListingSort,
        WarmTarget, build_category_tree,
    },
};

use super::{PostgresOrigin, map_sqlx_error};

const ARTICLE_COLUMNS: &str = "a.id, a.slug, a.title, a.summary, a.body, \
    a.category_slug AS category, a.published_at, a.view_count, a.save_count";

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: String,
    slug: String,
    title: String,
    summary: String,
    body: String,
    category: String,
    published_at: OffsetDateTime,
    view_count: i64,
    save_count: i64,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            title: row.title,
            summary: row.summary,
            body: row.body,
            category: row.category,
            published_at: row.published_at,
            view_count: row.view_count,
            save_count: row.save_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    slug: String,
    name: String,
    parent_slug: Option<String>,
    position: i32,
    article_count: i64,
}

impl From<CategoryRow> for CategoryRecord {
    fn from(row: CategoryRow) -> Self {
        Self {
            slug: row.slug,
            name: row.name,
            parent_slug: row.parent_slug,
            position: row.position,
            article_count: row.article_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ViewRankRow {
    article_id: String,
    score: i64,
}

impl PostgresOrigin {
    fn map_err(&self, err: sqlx::Error) -> OriginError {
        map_sqlx_error(err, self.statement_timeout)
    }

    async fn category_of(&self, article_id: &str) -> Result<String, OriginError> {
        sqlx::query_scalar::<_, String>("SELECT category_slug FROM articles WHERE id = $1")
            .bind(article_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|err| self.map_err(err))?
            .ok_or_else(|| OriginError::not_found("article", article_id))
    }
}

fn to_i64(value: u32) -> i64 {
    i64::from(value)
}

#[async_trait]
impl OriginStore for PostgresOrigin {
    async fn article(&self, id: &str) -> Result<Article, OriginError> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = $1");
        sqlx::query_as::<_, ArticleRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|err| self.map_err(err))?
            .map(Article::from)
            .ok_or_else(|| OriginError::not_found("article", id))
    }

    async fn list_articles(&self, query: &ListingQuery) -> Result<ArticlePage, OriginError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE slug = $1)")
                .bind(&query.category)
                .fetch_one(self.pool())
                .await
                .map_err(|err| self.map_err(err))?;
        if !exists {
            return Err(OriginError::not_found("category", query.category.clone()));
        }

        let order = match query.sort {
            ListingSort::Latest => "a.published_at DESC, a.id",
            ListingSort::MostViewed => "a.view_count DESC, a.published_at DESC, a.id",
        };
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a \
             WHERE a.category_slug = $1 \
             ORDER BY {order} \
             LIMIT $2 OFFSET $3"
        );
        let page_size = to_i64(query.page_size.max(1));
        let offset = to_i64(query.page.saturating_sub(1)) * page_size;

        let mut rows = sqlx::query_as::<_, ArticleRow>(&sql)
            .bind(&query.category)
            .bind(page_size + 1)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(|err| self.map_err(err))?;

        let has_more = rows.len() as i64 > page_size;
        rows.truncate(page_size as usize);

        Ok(ArticlePage {
            category: query.category.clone(),
            page: query.page,
            page_size: query.page_size,
            sort: query.sort,
            items: rows
                .into_iter()
                .map(|row| Article::from(row).summary_view())
                .collect(),
            has_more,
        })
    }

    async fn category_tree(&self) -> Result<Vec<CategoryNode>, OriginError> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT c.slug, c.name, c.parent_slug, c.position, COUNT(a.id) AS article_count
            FROM categories c
            LEFT JOIN articles a ON a.category_slug = c.slug
            GROUP BY c.slug, c.name, c.parent_slug, c.position
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(|err| self.map_err(err))?;

        Ok(build_category_tree(
            rows.into_iter().map(CategoryRecord::from).collect(),
        ))
    }

    async fn related_articles(
        &self,
        id: &str,
        limit: u32,
    ) -> Result<Vec<ArticleSummary>, OriginError> {
        let category = self.category_of(id).await?;
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a \
             WHERE a.category_slug = $1 AND a.id <> $2 \
             ORDER BY a.published_at DESC, a.id \
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, ArticleRow>(&sql)
            .bind(&category)
            .bind(id)
            .bind(to_i64(limit))
            .fetch_all(self.pool())
            .await
            .map_err(|err| self.map_err(err))?;

        Ok(rows
            .into_iter()
            .map(|row| Article::from(row).summary_view())
            .collect())
    }

    async fn top_viewed(
        &self,
        window_hours: u32,
        limit: u32,
    ) -> Result<Vec<WarmTarget>, OriginError> {
        let hours = i32::try_from(window_hours)
            .map_err(|_| OriginError::Invalid(format!("window of {window_hours}h is too large")))?;
        let rows = sqlx::query_as::<_, ViewRankRow>(
            r#"
            SELECT v.article_id, COUNT(*) AS score
            FROM article_views v
            WHERE v.viewed_at > now() - make_interval(hours => $1)
            GROUP BY v.article_id
            ORDER BY score DESC, v.article_id
            LIMIT $2
            "#,
        )
        .bind(hours)
        .bind(to_i64(limit))
        .fetch_all(self.pool())
        .await
        .map_err(|err| self.map_err(err))?;

        Ok(rows
            .into_iter()
            .map(|row| WarmTarget {
                resource_id: row.article_id,
                score: row.score,
                last_warmed_at: None,
            })
            .collect())
    }

    async fn saved_state(&self, actor_id: &str, article_id: &str) -> Result<bool, OriginError> {
        self.category_of(article_id).await?;
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM saved_articles WHERE actor_id = $1 AND article_id = $2)",
        )
        .bind(actor_id)
        .bind(article_id)
        .fetch_one(self.pool())
        .await
        .map_err(|err| self.map_err(err))
    }

    async fn apply_saved_state(
        &self,
        actor_id: &str,
        article_id: &str,
        saved: bool,
    ) -> Result<SaveTransition, OriginError> {
        let mut tx = self.pool().begin().await.map_err(|err| self.map_err(err))?;

        // Row lock serialises concurrent saves of one article.
        let current = sqlx::query_scalar::<_, i64>(
            "SELECT save_count FROM articles WHERE id = $1 FOR UPDATE",
        )
        .bind(article_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| self.map_err(err))?
        .ok_or_else(|| OriginError::not_found("article", article_id))?;

        let sql = if saved {
            "INSERT INTO saved_articles (actor_id, article_id) VALUES ($1, $2) \
             ON CONFLICT (actor_id, article_id) DO NOTHING"
        } else {
            "DELETE FROM saved_articles WHERE actor_id = $1 AND article_id = $2"
        };
        let changed = sqlx::query(sql)
            .bind(actor_id)
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| self.map_err(err))?
            .rows_affected()
            > 0;

        let save_count = if changed {
            let delta: i64 = if saved { 1 } else { -1 };
            sqlx::query_scalar::<_, i64>(
                "UPDATE articles SET save_count = GREATEST(save_count + $2, 0) \
                 WHERE id = $1 RETURNING save_count",
            )
            .bind(article_id)
            .bind(delta)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| self.map_err(err))?
        } else {
            current
        };

        tx.commit().await.map_err(|err| self.map_err(err))?;

        Ok(SaveTransition {
            changed,
            save_count,
        })
    }

    async fn ping(&self) -> Result<(), OriginError> {
        self.health_check().await.map_err(|err| self.map_err(err))
    }
}
