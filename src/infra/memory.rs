//! In-process origin store.
//!
//! Backs single-node demos when no database is configured and gives tests a
//! store whose availability, latency and per-article failures can be scripted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use time::macros::datetime;

use crate::application::origin::{ListingQuery, OriginError, OriginStore, SaveTransition};
use crate::cache::{rw_read, rw_write};
use crate::domain::entities::{
    Article, ArticlePage, ArticleSummary, CategoryNode, CategoryRecord, ListingSort, WarmTarget,
    build_category_tree,
};

const SOURCE: &str = "infra::memory";

#[derive(Default)]
pub struct MemoryOrigin {
    articles: RwLock<BTreeMap<String, Article>>,
    categories: RwLock<Vec<CategoryRecord>>,
    saves: RwLock<HashSet<(String, String)>>,
    views: RwLock<HashMap<String, i64>>,
    unavailable: AtomicBool,
    failing: RwLock<HashSet<String>>,
    read_latency_ms: AtomicU64,
    write_latency_ms: AtomicU64,
    ack_latency_ms: AtomicU64,
    calls: DashMap<&'static str, u64>,
}

impl MemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small newsroom: nested categories and a dozen articles with view counts.
    pub fn seeded() -> Self {
        let origin = Self::new();
        for (slug, name, parent, position) in [
            ("news", "News", None, 0),
            ("politics", "Politics", Some("news"), 0),
            ("world", "World", Some("news"), 1),
            ("sports", "Sports", None, 1),
            ("football", "Football", Some("sports"), 0),
            ("tennis", "Tennis", Some("sports"), 1),
            ("culture", "Culture", None, 2),
        ] {
            origin.insert_category(slug, name, parent, position);
        }

        let published = datetime!(2024-05-01 06:00:00 UTC);
        let seeds = [
            ("art-1", "politics", "Budget vote passes", 940),
            ("art-2", "politics", "Coalition talks resume", 410),
            ("art-3", "world", "Summit ends without deal", 720),
            ("art-4", "world", "Flood relief expands", 150),
            ("art-5", "football", "Late winner seals title", 1_200),
            ("art-6", "football", "Transfer window opens", 530),
            ("art-7", "tennis", "Qualifier stuns top seed", 610),
            ("art-8", "tennis", "Clay season preview", 90),
            ("art-9", "culture", "Festival lineup announced", 300),
            ("art-10", "culture", "Museum reopens east wing", 120),
            ("art-11", "sports", "Marathon route changes", 260),
            ("art-12", "news", "Morning briefing", 880),
        ];
        for (index, (id, category, title, views)) in seeds.into_iter().enumerate() {
            let slug = title.to_ascii_lowercase().replace(' ', "-");
            origin.insert_article(Article {
                id: id.to_string(),
                slug,
                title: title.to_string(),
                summary: format!("{title}."),
                body: format!("{title}. Full story to follow."),
                category: category.to_string(),
                published_at: published + time::Duration::hours(index as i64),
                view_count: views,
                save_count: 0,
            });
            origin.record_views(id, views);
        }
        origin
    }

    pub fn insert_category(&self, slug: &str, name: &str, parent: Option<&str>, position: i32) {
        let mut categories = rw_write(&self.categories, SOURCE, "insert_category");
        categories.retain(|existing| existing.slug != slug);
        categories.push(CategoryRecord {
            slug: slug.to_string(),
            name: name.to_string(),
            parent_slug: parent.map(str::to_string),
            position,
            article_count: 0,
        });
    }

    pub fn insert_article(&self, article: Article) {
        rw_write(&self.articles, SOURCE, "insert_article").insert(article.id.clone(), article);
    }

    pub fn record_views(&self, article_id: &str, views: i64) {
        *rw_write(&self.views, SOURCE, "record_views")
            .entry(article_id.to_string())
            .or_default() += views;
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make reads of one article (detail and related items) fail.
    pub fn fail_article(&self, article_id: &str) {
        rw_write(&self.failing, SOURCE, "fail_article").insert(article_id.to_string());
    }

    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(duration_ms(latency), Ordering::SeqCst);
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(duration_ms(latency), Ordering::SeqCst);
    }

    /// Delay the reply after a write has committed, as a slow or lost
    /// acknowledgement would.
    pub fn set_ack_latency(&self, latency: Duration) {
        self.ack_latency_ms
            .store(duration_ms(latency), Ordering::SeqCst);
    }

    /// How many times `op` reached this store.
    pub fn calls(&self, op: &str) -> u64 {
        self.calls.get(op).map(|count| *count).unwrap_or(0)
    }

    pub fn is_saved(&self, actor_id: &str, article_id: &str) -> bool {
        rw_read(&self.saves, SOURCE, "is_saved")
            .contains(&(actor_id.to_string(), article_id.to_string()))
    }

    async fn enter(&self, op: &'static str, write: bool) -> Result<(), OriginError> {
        *self.calls.entry(op).or_default() += 1;

        let latency = if write {
            &self.write_latency_ms
        } else {
            &self.read_latency_ms
        };
        let latency = latency.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OriginError::unavailable("origin store unreachable"));
        }
        Ok(())
    }

    fn check_failing(&self, article_id: &str) -> Result<(), OriginError> {
        if rw_read(&self.failing, SOURCE, "check_failing").contains(article_id) {
            return Err(OriginError::unavailable(format!(
                "injected failure for `{article_id}`"
            )));
        }
        Ok(())
    }

    fn find(&self, article_id: &str) -> Result<Article, OriginError> {
        rw_read(&self.articles, SOURCE, "find")
            .get(article_id)
            .cloned()
            .ok_or_else(|| OriginError::not_found("article", article_id))
    }
}

fn duration_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

fn newest_first(a: &Article, b: &Article) -> std::cmp::Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl OriginStore for MemoryOrigin {
    async fn article(&self, id: &str) -> Result<Article, OriginError> {
        self.enter("article", false).await?;
        self.check_failing(id)?;
        self.find(id)
    }

    async fn list_articles(&self, query: &ListingQuery) -> Result<ArticlePage, OriginError> {
        self.enter("list_articles", false).await?;
        let known = rw_read(&self.categories, SOURCE, "list_articles")
            .iter()
            .any(|category| category.slug == query.category);
        if !known {
            return Err(OriginError::not_found("category", query.category.clone()));
        }

        let mut matching: Vec<Article> = rw_read(&self.articles, SOURCE, "list_articles")
            .values()
            .filter(|article| article.category == query.category)
            .cloned()
            .collect();
        match query.sort {
            ListingSort::Latest => matching.sort_by(newest_first),
            ListingSort::MostViewed => matching.sort_by(|a, b| {
                b.view_count
                    .cmp(&a.view_count)
                    .then_with(|| newest_first(a, b))
            }),
        }

        let page_size = query.page_size.max(1) as usize;
        let offset = (query.page.saturating_sub(1) as usize).saturating_mul(page_size);
        let items: Vec<ArticleSummary> = matching
            .iter()
            .skip(offset)
            .take(page_size)
            .map(Article::summary_view)
            .collect();

        Ok(ArticlePage {
            category: query.category.clone(),
            page: query.page,
            page_size: query.page_size,
            sort: query.sort,
            has_more: matching.len() > offset + items.len(),
            items,
        })
    }

    async fn category_tree(&self) -> Result<Vec<CategoryNode>, OriginError> {
        self.enter("category_tree", false).await?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for article in rw_read(&self.articles, SOURCE, "category_tree").values() {
            *counts.entry(article.category.clone()).or_default() += 1;
        }

        let records = rw_read(&self.categories, SOURCE, "category_tree")
            .iter()
            .cloned()
            .map(|mut record| {
                record.article_count = counts.get(&record.slug).copied().unwrap_or(0);
                record
            })
            .collect();
        Ok(build_category_tree(records))
    }

    async fn related_articles(
        &self,
        id: &str,
        limit: u32,
    ) -> Result<Vec<ArticleSummary>, OriginError> {
        self.enter("related_articles", false).await?;
        self.check_failing(id)?;
        let article = self.find(id)?;

        let mut related: Vec<Article> = rw_read(&self.articles, SOURCE, "related_articles")
            .values()
            .filter(|other| other.category == article.category && other.id != article.id)
            .cloned()
            .collect();
        related.sort_by(newest_first);
        Ok(related
            .iter()
            .take(limit as usize)
            .map(Article::summary_view)
            .collect())
    }

    /// Ranks by recorded views; the window is not tracked in memory.
    async fn top_viewed(
        &self,
        _window_hours: u32,
        limit: u32,
    ) -> Result<Vec<WarmTarget>, OriginError> {
        self.enter("top_viewed", false).await?;
        let mut ranked: Vec<(String, i64)> = rw_read(&self.views, SOURCE, "top_viewed")
            .iter()
            .map(|(id, views)| (id.clone(), *views))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(ranked
            .into_iter()
            .take(limit as usize)
            .map(|(resource_id, score)| WarmTarget {
                resource_id,
                score,
                last_warmed_at: None,
            })
            .collect())
    }

    async fn saved_state(&self, actor_id: &str, article_id: &str) -> Result<bool, OriginError> {
        self.enter("saved_state", false).await?;
        self.find(article_id)?;
        Ok(self.is_saved(actor_id, article_id))
    }

    async fn apply_saved_state(
        &self,
        actor_id: &str,
        article_id: &str,
        saved: bool,
    ) -> Result<SaveTransition, OriginError> {
        self.enter("apply_saved_state", true).await?;

        let transition = {
            // Articles before saves, held together for the whole change.
            let mut articles = rw_write(&self.articles, SOURCE, "apply_saved_state");
            let article = articles
                .get_mut(article_id)
                .ok_or_else(|| OriginError::not_found("article", article_id))?;
            let mut saves = rw_write(&self.saves, SOURCE, "apply_saved_state");

            let key = (actor_id.to_string(), article_id.to_string());
            let changed = if saved {
                saves.insert(key)
            } else {
                saves.remove(&key)
            };
            if changed {
                let delta = if saved { 1 } else { -1 };
                article.save_count = article.save_count.saturating_add(delta).max(0);
            }
            SaveTransition {
                changed,
                save_count: article.save_count,
            }
        };

        let ack = self.ack_latency_ms.load(Ordering::SeqCst);
        if ack > 0 {
            tokio::time::sleep(Duration::from_millis(ack)).await;
        }
        Ok(transition)
    }

    async fn ping(&self) -> Result<(), OriginError> {
        self.enter("ping", false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(category: &str, page: u32, sort: ListingSort) -> ListingQuery {
        ListingQuery {
            category: category.to_string(),
            page,
            page_size: 1,
            sort,
        }
    }

    #[tokio::test]
    async fn listing_pages_and_sorts() {
        let origin = MemoryOrigin::seeded();
        let latest = origin
            .list_articles(&query("football", 1, ListingSort::Latest))
            .await
            .expect("latest");
        assert_eq!(latest.items[0].id, "art-6");
        assert!(latest.has_more);

        let viewed = origin
            .list_articles(&query("football", 1, ListingSort::MostViewed))
            .await
            .expect("most viewed");
        assert_eq!(viewed.items[0].id, "art-5");

        let last = origin
            .list_articles(&query("football", 2, ListingSort::Latest))
            .await
            .expect("page 2");
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn unknown_category_is_not_found() {
        let origin = MemoryOrigin::seeded();
        let err = origin
            .list_articles(&query("weather", 1, ListingSort::Latest))
            .await
            .expect_err("unknown");
        assert!(err.is_definitive());
    }

    #[tokio::test]
    async fn saved_flag_and_counter_move_together() {
        let origin = MemoryOrigin::seeded();

        let unchanged = origin
            .apply_saved_state("u-1", "art-1", false)
            .await
            .expect("unsave while unsaved");
        assert_eq!(
            unchanged,
            SaveTransition {
                changed: false,
                save_count: 0
            }
        );

        let saved = origin
            .apply_saved_state("u-1", "art-1", true)
            .await
            .expect("save");
        assert_eq!(saved.save_count, 1);
        assert!(saved.changed);

        let repeated = origin
            .apply_saved_state("u-1", "art-1", true)
            .await
            .expect("save again");
        assert!(!repeated.changed);
        assert_eq!(repeated.save_count, 1);
        assert!(origin.is_saved("u-1", "art-1"));
    }

    #[tokio::test]
    async fn unknown_article_changes_nothing() {
        let origin = MemoryOrigin::seeded();
        let err = origin
            .apply_saved_state("u-1", "art-missing", true)
            .await
            .expect_err("missing");
        assert!(err.is_definitive());
        assert!(!origin.is_saved("u-1", "art-missing"));
    }

    #[tokio::test]
    async fn injected_failures_hit_only_their_article() {
        let origin = MemoryOrigin::seeded();
        origin.fail_article("art-3");
        assert!(origin.article("art-3").await.is_err());
        assert!(origin.article("art-4").await.is_ok());
        assert_eq!(origin.calls("article"), 2);
    }

    #[tokio::test]
    async fn category_tree_counts_articles() {
        let origin = MemoryOrigin::seeded();
        let tree = origin.category_tree().await.expect("tree");
        let sports = tree.iter().find(|node| node.slug == "sports").expect("sports");
        assert_eq!(sports.article_count, 1);
        assert_eq!(sports.children.len(), 2);
    }
}
