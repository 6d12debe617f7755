//! Content records served through the read cache.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub category: String,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    pub view_count: i64,
    pub save_count: i64,
}

impl Article {
    pub fn summary_view(&self) -> ArticleSummary {
        ArticleSummary {
            id: self.id.clone(),
            slug: self.slug.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            category: self.category.clone(),
            published_at: self.published_at,
            view_count: self.view_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub category: String,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    pub view_count: i64,
}

/// One page of a category listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticlePage {
    pub category: String,
    pub page: u32,
    pub page_size: u32,
    pub sort: ListingSort,
    pub items: Vec<ArticleSummary>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSort {
    #[default]
    Latest,
    MostViewed,
}

impl ListingSort {
    pub fn as_str(self) -> &'static str {
        match self {
            ListingSort::Latest => "latest",
            ListingSort::MostViewed => "most_viewed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub slug: String,
    pub name: String,
    pub article_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategoryNode>,
}

/// Flat category row as stored by the origin; assembled into a tree by [`build_category_tree`].
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRecord {
    pub slug: String,
    pub name: String,
    pub parent_slug: Option<String>,
    pub position: i32,
    pub article_count: i64,
}

/// Assemble flat category rows into nested nodes ordered by position.
///
/// Rows whose parent is unknown are promoted to the root level rather than dropped.
pub fn build_category_tree(mut records: Vec<CategoryRecord>) -> Vec<CategoryNode> {
    records.sort_by(|a, b| a.position.cmp(&b.position).then(a.slug.cmp(&b.slug)));

    let known: HashSet<String> = records.iter().map(|record| record.slug.clone()).collect();

    fn children_of(
        parent: Option<&str>,
        records: &[CategoryRecord],
        known: &HashSet<String>,
        depth: usize,
    ) -> Vec<CategoryNode> {
        if depth > 16 {
            return Vec::new();
        }
        records
            .iter()
            .filter(|record| match (parent, record.parent_slug.as_deref()) {
                (None, None) => true,
                (None, Some(p)) => !known.contains(p),
                (Some(parent), Some(p)) => parent == p,
                (Some(_), None) => false,
            })
            .map(|record| CategoryNode {
                slug: record.slug.clone(),
                name: record.name.clone(),
                article_count: record.article_count,
                children: children_of(Some(&record.slug), records, known, depth + 1),
            })
            .collect()
    }

    children_of(None, &records, &known, 0)
}

/// A resource ranked for proactive warming. Lives only for the duration of a warm run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmTarget {
    pub resource_id: String,
    pub score: i64,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_warmed_at: Option<OffsetDateTime>,
}

impl WarmTarget {
    pub fn explicit(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            score: 0,
            last_warmed_at: None,
        }
    }
}
