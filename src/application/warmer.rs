//! Proactive cache warming.
//!
//! A run resolves each target's detail view and related items through the
//! normal read path, so fresh entries cost nothing and stale or missing ones
//! are repopulated in both tiers. One failing target never aborts the batch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::metric_names::{METRIC_WARM_FAILURES, METRIC_WARM_MS};
use crate::cache::{CacheError, ResolvedFrom, SharedClock};
use crate::domain::entities::WarmTarget;

use super::articles::ArticleService;
use super::origin::OriginStore;

const TARGET: &str = "newsdesk::application::warmer";

#[derive(Debug, Clone, Copy)]
pub struct WarmerConfig {
    /// Trailing window used to rank articles by views.
    pub window_hours: u32,
    /// Upper bound on targets per run.
    pub batch_limit: u32,
    pub concurrency: usize,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            batch_limit: 50,
            concurrency: 4,
        }
    }
}

impl From<&crate::config::WarmerSettings> for WarmerConfig {
    fn from(settings: &crate::config::WarmerSettings) -> Self {
        Self {
            window_hours: settings.window_hours.get(),
            batch_limit: settings.batch_limit.get(),
            concurrency: settings.concurrency.get(),
        }
    }
}

/// Which resources a warm run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmSelection {
    Explicit(Vec<String>),
    /// Most viewed articles, at most `limit` (capped by the batch limit).
    Top { limit: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmFailure {
    pub resource_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmSummary {
    pub total: usize,
    pub warmed: usize,
    pub errors: Vec<WarmFailure>,
    pub duration_ms: u64,
    /// Targets that were warmed, stamped with when.
    pub targets: Vec<WarmTarget>,
    /// Set when ranking the default target set failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_error: Option<String>,
}

pub struct CacheWarmer {
    articles: ArticleService,
    origin: Arc<dyn OriginStore>,
    config: WarmerConfig,
    clock: SharedClock,
}

impl CacheWarmer {
    pub fn new(
        articles: ArticleService,
        origin: Arc<dyn OriginStore>,
        config: WarmerConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            articles,
            origin,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    pub async fn warm(&self, selection: WarmSelection) -> WarmSummary {
        let started = Instant::now();
        info!(target = TARGET, ?selection, "warming cache");

        let (targets, selection_error) = match self.select(selection).await {
            Ok(targets) => (targets, None),
            Err(message) => {
                warn!(target = TARGET, error = %message, "failed to rank warm targets");
                (Vec::new(), Some(message))
            }
        };

        if let Err(err) = self.articles.category_tree().await {
            warn!(target = TARGET, error = %err, "failed to warm category tree");
        }

        let concurrency = self.config.concurrency.max(1);
        let mut results: Vec<(usize, Result<WarmTarget, WarmFailure>)> =
            stream::iter(targets.into_iter().enumerate())
                .map(|(index, target)| async move { (index, self.warm_one(target).await) })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let total = results.len();
        let mut warmed = Vec::new();
        let mut errors = Vec::new();
        for (_, result) in results {
            match result {
                Ok(target) => warmed.push(target),
                Err(failure) => errors.push(failure),
            }
        }

        let elapsed = started.elapsed();
        histogram!(METRIC_WARM_MS).record(elapsed.as_secs_f64() * 1000.0);
        if !errors.is_empty() {
            counter!(METRIC_WARM_FAILURES).increment(errors.len() as u64);
        }

        let summary = WarmSummary {
            total,
            warmed: warmed.len(),
            errors,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            targets: warmed,
            selection_error,
        };
        info!(
            target = TARGET,
            total = summary.total,
            warmed = summary.warmed,
            failed = summary.errors.len(),
            duration_ms = summary.duration_ms,
            "cache warm finished"
        );
        summary
    }

    async fn select(&self, selection: WarmSelection) -> Result<Vec<WarmTarget>, String> {
        let batch_limit = self.config.batch_limit.max(1);
        let candidates = match selection {
            WarmSelection::Explicit(ids) => ids.into_iter().map(WarmTarget::explicit).collect(),
            WarmSelection::Top { limit } => {
                let limit = limit.unwrap_or(batch_limit).clamp(1, batch_limit);
                self.origin
                    .top_viewed(self.config.window_hours, limit)
                    .await
                    .map_err(|err| err.to_string())?
            }
        };
        Ok(dedup(candidates))
    }

    async fn warm_one(&self, mut target: WarmTarget) -> Result<WarmTarget, WarmFailure> {
        let id = target.resource_id.clone();
        let fail = |err: CacheError| WarmFailure {
            resource_id: id.clone(),
            message: err.to_string(),
        };

        let article = self.articles.article(&id).await.map_err(fail)?;
        let related = self.articles.related(&id).await.map_err(fail)?;

        for source in [article.source, related.source] {
            if source == ResolvedFrom::StaleOrigin {
                return Err(WarmFailure {
                    resource_id: id.clone(),
                    message: "origin unavailable, only a stale copy is cached".to_string(),
                });
            }
        }

        target.last_warmed_at = Some(self.clock.now());
        Ok(target)
    }
}

/// Keep the first occurrence of each id, trimmed.
fn dedup(targets: Vec<WarmTarget>) -> Vec<WarmTarget> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .map(|mut target| {
            target.resource_id = target.resource_id.trim().to_string();
            target
        })
        .filter(|target| seen.insert(target.resource_id.clone()))
        .collect()
}

/// Re-warm the most viewed articles every `interval`. The caller owns the handle.
pub fn spawn_warm_schedule(warmer: Arc<CacheWarmer>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            warmer.warm(WarmSelection::Top { limit: None }).await;
        }
    })
}
