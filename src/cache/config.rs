//! Cache configuration.
//!
//! Controls the process-local tier, distributed tier timeouts, per-namespace
//! freshness windows and the idempotent write coordinator via `newsdesk.toml`.

use std::time::Duration;

use super::keys::namespaces;

const DEFAULT_LOCAL_TTL_SECS: u64 = 5;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_TIER_TIMEOUT_MS: u64 = 250;
const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_LOCK_TTL_SECS: u64 = 300;
const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REPLAY_POLL_ATTEMPTS: u32 = 10;
const DEFAULT_REPLAY_POLL_INTERVAL_MS: u64 = 25;

/// Freshness windows for one cacheable namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub name: String,
    pub fresh_ttl: Duration,
    pub grace_ttl: Duration,
    /// When set, entries aged within this window past `fresh_ttl` are served
    /// immediately while a background refresh runs.
    pub revalidate_window: Option<Duration>,
    /// Loader deadline for this namespace; falls back to `CacheConfig::origin_timeout`.
    pub origin_timeout: Option<Duration>,
}

impl NamespaceConfig {
    pub fn new(name: &str, fresh_secs: u64, grace_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            fresh_ttl: Duration::from_secs(fresh_secs),
            grace_ttl: Duration::from_secs(grace_secs),
            revalidate_window: None,
            origin_timeout: None,
        }
    }

    pub fn with_revalidate_window(mut self, window: Duration) -> Self {
        self.revalidate_window = Some(window);
        self
    }

    pub fn with_origin_timeout(mut self, timeout: Duration) -> Self {
        self.origin_timeout = Some(timeout);
        self
    }
}

/// Built-in namespaces: list pages refresh quickly, detail pages less so.
pub fn default_namespaces() -> Vec<NamespaceConfig> {
    vec![
        NamespaceConfig::new(namespaces::ARTICLE_LIST, 120, 3_600)
            .with_revalidate_window(Duration::from_secs(60)),
        NamespaceConfig::new(namespaces::ARTICLE, 300, 3_600),
        NamespaceConfig::new(namespaces::CATEGORY_TREE, 300, 3_600),
        NamespaceConfig::new(namespaces::RELATED, 300, 3_600),
    ]
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of a process-local copy, independent of its freshness.
    pub local_ttl: Duration,
    /// Cadence of the background sweep of expired process-local entries.
    pub sweep_interval: Duration,
    /// Upper bound on any single distributed-tier call.
    pub tier_timeout: Duration,
    /// Default upper bound on a loader call.
    pub origin_timeout: Duration,
    pub namespaces: Vec<NamespaceConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_ttl: Duration::from_secs(DEFAULT_LOCAL_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            tier_timeout: Duration::from_millis(DEFAULT_TIER_TIMEOUT_MS),
            origin_timeout: Duration::from_millis(DEFAULT_ORIGIN_TIMEOUT_MS),
            namespaces: default_namespaces(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            local_ttl: settings.local_ttl,
            sweep_interval: settings.sweep_interval,
            tier_timeout: settings.tier_timeout,
            origin_timeout: settings.origin_timeout,
            namespaces: settings.namespaces.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Lifetime of lock and response records. Dedup only holds inside this window.
    pub lock_ttl: Duration,
    pub mutation_timeout: Duration,
    /// How often a duplicate re-reads the response key before reporting "processing".
    pub replay_poll_attempts: u32,
    pub replay_poll_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            mutation_timeout: Duration::from_millis(DEFAULT_MUTATION_TIMEOUT_MS),
            replay_poll_attempts: DEFAULT_REPLAY_POLL_ATTEMPTS,
            replay_poll_interval: Duration::from_millis(DEFAULT_REPLAY_POLL_INTERVAL_MS),
        }
    }
}

impl From<&crate::config::IdempotencySettings> for IdempotencyConfig {
    fn from(settings: &crate::config::IdempotencySettings) -> Self {
        Self {
            lock_ttl: settings.lock_ttl,
            mutation_timeout: settings.mutation_timeout,
            replay_poll_attempts: settings.replay_poll_attempts,
            replay_poll_interval: settings.replay_poll_interval,
        }
    }
}

impl IdempotencyConfig {
    pub fn lock_ttl_seconds(&self) -> u64 {
        self.lock_ttl.as_secs().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.local_ttl, Duration::from_secs(5));
        assert_eq!(config.tier_timeout, Duration::from_millis(250));
        assert_eq!(config.namespaces.len(), 4);

        let idem = IdempotencyConfig::default();
        assert_eq!(idem.lock_ttl_seconds(), 300);
        assert_eq!(idem.replay_poll_attempts, 10);
    }

    #[test]
    fn list_pages_revalidate_in_background() {
        let list = default_namespaces()
            .into_iter()
            .find(|ns| ns.name == namespaces::ARTICLE_LIST)
            .expect("list namespace");
        assert_eq!(list.revalidate_window, Some(Duration::from_secs(60)));
        assert!(list.grace_ttl >= list.fresh_ttl);
    }

    #[test]
    fn sub_second_lock_ttl_rounds_up() {
        let config = IdempotencyConfig {
            lock_ttl: Duration::from_millis(10),
            ..Default::default()
        };
        assert_eq!(config.lock_ttl_seconds(), 1);
    }
}
