//! Read-through cache manager.
//!
//! Lookups go process-local tier, then distributed tier, then the origin
//! loader. Every result is tagged with where it came from, and a failed origin
//! call falls back to an entry still inside its grace window.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::application::origin::OriginError;
use crate::domain::entries::CacheEntry;
use crate::domain::error::require_identifier;

use super::clock::SharedClock;
use super::config::CacheConfig;
use super::distributed::{DistributedTier, SharedTier};
use super::error::CacheError;
use super::keys::CacheKey;
use super::local::LocalTier;
use super::metric_names::{
    METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_REVALIDATE, METRIC_CACHE_STALE_SERVED,
    METRIC_ORIGIN_ERROR,
};
use super::policy::{CachePolicy, PolicyRegistry};

const TARGET: &str = "newsdesk::cache::manager";

/// Which step of the lookup produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedFrom {
    Local,
    Distributed,
    FreshOrigin,
    /// Origin failed; served from an entry inside its grace window.
    StaleOrigin,
    /// Served past its freshness window while a background refresh runs.
    StaleRevalidating,
}

impl ResolvedFrom {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolvedFrom::Local => "local",
            ResolvedFrom::Distributed => "distributed",
            ResolvedFrom::FreshOrigin => "fresh-origin",
            ResolvedFrom::StaleOrigin => "stale-origin",
            ResolvedFrom::StaleRevalidating => "stale-revalidating",
        }
    }

    pub fn is_stale(self) -> bool {
        matches!(
            self,
            ResolvedFrom::StaleOrigin | ResolvedFrom::StaleRevalidating
        )
    }
}

impl fmt::Display for ResolvedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ResolvedFrom,
    /// When the origin produced this value.
    pub written_at: OffsetDateTime,
}

/// Tiered read-through cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CacheManager {
    local: Arc<LocalTier>,
    tier: SharedTier,
    policies: Arc<PolicyRegistry>,
    clock: SharedClock,
    origin_timeout: Duration,
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
    refreshing: Arc<DashMap<String, ()>>,
    closed: Arc<AtomicBool>,
}

impl CacheManager {
    pub fn new(
        config: &CacheConfig,
        tier: Arc<dyn DistributedTier>,
        clock: SharedClock,
    ) -> Result<Self, CacheError> {
        let policies = PolicyRegistry::from_namespaces(&config.namespaces)?;
        info!(
            target = TARGET,
            backend = tier.backend_name(),
            namespaces = policies.len(),
            "cache manager initialised"
        );

        Ok(Self {
            local: Arc::new(LocalTier::new(config.local_ttl, clock.clone())),
            tier: SharedTier::new(tier, config.tier_timeout),
            policies: Arc::new(policies),
            clock,
            origin_timeout: config.origin_timeout,
            in_flight: Arc::new(DashMap::new()),
            refreshing: Arc::new(DashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn tier(&self) -> &SharedTier {
        &self.tier
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn policy(&self, namespace: &str) -> Result<&CachePolicy, CacheError> {
        self.policies.get(namespace)
    }

    /// Resolve `params` in `namespace` using the namespace's registered policy.
    pub async fn get<T, F, Fut>(
        &self,
        namespace: &str,
        params: &str,
        loader: F,
    ) -> Result<Resolved<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OriginError>> + Send + 'static,
    {
        require_identifier("params_key", params)?;
        let policy = self.policies.get(namespace)?.clone();
        let key = CacheKey::new(namespace, params);
        self.get_with_policy(&key, &policy, loader).await
    }

    pub async fn get_with_policy<T, F, Fut>(
        &self,
        key: &CacheKey,
        policy: &CachePolicy,
        loader: F,
    ) -> Result<Resolved<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OriginError>> + Send + 'static,
    {
        if key.namespace() != policy.namespace() {
            return Err(CacheError::validation(format!(
                "key `{key}` does not belong to namespace `{}`",
                policy.namespace()
            )));
        }

        let now = self.clock.now();
        if let Some(hit) = self.local_hit(key, policy, now) {
            return Ok(hit);
        }

        let shared = self.shared_entry(key).await;
        if let Some(entry) = &shared
            && entry.is_within(now, policy.fresh_ttl())
            && let Some(value) = decode::<T>(entry)
        {
            counter!(METRIC_CACHE_HIT, "tier" => "distributed").increment(1);
            self.local.set(entry.clone());
            return Ok(Resolved {
                value,
                source: ResolvedFrom::Distributed,
                written_at: entry.written_at,
            });
        }

        let candidate = newest(shared, self.local.peek(key.as_str()));
        if let Some(entry) = &candidate
            && policy.serves_while_revalidating(entry.age(now))
            && let Some(value) = decode::<T>(entry)
        {
            counter!(METRIC_CACHE_STALE_SERVED, "mode" => "revalidating").increment(1);
            self.local.set(entry.clone());
            self.spawn_refresh(key.clone(), policy.clone(), loader);
            return Ok(Resolved {
                value,
                source: ResolvedFrom::StaleRevalidating,
                written_at: entry.written_at,
            });
        }

        counter!(METRIC_CACHE_MISS, "namespace" => policy.namespace().to_string()).increment(1);

        let (_flight, contended) = self.acquire_flight(key.as_str()).await;
        if contended && let Some(hit) = self.local_hit(key, policy, self.clock.now()) {
            return Ok(hit);
        }

        match self.call_loader(policy, loader()).await {
            Ok(value) => {
                let written_at = self.clock.now();
                let encoded = encode(key, &value);
                if let Some(encoded) = encoded {
                    self.store_value(key, policy, encoded, written_at).await;
                }
                Ok(Resolved {
                    value,
                    source: ResolvedFrom::FreshOrigin,
                    written_at,
                })
            }
            Err(err) => self.fall_back(key, policy, candidate, err),
        }
    }

    /// Remove `params` in `namespace` from both tiers.
    pub async fn invalidate(&self, namespace: &str, params: &str) {
        let key = CacheKey::new(namespace, params);
        self.local.remove(key.as_str());
        // Failures are logged by the tier wrapper; the entry then ages out on its own.
        let _ = self.tier.delete(key.as_str()).await;
        debug!(target = TARGET, key = %key, "cache entry invalidated");
    }

    /// Stop scheduling background refreshes and drop all process-local entries.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.local.clear();
        info!(target = TARGET, "cache manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn local_hit<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        policy: &CachePolicy,
        now: OffsetDateTime,
    ) -> Option<Resolved<T>> {
        let entry = self.local.get(key.as_str())?;
        if !entry.is_within(now, policy.fresh_ttl()) {
            return None;
        }
        let value = decode::<T>(&entry)?;
        counter!(METRIC_CACHE_HIT, "tier" => "local").increment(1);
        Some(Resolved {
            value,
            source: ResolvedFrom::Local,
            written_at: entry.written_at,
        })
    }

    async fn shared_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let bytes = self.tier.get(key.as_str()).await.ok()??;
        match CacheEntry::decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(
                    target = TARGET,
                    key = %key,
                    error = %err,
                    "discarding undecodable distributed entry"
                );
                None
            }
        }
    }

    async fn acquire_flight(&self, key: &str) -> (FlightGuard, bool) {
        let lock = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let (permit, contended) = match lock.clone().try_lock_owned() {
            Ok(permit) => (permit, false),
            Err(_) => (lock.lock_owned().await, true),
        };

        let guard = FlightGuard {
            map: self.in_flight.clone(),
            key: key.to_string(),
            permit: Some(permit),
        };
        (guard, contended)
    }

    async fn call_loader<T, Fut>(&self, policy: &CachePolicy, fut: Fut) -> Result<T, OriginError>
    where
        Fut: Future<Output = Result<T, OriginError>>,
    {
        let timeout = policy.origin_timeout().unwrap_or(self.origin_timeout);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(OriginError::Timeout(timeout)),
        }
    }

    async fn store_value(
        &self,
        key: &CacheKey,
        policy: &CachePolicy,
        value: Value,
        written_at: OffsetDateTime,
    ) {
        let ttl_seconds = policy.shared_ttl_seconds();
        let entry = CacheEntry::new(key.as_str(), value, written_at, ttl_seconds);
        let bytes = entry.encode();
        self.local.set(entry);

        match bytes {
            Ok(bytes) => {
                let _ = self.tier.set(key.as_str(), &bytes, ttl_seconds).await;
            }
            Err(err) => {
                warn!(target = TARGET, key = %key, error = %err, "failed to encode cache entry");
            }
        }
    }

    fn fall_back<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        policy: &CachePolicy,
        candidate: Option<CacheEntry>,
        err: OriginError,
    ) -> Result<Resolved<T>, CacheError> {
        counter!(METRIC_ORIGIN_ERROR, "namespace" => policy.namespace().to_string()).increment(1);

        if let OriginError::NotFound { .. } = err {
            return Err(CacheError::NotFound {
                namespace: policy.namespace().to_string(),
                key: key.to_string(),
            });
        }
        if let OriginError::Invalid(message) = err {
            return Err(CacheError::validation(message));
        }

        let now = self.clock.now();
        let candidate = newest(candidate, self.local.peek(key.as_str()));
        if let Some(entry) = candidate
            && entry.is_within(now, policy.grace_ttl())
            && let Some(value) = decode::<T>(&entry)
        {
            counter!(METRIC_CACHE_STALE_SERVED, "mode" => "origin_failure").increment(1);
            warn!(
                target = TARGET,
                key = %key,
                age_secs = entry.age(now).as_secs(),
                error = %err,
                "origin failed, serving stale entry"
            );
            let written_at = entry.written_at;
            self.local.set(entry);
            return Ok(Resolved {
                value,
                source: ResolvedFrom::StaleOrigin,
                written_at,
            });
        }

        warn!(
            target = TARGET,
            key = %key,
            error = %err,
            "origin failed with no usable fallback"
        );
        Err(CacheError::OriginUnavailable {
            namespace: policy.namespace().to_string(),
            key: key.to_string(),
            source: err,
        })
    }

    fn spawn_refresh<T, F, Fut>(&self, key: CacheKey, policy: CachePolicy, loader: F)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OriginError>> + Send + 'static,
    {
        if self.is_shut_down() {
            return;
        }
        if self
            .refreshing
            .insert(key.as_str().to_string(), ())
            .is_some()
        {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let _refresh = RefreshGuard {
                map: manager.refreshing.clone(),
                key: key.as_str().to_string(),
            };
            let (_flight, _) = manager.acquire_flight(key.as_str()).await;

            match manager.call_loader(&policy, loader()).await {
                Ok(value) => {
                    let encoded = encode(&key, &value);
                    if let Some(encoded) = encoded {
                        let written_at = manager.clock.now();
                        manager
                            .store_value(&key, &policy, encoded, written_at)
                            .await;
                        counter!(METRIC_CACHE_REVALIDATE, "outcome" => "refreshed").increment(1);
                    }
                }
                Err(err) => {
                    counter!(METRIC_CACHE_REVALIDATE, "outcome" => "failed").increment(1);
                    warn!(
                        target = TARGET,
                        key = %key,
                        error = %err,
                        "background refresh failed"
                    );
                }
            }
        });
    }
}

/// Releases the per-key loader lock and forgets the lock once nobody waits on it.
struct FlightGuard {
    map: Arc<DashMap<String, Arc<Mutex<()>>>>,
    key: String,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.map
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

struct RefreshGuard {
    map: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

fn newest(a: Option<CacheEntry>, b: Option<CacheEntry>) -> Option<CacheEntry> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.written_at > a.written_at { b } else { a }),
        (a, b) => a.or(b),
    }
}

fn encode<T: Serialize>(key: &CacheKey, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            warn!(target = TARGET, key = %key, error = %err, "value not cacheable");
            None
        }
    }
}

fn decode<T: DeserializeOwned>(entry: &CacheEntry) -> Option<T> {
    match serde_json::from_value(entry.value.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(
                target = TARGET,
                key = %entry.key,
                error = %err,
                "cached value does not match the requested type"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::NamespaceConfig;
    use crate::cache::distributed::MemoryTier;

    struct Fixture {
        clock: Arc<ManualClock>,
        tier: Arc<MemoryTier>,
        manager: CacheManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00:00 UTC)));
        let tier = Arc::new(MemoryTier::new(clock.clone()));
        let config = CacheConfig {
            namespaces: vec![
                NamespaceConfig::new("list", 60, 600),
                NamespaceConfig::new("swr", 60, 600)
                    .with_revalidate_window(Duration::from_secs(120)),
            ],
            ..CacheConfig::default()
        };
        let manager = CacheManager::new(&config, tier.clone(), clock.clone()).expect("manager");
        Fixture {
            clock,
            tier,
            manager,
        }
    }

    fn counting_loader(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl FnOnce() -> std::future::Ready<Result<String, OriginError>> + Send + 'static {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value.to_string()))
        }
    }

    fn failing_loader() -> impl FnOnce() -> std::future::Ready<Result<String, OriginError>> + Send
    {
        || std::future::ready(Err(OriginError::unavailable("connection reset")))
    }

    #[tokio::test]
    async fn unknown_namespace_is_rejected_before_loading() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let err = fx
            .manager
            .get::<String, _, _>("weather", "today", counting_loader(&calls, "v"))
            .await
            .expect_err("unknown namespace");
        assert!(matches!(err, CacheError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_params_are_rejected() {
        let fx = fixture();
        let err = fx
            .manager
            .get::<String, _, _>("list", "  ", failing_loader())
            .await
            .expect_err("blank params");
        assert!(matches!(err, CacheError::Validation(_)));
    }

    #[tokio::test]
    async fn miss_populates_both_tiers() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = fx
            .manager
            .get("list", "sports:page1", counting_loader(&calls, "V"))
            .await
            .expect("first");
        assert_eq!(first.source, ResolvedFrom::FreshOrigin);
        assert!(fx.tier.contains("list:sports:page1"));

        let second = fx
            .manager
            .get("list", "sports:page1", counting_loader(&calls, "other"))
            .await
            .expect("second");
        assert_eq!(second.source, ResolvedFrom::Local);
        assert_eq!(second.value, "V");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distributed_hit_is_promoted_to_local() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager
            .get("list", "sports:page1", counting_loader(&calls, "V"))
            .await
            .expect("load");

        fx.clock.advance(Duration::from_secs(10));
        let from_shared = fx
            .manager
            .get("list", "sports:page1", counting_loader(&calls, "x"))
            .await
            .expect("shared");
        assert_eq!(from_shared.source, ResolvedFrom::Distributed);

        let from_local = fx
            .manager
            .get("list", "sports:page1", counting_loader(&calls, "x"))
            .await
            .expect("local");
        assert_eq!(from_local.source, ResolvedFrom::Local);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn origin_not_found_is_never_masked_by_stale_data() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager
            .get("list", "gone:page1", counting_loader(&calls, "V"))
            .await
            .expect("load");
        fx.clock.advance(Duration::from_secs(90));

        let err = fx
            .manager
            .get::<String, _, _>("list", "gone:page1", || async {
                Err(OriginError::not_found("category", "gone"))
            })
            .await
            .expect_err("not found");
        assert!(matches!(err, CacheError::NotFound { .. }));
    }

    #[tokio::test]
    async fn tier_outage_degrades_to_origin() {
        let fx = fixture();
        fx.tier.set_available(false);
        let calls = Arc::new(AtomicUsize::new(0));

        let resolved = fx
            .manager
            .get("list", "sports:page1", counting_loader(&calls, "V"))
            .await
            .expect("origin still reachable");
        assert_eq!(resolved.source, ResolvedFrom::FreshOrigin);
        assert_eq!(resolved.value, "V");
    }

    #[tokio::test]
    async fn local_copy_serves_as_fallback_when_tier_is_down() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager
            .get("list", "sports:page1", counting_loader(&calls, "V"))
            .await
            .expect("load");

        fx.tier.set_available(false);
        fx.clock.advance(Duration::from_secs(90));
        let resolved = fx
            .manager
            .get("list", "sports:page1", failing_loader())
            .await
            .expect("stale fallback");
        assert_eq!(resolved.source, ResolvedFrom::StaleOrigin);
        assert_eq!(resolved.value, "V");
    }

    #[tokio::test]
    async fn background_mode_serves_stale_and_refreshes_once() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager
            .get("swr", "front", counting_loader(&calls, "old"))
            .await
            .expect("load");

        fx.clock.advance(Duration::from_secs(90));
        let stale = fx
            .manager
            .get("swr", "front", counting_loader(&calls, "new"))
            .await
            .expect("stale");
        assert_eq!(stale.source, ResolvedFrom::StaleRevalidating);
        assert_eq!(stale.value, "old");

        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 2 && fx.manager.refreshing.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let fresh = fx
            .manager
            .get("swr", "front", counting_loader(&calls, "unused"))
            .await
            .expect("refreshed");
        assert_eq!(fresh.value, "new");
        assert!(!fresh.source.is_stale());
    }

    #[tokio::test]
    async fn background_window_does_not_extend_past_its_end() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager
            .get("swr", "front", counting_loader(&calls, "old"))
            .await
            .expect("load");

        fx.clock.advance(Duration::from_secs(200));
        let resolved = fx
            .manager
            .get("swr", "front", counting_loader(&calls, "new"))
            .await
            .expect("blocking refresh");
        assert_eq!(resolved.source, ResolvedFrom::FreshOrigin);
        assert_eq!(resolved.value, "new");
    }

    #[tokio::test]
    async fn invalidate_forces_a_reload() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager
            .get("list", "sports:page1", counting_loader(&calls, "V"))
            .await
            .expect("load");

        fx.manager.invalidate("list", "sports:page1").await;
        assert!(!fx.tier.contains("list:sports:page1"));

        fx.manager
            .get("list", "sports:page1", counting_loader(&calls, "W"))
            .await
            .expect("reload");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_clears_local_tier() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager
            .get("list", "sports:page1", counting_loader(&calls, "V"))
            .await
            .expect("load");
        assert!(!fx.manager.local().is_empty());

        fx.manager.shutdown();
        assert!(fx.manager.local().is_empty());
        assert!(fx.manager.is_shut_down());
    }

    #[test]
    fn resolved_from_renders_header_values() {
        assert_eq!(ResolvedFrom::FreshOrigin.to_string(), "fresh-origin");
        assert_eq!(ResolvedFrom::StaleOrigin.as_str(), "stale-origin");
        assert!(ResolvedFrom::StaleRevalidating.is_stale());
        assert!(!ResolvedFrom::Local.is_stale());
    }
}
