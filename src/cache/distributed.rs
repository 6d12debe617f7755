//! Distributed tier shared by every instance.
//!
//! The tier is an optimization, never a correctness dependency: callers go
//! through [`SharedTier`], which bounds each call with a timeout and reports
//! failures so the cache layer can fall through to the origin.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use time::OffsetDateTime;
use tracing::warn;

use super::clock::SharedClock;
use super::error::TierError;
use super::metric_names::METRIC_TIER_ERROR;

#[async_trait]
pub trait DistributedTier: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TierError>;

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), TierError>;

    /// Atomically store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<bool, TierError>;

    async fn delete(&self, key: &str) -> Result<(), TierError>;

    async fn ping(&self) -> Result<(), TierError>;

    /// Drop entries whose TTL elapsed and return how many were removed.
    /// Backends that expire keys on their own keep the default.
    fn sweep_expired(&self) -> usize {
        0
    }
}

/// Timeout-bounded handle to the configured distributed tier.
#[derive(Clone)]
pub struct SharedTier {
    inner: Arc<dyn DistributedTier>,
    timeout: Duration,
}

impl SharedTier {
    pub fn new(inner: Arc<dyn DistributedTier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), TierError> {
        self.bounded("set", key, self.inner.set(key, value, ttl_seconds))
            .await
    }

    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<bool, TierError> {
        self.bounded(
            "set_if_absent",
            key,
            self.inner.set_if_absent(key, value, ttl_seconds),
        )
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.bounded("delete", key, self.inner.delete(key)).await
    }

    pub async fn ping(&self) -> Result<(), TierError> {
        self.bounded("ping", "-", self.inner.ping()).await
    }

    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T, TierError>>,
    ) -> Result<T, TierError> {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TierError::Timeout {
                op,
                after: self.timeout,
            }),
        };

        if let Err(err) = &result {
            counter!(METRIC_TIER_ERROR, "op" => op).increment(1);
            warn!(
                target = "newsdesk::cache::distributed",
                backend = self.inner.backend_name(),
                op,
                key,
                error = %err,
                "distributed tier call failed"
            );
        }
        result
    }
}

#[derive(Debug, Clone)]
struct MemorySlot {
    value: Vec<u8>,
    expires_at: OffsetDateTime,
}

/// In-process stand-in for the distributed tier.
///
/// Used when no Redis URL is configured and in tests, where availability and
/// latency can be toggled to simulate an outage.
pub struct MemoryTier {
    entries: DashMap<String, MemorySlot>,
    clock: SharedClock,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryTier {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live_value(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn gate(&self) -> Result<(), TierError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TierError::unavailable("memory", "connection refused"))
        }
    }

    fn expiry(&self, ttl_seconds: u64) -> OffsetDateTime {
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        self.clock.now() + time::Duration::seconds(ttl)
    }

    fn live_value(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let slot = self.entries.get(key)?;
        if slot.expires_at > now {
            Some(slot.value.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl DistributedTier for MemoryTier {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        self.gate().await?;
        let value = self.live_value(key);
        if value.is_none() {
            let now = self.clock.now();
            self.entries.remove_if(key, |_, slot| slot.expires_at <= now);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), TierError> {
        self.gate().await?;
        let slot = MemorySlot {
            value: value.to_vec(),
            expires_at: self.expiry(ttl_seconds),
        };
        self.entries.insert(key.to_string(), slot);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<bool, TierError> {
        self.gate().await?;
        let now = self.clock.now();
        let slot = MemorySlot {
            value: value.to_vec(),
            expires_at: self.expiry(ttl_seconds),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    Ok(false)
                } else {
                    occupied.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.gate().await?;
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), TierError> {
        self.gate().await
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::ManualClock;

    fn memory() -> (Arc<ManualClock>, Arc<MemoryTier>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00:00 UTC)));
        let tier = Arc::new(MemoryTier::new(clock.clone()));
        (clock, tier)
    }

    #[tokio::test]
    async fn values_expire_after_ttl() {
        let (clock, tier) = memory();
        tier.set("k", b"v", 10).await.expect("set");
        assert_eq!(tier.get("k").await.expect("get"), Some(b"v".to_vec()));

        clock.advance(Duration::from_secs(10));
        assert_eq!(tier.get("k").await.expect("get"), None);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn sweep_drops_keys_nobody_reads_again() {
        let (clock, tier) = memory();
        for i in 0..100 {
            assert!(
                tier.set_if_absent(&format!("idem:u-{i}:lock"), b"lock", 300)
                    .await
                    .expect("lock")
            );
            tier.set(&format!("idem:u-{i}:response"), b"{}", 300)
                .await
                .expect("response");
        }
        tier.set("list:sports:page1", b"[]", 3_600)
            .await
            .expect("listing");
        assert_eq!(tier.len(), 201);
        assert_eq!(tier.sweep_expired(), 0);

        clock.advance(Duration::from_secs(301));
        assert_eq!(tier.sweep_expired(), 200);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains("list:sports:page1"));

        let shared = SharedTier::new(tier.clone(), Duration::from_millis(100));
        clock.advance(Duration::from_secs(3_600));
        assert_eq!(shared.sweep_expired(), 1);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn set_if_absent_only_stores_once() {
        let (clock, tier) = memory();
        assert!(tier.set_if_absent("lock", b"a", 300).await.expect("first"));
        assert!(!tier.set_if_absent("lock", b"b", 300).await.expect("second"));
        assert_eq!(tier.get("lock").await.expect("get"), Some(b"a".to_vec()));

        clock.advance(Duration::from_secs(300));
        assert!(tier.set_if_absent("lock", b"c", 300).await.expect("after expiry"));
    }

    #[tokio::test]
    async fn concurrent_set_if_absent_has_one_winner() {
        let (_clock, tier) = memory();
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let tier = tier.clone();
            handles.push(tokio::spawn(async move {
                tier.set_if_absent("lock", &[i], 300).await.expect("set")
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn unavailable_tier_reports_errors() {
        let (_clock, tier) = memory();
        tier.set_available(false);
        assert!(matches!(
            tier.get("k").await,
            Err(TierError::Unavailable { .. })
        ));
        assert!(tier.ping().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_tier_bounds_slow_calls() {
        let (_clock, tier) = memory();
        tier.set_latency(Duration::from_secs(5));
        let shared = SharedTier::new(tier, Duration::from_millis(100));

        let err = shared.get("k").await.expect_err("timeout");
        assert!(matches!(err, TierError::Timeout { op: "get", .. }));
    }
}
