//! Freshness and stale-while-revalidate policy per namespace.

use std::collections::HashMap;
use std::time::Duration;

use super::config::NamespaceConfig;
use super::error::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidateMode {
    /// Callers wait for a fresh value; stale data is only served when the origin fails.
    Blocking,
    /// Entries aged less than `fresh_ttl + window` are served at once while one
    /// refresh runs in the background.
    Background { window: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    namespace: String,
    fresh_ttl: Duration,
    grace_ttl: Duration,
    revalidate: RevalidateMode,
    origin_timeout: Option<Duration>,
}

impl CachePolicy {
    pub fn new(
        namespace: impl Into<String>,
        fresh_ttl: Duration,
        grace_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() || namespace.contains(':') {
            return Err(CacheError::validation(format!(
                "namespace `{namespace}` must be non-empty and contain no `:`"
            )));
        }
        if fresh_ttl.is_zero() {
            return Err(CacheError::validation(format!(
                "namespace `{namespace}` needs a non-zero freshness window"
            )));
        }
        if grace_ttl < fresh_ttl {
            return Err(CacheError::validation(format!(
                "namespace `{namespace}` has a grace window shorter than its freshness window"
            )));
        }

        Ok(Self {
            namespace,
            fresh_ttl,
            grace_ttl,
            revalidate: RevalidateMode::Blocking,
            origin_timeout: None,
        })
    }

    pub fn with_background_revalidate(mut self, window: Duration) -> Self {
        self.revalidate = RevalidateMode::Background { window };
        self
    }

    pub fn with_origin_timeout(mut self, timeout: Duration) -> Self {
        self.origin_timeout = Some(timeout);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn fresh_ttl(&self) -> Duration {
        self.fresh_ttl
    }

    pub fn grace_ttl(&self) -> Duration {
        self.grace_ttl
    }

    pub fn revalidate(&self) -> RevalidateMode {
        self.revalidate
    }

    pub fn origin_timeout(&self) -> Option<Duration> {
        self.origin_timeout
    }

    /// Expiry handed to the distributed tier. Entries must outlive `fresh_ttl`
    /// so they remain usable as a degraded fallback.
    pub fn shared_ttl_seconds(&self) -> u64 {
        let secs = self.grace_ttl.as_secs();
        if self.grace_ttl.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }

    /// Whether an entry of this age may be served while a refresh runs.
    pub fn serves_while_revalidating(&self, age: Duration) -> bool {
        match self.revalidate {
            RevalidateMode::Blocking => false,
            RevalidateMode::Background { window } => {
                let limit = self.fresh_ttl.saturating_add(window).min(self.grace_ttl);
                age >= self.fresh_ttl && age < limit
            }
        }
    }
}

impl TryFrom<&NamespaceConfig> for CachePolicy {
    type Error = CacheError;

    fn try_from(config: &NamespaceConfig) -> Result<Self, Self::Error> {
        let policy = CachePolicy::new(config.name.clone(), config.fresh_ttl, config.grace_ttl)?;
        let policy = match config.revalidate_window {
            Some(window) if !window.is_zero() => policy.with_background_revalidate(window),
            _ => policy,
        };
        Ok(match config.origin_timeout {
            Some(timeout) => policy.with_origin_timeout(timeout),
            None => policy,
        })
    }
}

/// Policies indexed by namespace.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, CachePolicy>,
}

impl PolicyRegistry {
    pub fn from_namespaces(namespaces: &[NamespaceConfig]) -> Result<Self, CacheError> {
        let mut registry = Self::default();
        for config in namespaces {
            registry.insert(CachePolicy::try_from(config)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, policy: CachePolicy) {
        self.policies.insert(policy.namespace.clone(), policy);
    }

    pub fn get(&self, namespace: &str) -> Result<&CachePolicy, CacheError> {
        self.policies
            .get(namespace)
            .ok_or_else(|| CacheError::validation(format!("unknown cache namespace `{namespace}`")))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
