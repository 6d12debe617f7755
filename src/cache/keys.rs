//! Cache key derivation.
//!
//! Keys are deterministic functions of the logical resource name and its query
//! parameters, so every instance computes the same key for the same request.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::entities::ListingSort;

/// Namespaces with a registered cache policy.
pub mod namespaces {
    pub const ARTICLE: &str = "article";
    pub const ARTICLE_LIST: &str = "list";
    pub const CATEGORY_TREE: &str = "categories";
    pub const RELATED: &str = "related";
}

const MAX_PARAMS_LEN: usize = 120;
const DIGEST_LEN: usize = 32;

/// Fully qualified key shared by the process-local and distributed tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    namespace_len: usize,
}

impl CacheKey {
    /// Build `{namespace}:{params}`. Oversized parameter strings are replaced by
    /// a digest so keys stay bounded.
    pub fn new(namespace: &str, params: &str) -> Self {
        let params = if params.len() > MAX_PARAMS_LEN {
            format!("h{}", digest(params))
        } else {
            params.to_string()
        };

        Self {
            key: format!("{namespace}:{params}"),
            namespace_len: namespace.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.key[..self.namespace_len]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Parameter string for a category listing page, e.g. `sports:page1`.
pub fn listing_params(category: &str, page: u32, sort: ListingSort) -> String {
    match sort {
        ListingSort::Latest => format!("{category}:page{page}"),
        other => format!("{category}:page{page}:{}", other.as_str()),
    }
}

/// Lock and response keys for one idempotent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKeys {
    pub lock: String,
    pub response: String,
}

impl IdempotencyKeys {
    pub fn derive(actor_id: &str, resource_id: &str, client_request_id: &str) -> Self {
        // The digest covers all three parts so `a:b`/`c` and `a`/`b:c` never collide.
        let fingerprint = digest(&format!(
            "{actor_id}\u{1f}{resource_id}\u{1f}{client_request_id}"
        ));
        let base = format!("idem:{actor_id}:{resource_id}:{fingerprint}");
        Self {
            lock: format!("{base}:lock"),
            response: format!("{base}:response"),
        }
    }
}

fn digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(DIGEST_LEN);
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_key_is_readable() {
        let key = CacheKey::new(
            namespaces::ARTICLE_LIST,
            &listing_params("sports", 1, ListingSort::Latest),
        );
        assert_eq!(key.as_str(), "list:sports:page1");
        assert_eq!(key.namespace(), "list");
    }

    #[test]
    fn sort_order_changes_the_key() {
        let latest = listing_params("sports", 2, ListingSort::Latest);
        let viewed = listing_params("sports", 2, ListingSort::MostViewed);
        assert_ne!(latest, viewed);
        assert_eq!(viewed, "sports:page2:most_viewed");
    }

    #[test]
    fn long_params_are_digested_deterministically() {
        let params = "q=".repeat(100);
        let first = CacheKey::new("search", &params);
        let second = CacheKey::new("search", &params);
        assert_eq!(first, second);
        assert!(first.as_str().len() < 64);
        assert_eq!(first.namespace(), "search");
    }

    #[test]
    fn idempotency_keys_are_distinct_per_part() {
        let keys = IdempotencyKeys::derive("u-9", "art-42", "r-1");
        assert_ne!(keys.lock, keys.response);
        assert!(keys.lock.starts_with("idem:u-9:art-42:"));
        assert!(keys.lock.ends_with(":lock"));

        let shifted = IdempotencyKeys::derive("u-9:art", "42", "r-1");
        assert_ne!(keys.lock, shifted.lock);
        assert_ne!(keys, IdempotencyKeys::derive("u-9", "art-42", "r-2"));
    }
}
