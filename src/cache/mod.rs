//! Tiered content cache.
//!
//! - **Process-local tier**: short-lived copies private to one instance.
//! - **Distributed tier**: shared by every instance (Redis, or in-memory when
//!   running single-node), also hosting idempotency locks.
//! - **Origin**: the system of record, reached through a caller-supplied loader.
//!
//! Freshness windows are configured per namespace in `newsdesk.toml`:
//!
//! ```toml
//! [cache]
//! local_ttl_seconds = 5
//!
//! [[cache.namespaces]]
//! name = "list"
//! fresh_seconds = 120
//! grace_seconds = 3600
//! revalidate_window_seconds = 60
//! ```

pub mod clock;
mod config;
pub mod distributed;
mod error;
mod idempotency;
mod keys;
mod local;
mod lock;
mod manager;
pub mod metric_names;
mod policy;
mod redis_tier;
mod runtime;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CacheConfig, IdempotencyConfig, NamespaceConfig, default_namespaces};
pub use distributed::{DistributedTier, MemoryTier, SharedTier};
pub use error::{CacheError, TierError, WriteError};
pub use idempotency::{IdempotentWriteCoordinator, WriteOutcome};
pub use keys::{CacheKey, IdempotencyKeys, listing_params, namespaces};
pub use local::LocalTier;
pub use manager::{CacheManager, Resolved, ResolvedFrom};
pub use policy::{CachePolicy, PolicyRegistry, RevalidateMode};
pub use redis_tier::RedisTier;
pub use runtime::CacheRuntime;

pub(crate) use lock::{rw_read, rw_write};
