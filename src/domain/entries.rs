//! Ephemeral records kept in the cache tiers.
//!
//! Nothing here is persisted beyond its TTL. The origin store stays the only
//! durable source of truth.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// A resolved value together with the moment it was read from the origin.
///
/// `written_at` travels with the value between tiers, so a copy promoted from
/// the distributed tier into the process-local tier keeps its original age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub written_at: OffsetDateTime,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: Value,
        written_at: OffsetDateTime,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            written_at,
            ttl_seconds,
        }
    }

    /// Time elapsed since the origin produced this value. Clock skew that puts
    /// `written_at` in the future counts as zero age.
    pub fn age(&self, now: OffsetDateTime) -> Duration {
        let elapsed = now - self.written_at;
        if elapsed.is_negative() {
            Duration::ZERO
        } else {
            elapsed.unsigned_abs()
        }
    }

    pub fn is_within(&self, now: OffsetDateTime, window: Duration) -> bool {
        self.age(now) < window
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    InFlight,
    Completed,
}

/// Lock record stored at the lock key of an idempotent write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub lock_key: String,
    pub response_key: String,
    pub state: IdempotencyState,
    pub attempt_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl IdempotencyRecord {
    pub fn in_flight(
        lock_key: impl Into<String>,
        response_key: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            lock_key: lock_key.into(),
            response_key: response_key.into(),
            state: IdempotencyState::InFlight,
            attempt_id: Uuid::new_v4(),
            created_at,
        }
    }

    pub fn completed(&self) -> Self {
        Self {
            state: IdempotencyState::Completed,
            ..self.clone()
        }
    }
}

/// Final response body replayed verbatim to duplicates of a completed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub attempt_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    pub body: Value,
}
