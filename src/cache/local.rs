//! Process-local tier.
//!
//! A short-lived copy of recently resolved entries, private to one instance.
//! Local copies expire after `local_ttl` regardless of their freshness so
//! instances converge quickly after a write elsewhere in the fleet.

use std::time::Duration;

use dashmap::DashMap;
use time::OffsetDateTime;

use crate::domain::entries::CacheEntry;

use super::clock::SharedClock;

#[derive(Debug, Clone)]
struct LocalSlot {
    entry: CacheEntry,
    stored_at: OffsetDateTime,
}

pub struct LocalTier {
    entries: DashMap<String, LocalSlot>,
    ttl: Duration,
    clock: SharedClock,
}

impl LocalTier {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Return the entry when its local copy has not yet expired.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let expired = {
            let slot = self.entries.get(key)?;
            if self.is_live(&slot, now) {
                return Some(slot.entry.clone());
            }
            slot.stored_at
        };

        // Only drop the slot if nobody replaced it in between.
        self.entries
            .remove_if(key, |_, slot| slot.stored_at == expired);
        None
    }

    /// Return the entry even if its local copy expired. Used as a last-resort
    /// fallback candidate when both the distributed tier and the origin fail.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|slot| slot.entry.clone())
    }

    pub fn set(&self, entry: CacheEntry) {
        let stored_at = self.clock.now();
        self.entries
            .insert(entry.key.clone(), LocalSlot { entry, stored_at });
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every expired local copy and return how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| self.is_live(slot, now));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, slot: &LocalSlot, now: OffsetDateTime) -> bool {
        let held = now - slot.stored_at;
        held.is_negative() || held.unsigned_abs() < self.ttl
    }
}
