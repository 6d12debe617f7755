//! Background work owned by whoever assembles the cache.
//!
//! Nothing is spawned implicitly: the orchestrator creates a [`CacheRuntime`],
//! starts the tasks it wants, and awaits [`CacheRuntime::shutdown`] on exit.

use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::manager::CacheManager;
use super::metric_names::{METRIC_LOCAL_SWEPT, METRIC_TIER_SWEPT};

const TARGET: &str = "newsdesk::cache::runtime";

pub struct CacheRuntime {
    manager: CacheManager,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl CacheRuntime {
    pub fn new(manager: CacheManager) -> Self {
        Self {
            manager,
            tasks: Vec::new(),
        }
    }

    /// Periodically drop expired process-local entries, and expired distributed
    /// entries on backends that do not expire keys themselves.
    pub fn start_sweeper(&mut self, interval: Duration) {
        let manager = self.manager.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                let swept = manager.local().sweep_expired();
                if swept > 0 {
                    counter!(METRIC_LOCAL_SWEPT).increment(swept as u64);
                    debug!(target = TARGET, swept, "expired local entries swept");
                }
                let swept = manager.tier().sweep_expired();
                if swept > 0 {
                    counter!(METRIC_TIER_SWEPT).increment(swept as u64);
                    debug!(
                        target = TARGET,
                        swept,
                        backend = manager.tier().backend_name(),
                        "expired distributed entries swept"
                    );
                }
            }
        });
        self.attach("local-sweeper", handle);
    }

    /// Hand a task to the runtime so it is stopped on shutdown.
    pub fn attach(&mut self, name: &'static str, handle: JoinHandle<()>) {
        info!(target = TARGET, task = name, "background task started");
        self.tasks.push((name, handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every background task, then shut the manager down.
    pub async fn shutdown(self) {
        for (name, handle) in self.tasks {
            handle.abort();
            let _ = handle.await;
            debug!(target = TARGET, task = name, "background task stopped");
        }
        self.manager.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::{Clock, ManualClock};
    use crate::cache::config::CacheConfig;
    use crate::cache::distributed::MemoryTier;
    use crate::domain::entries::CacheEntry;

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_shutdown() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00:00 UTC)));
        let tier = Arc::new(MemoryTier::new(clock.clone()));
        let manager =
            CacheManager::new(&CacheConfig::default(), tier, clock.clone()).expect("manager");
        manager
            .local()
            .set(CacheEntry::new("list:a", json!(1), clock.now(), 60));

        let mut runtime = CacheRuntime::new(manager.clone());
        runtime.start_sweeper(Duration::from_secs(30));
        assert_eq!(runtime.task_count(), 1);

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(manager.local().is_empty());

        runtime.shutdown().await;
        assert!(manager.is_shut_down());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_abandoned_idempotency_keys() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00:00 UTC)));
        let tier = Arc::new(MemoryTier::new(clock.clone()));
        let manager = CacheManager::new(&CacheConfig::default(), tier.clone(), clock.clone())
            .expect("manager");
        for i in 0..50 {
            let lock = format!("idem:u-9:art-{i}:r:lock");
            let response = format!("idem:u-9:art-{i}:r:response");
            assert!(
                manager
                    .tier()
                    .set_if_absent(&lock, b"lock", 300)
                    .await
                    .expect("lock")
            );
            manager
                .tier()
                .set(&response, b"{}", 300)
                .await
                .expect("response");
        }
        assert_eq!(tier.len(), 100);

        let mut runtime = CacheRuntime::new(manager);
        runtime.start_sweeper(Duration::from_secs(30));

        clock.advance(Duration::from_secs(3_600));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(tier.is_empty());

        runtime.shutdown().await;
    }
}
