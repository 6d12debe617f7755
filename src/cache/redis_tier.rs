//! Redis-backed distributed tier.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use tracing::info;

use super::distributed::DistributedTier;
use super::error::TierError;

const BACKEND: &str = "redis";

pub struct RedisTier {
    pool: Pool,
}

impl RedisTier {
    /// Build a connection pool. No connection is opened until first use.
    pub fn connect(url: &str, pool_size: usize, timeout: Duration) -> Result<Self, TierError> {
        let mut config = deadpool_redis::Config::from_url(url);
        if let Some(ref mut pool_config) = config.pool {
            pool_config.max_size = pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        }

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| TierError::unavailable(BACKEND, err))?;

        info!(
            target = "newsdesk::cache::redis",
            pool_size, "redis pool created"
        );
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, TierError> {
        self.pool
            .get()
            .await
            .map_err(|err| TierError::unavailable(BACKEND, err))
    }
}

#[async_trait]
impl DistributedTier for RedisTier {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|err| TierError::unavailable(BACKEND, err))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), TierError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds.max(1))
            .await
            .map_err(|err| TierError::unavailable(BACKEND, err))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<bool, TierError> {
        let mut conn = self.connection().await?;
        // SET key value NX EX ttl replies OK when stored and nil otherwise.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|err| TierError::unavailable(BACKEND, err))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|err| TierError::unavailable(BACKEND, err))
    }

    async fn ping(&self) -> Result<(), TierError> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| TierError::unavailable(BACKEND, err))?;
        Ok(())
    }
}
