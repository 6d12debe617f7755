//! Idempotent write coordinator.
//!
//! Guards a mutation with a lock record claimed through the distributed tier's
//! set-if-absent primitive. The first attempt for an
//! `(actor, resource, request id)` triple runs the mutation and stores its
//! response; duplicates replay that response or learn the write is still in
//! flight.
//!
//! Deduplication only holds while the lock record lives (`lock_ttl`, 300s by
//! default). A duplicate arriving after expiry is treated as a new request.
//!
//! A mutation that times out has an unknown outcome. No response is stored,
//! the lock is released so the same request id may retry, and the caller gets
//! [`WriteError::MutationAmbiguous`]. Retrying a relative action such as
//! "toggle" after an ambiguous outcome re-reads current state first, so clients
//! that need exact retry semantics should send explicit save/unsave actions.

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::application::origin::OriginError;
use crate::domain::entries::{IdempotencyRecord, StoredResponse};
use crate::domain::error::{DomainError, require_identifier};

use super::clock::SharedClock;
use super::config::IdempotencyConfig;
use super::distributed::SharedTier;
use super::error::WriteError;
use super::keys::IdempotencyKeys;
use super::metric_names::{
    METRIC_IDEMPOTENCY_AMBIGUOUS, METRIC_IDEMPOTENCY_DEGRADED, METRIC_IDEMPOTENCY_IN_FLIGHT,
    METRIC_IDEMPOTENCY_REPLAY,
};

const TARGET: &str = "newsdesk::cache::idempotency";
const MAX_REQUEST_ID_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<R> {
    /// This call ran the mutation.
    Applied(R),
    /// A previous attempt with the same request id completed; its response is returned verbatim.
    Replayed(R),
    /// A previous attempt with the same request id has not finished yet.
    InFlight,
}

impl<R> WriteOutcome<R> {
    pub fn response(&self) -> Option<&R> {
        match self {
            WriteOutcome::Applied(response) | WriteOutcome::Replayed(response) => Some(response),
            WriteOutcome::InFlight => None,
        }
    }

    pub fn into_response(self) -> Option<R> {
        match self {
            WriteOutcome::Applied(response) | WriteOutcome::Replayed(response) => Some(response),
            WriteOutcome::InFlight => None,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, WriteOutcome::Replayed(_))
    }
}

#[derive(Clone)]
pub struct IdempotentWriteCoordinator {
    tier: SharedTier,
    config: IdempotencyConfig,
    clock: SharedClock,
}

impl IdempotentWriteCoordinator {
    pub fn new(tier: SharedTier, config: IdempotencyConfig, clock: SharedClock) -> Self {
        Self {
            tier,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub async fn execute<R, F, Fut>(
        &self,
        actor_id: &str,
        resource_id: &str,
        client_request_id: Option<&str>,
        mutation: F,
    ) -> Result<WriteOutcome<R>, WriteError>
    where
        R: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R, OriginError>> + Send,
    {
        require_identifier("actor_id", actor_id)?;
        require_identifier("resource_id", resource_id)?;
        let request_id = normalize_request_id(client_request_id)?;

        let Some(request_id) = request_id else {
            debug!(
                target = TARGET,
                actor_id, resource_id, "no request id, executing without dedup"
            );
            return self
                .run_mutation(resource_id, mutation)
                .await
                .map(WriteOutcome::Applied);
        };

        let keys = IdempotencyKeys::derive(actor_id, resource_id, request_id);
        let record = IdempotencyRecord::in_flight(&keys.lock, &keys.response, self.clock.now());
        let ttl = self.config.lock_ttl_seconds();

        let claimed = match serde_json::to_vec(&record) {
            Ok(bytes) => self.tier.set_if_absent(&keys.lock, &bytes, ttl).await,
            Err(err) => {
                warn!(target = TARGET, error = %err, "failed to encode lock record");
                return self.run_degraded(resource_id, mutation).await;
            }
        };

        match claimed {
            Ok(true) => self.run_claimed(resource_id, &keys, &record, mutation).await,
            Ok(false) => Ok(self.await_replay(&keys).await),
            Err(err) => {
                warn!(
                    target = TARGET,
                    actor_id,
                    resource_id,
                    error = %err,
                    "lock unavailable, executing without dedup"
                );
                self.run_degraded(resource_id, mutation).await
            }
        }
    }

    async fn run_claimed<R, F, Fut>(
        &self,
        resource_id: &str,
        keys: &IdempotencyKeys,
        record: &IdempotencyRecord,
        mutation: F,
    ) -> Result<WriteOutcome<R>, WriteError>
    where
        R: Serialize + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R, OriginError>> + Send,
    {
        let response = match self.run_mutation(resource_id, mutation).await {
            Ok(response) => response,
            Err(err) => {
                // The write either never happened or its outcome is unknown.
                // Either way the same request id may try again.
                let _ = self.tier.delete(&keys.lock).await;
                return Err(err);
            }
        };

        let ttl = self.config.lock_ttl_seconds();
        let stored = serde_json::to_value(&response).map(|body| StoredResponse {
            attempt_id: record.attempt_id,
            completed_at: self.clock.now(),
            body,
        });
        let encoded = stored.and_then(|stored| serde_json::to_vec(&stored));
        let completed = serde_json::to_vec(&record.completed());

        match (encoded, completed) {
            (Ok(encoded), Ok(completed)) => {
                // Response first: a completed lock must always have a replayable response.
                if self.tier.set(&keys.response, &encoded, ttl).await.is_ok() {
                    let _ = self.tier.set(&keys.lock, &completed, ttl).await;
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(
                    target = TARGET,
                    resource_id,
                    error = %err,
                    "response not stored, duplicates will report in-flight until the lock expires"
                );
            }
        }

        info!(
            target = TARGET,
            resource_id,
            attempt_id = %record.attempt_id,
            "idempotent write applied"
        );
        Ok(WriteOutcome::Applied(response))
    }

    async fn run_degraded<R, F, Fut>(
        &self,
        resource_id: &str,
        mutation: F,
    ) -> Result<WriteOutcome<R>, WriteError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R, OriginError>> + Send,
    {
        counter!(METRIC_IDEMPOTENCY_DEGRADED).increment(1);
        self.run_mutation(resource_id, mutation)
            .await
            .map(WriteOutcome::Applied)
    }

    async fn run_mutation<R, F, Fut>(&self, resource_id: &str, mutation: F) -> Result<R, WriteError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R, OriginError>> + Send,
    {
        let limit = self.config.mutation_timeout;
        let after = match tokio::time::timeout(limit, mutation()).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(OriginError::Timeout(after))) => after,
            Ok(Err(source)) => {
                return Err(WriteError::Mutation {
                    resource_id: resource_id.to_string(),
                    source,
                });
            }
            Err(_) => limit,
        };

        counter!(METRIC_IDEMPOTENCY_AMBIGUOUS).increment(1);
        warn!(
            target = TARGET,
            resource_id,
            ?after,
            "mutation outcome unknown after timeout"
        );
        Err(WriteError::MutationAmbiguous {
            resource_id: resource_id.to_string(),
            after,
        })
    }

    async fn await_replay<R: DeserializeOwned>(&self, keys: &IdempotencyKeys) -> WriteOutcome<R> {
        let attempts = self.config.replay_poll_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.replay_poll_interval).await;
            }

            match self.tier.get(&keys.response).await {
                Ok(Some(bytes)) => match decode_response::<R>(&bytes) {
                    Ok(response) => {
                        counter!(METRIC_IDEMPOTENCY_REPLAY).increment(1);
                        debug!(target = TARGET, key = %keys.response, "replaying stored response");
                        return WriteOutcome::Replayed(response);
                    }
                    Err(err) => {
                        warn!(
                            target = TARGET,
                            key = %keys.response,
                            error = %err,
                            "stored response is unreadable"
                        );
                        break;
                    }
                },
                Ok(None) => continue,
                Err(_) => break,
            }
        }

        counter!(METRIC_IDEMPOTENCY_IN_FLIGHT).increment(1);
        WriteOutcome::InFlight
    }
}

fn normalize_request_id(raw: Option<&str>) -> Result<Option<&str>, DomainError> {
    let Some(raw) = raw.map(str::trim).filter(|id| !id.is_empty()) else {
        return Ok(None);
    };
    if raw.len() > MAX_REQUEST_ID_LEN {
        return Err(DomainError::validation(format!(
            "client request id exceeds {MAX_REQUEST_ID_LEN} bytes"
        )));
    }
    require_identifier("client_request_id", raw)?;
    Ok(Some(raw))
}

fn decode_response<R: DeserializeOwned>(bytes: &[u8]) -> Result<R, serde_json::Error> {
    let stored: StoredResponse = serde_json::from_slice(bytes)?;
    serde_json::from_value(stored.body)
}
