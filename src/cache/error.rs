use std::time::Duration;

use thiserror::Error;

use crate::application::origin::OriginError;
use crate::domain::error::DomainError;

/// Failure of the distributed tier. Always absorbed by the cache layer.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("distributed tier `{backend}` unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },
    #[error("distributed tier `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
}

impl TierError {
    pub fn unavailable(backend: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            backend,
            message: err.to_string(),
        }
    }
}

/// Errors surfaced by the read path.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("`{key}` does not exist at the origin")]
    NotFound { namespace: String, key: String },
    #[error("origin unavailable for `{key}` in namespace `{namespace}`: {source}")]
    OriginUnavailable {
        namespace: String,
        key: String,
        #[source]
        source: OriginError,
    },
}

impl CacheError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(DomainError::validation(message))
    }
}

/// Errors surfaced by the idempotent write path.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("outcome of write on `{resource_id}` is unknown after {after:?}")]
    MutationAmbiguous { resource_id: String, after: Duration },
    #[error("write on `{resource_id}` failed: {source}")]
    Mutation {
        resource_id: String,
        #[source]
        source: OriginError,
    },
}
