use std::time::Duration;

use crate::application::origin::OriginError;

/// Map a driver error onto the origin taxonomy.
///
/// Only a cancelled statement counts as a timeout: the write may or may not
/// have committed. Failing to obtain a connection means nothing ran.
pub fn map_sqlx_error(err: sqlx::Error, statement_timeout: Duration) -> OriginError {
    match err {
        sqlx::Error::RowNotFound => OriginError::not_found("row", "unknown"),
        sqlx::Error::Database(db) if db.message().contains("canceling statement") => {
            OriginError::Timeout(statement_timeout)
        }
        sqlx::Error::Database(db)
            if db.message().contains("invalid input syntax")
                || db.message().contains("violates") =>
        {
            OriginError::Invalid(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            OriginError::unavailable("no database connection available")
        }
        other => OriginError::unavailable(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_not_ambiguous() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut, Duration::from_secs(2));
        assert!(matches!(err, OriginError::Unavailable(_)));
    }

    #[test]
    fn missing_row_is_definitive() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound, Duration::from_secs(2));
        assert!(err.is_definitive());
    }
}
