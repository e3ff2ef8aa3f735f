use crate::services::cache::CacheError;
use crate::services::metrics::record_error;
use service_core::error::AppError;
use thiserror::Error;

/// SQLSTATE raised by `FOR UPDATE NOWAIT` when a row is already locked.
const LOCK_NOT_AVAILABLE: &str = "55P03";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Amount error: {0}")]
    Amount(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Short label used for the `error_type` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::Consistency(_) => "consistency",
            LedgerError::Amount(_) => "amount",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::LockConflict(_) => "lock_conflict",
            LedgerError::Database(_) => "database",
            LedgerError::Cache(_) => "cache",
            LedgerError::Serialization(_) => "serialization",
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err)
                if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) =>
            {
                LedgerError::LockConflict(db_err.message().to_string())
            }
            _ => LedgerError::Database(err),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        record_error(err.kind());
        match err {
            LedgerError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            LedgerError::Amount(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            LedgerError::Consistency(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            LedgerError::LockConflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            LedgerError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            LedgerError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            LedgerError::Cache(e) => AppError::InternalError(anyhow::Error::new(e)),
            LedgerError::Serialization(e) => AppError::InternalError(anyhow::Error::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn test_app_error_mapping() {
        let cases = [
            (LedgerError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::Amount("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::Consistency("x".into()), StatusCode::CONFLICT),
            (LedgerError::LockConflict("x".into()), StatusCode::CONFLICT),
            (LedgerError::NotFound("x".into()), StatusCode::NOT_FOUND),
        ];

        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_non_database_sqlx_error_is_database() {
        let err = LedgerError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "database");
    }
}
