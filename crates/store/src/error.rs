use rusqlite::ErrorCode;
use thiserror::Error;

/// Storage failures split by retry policy: transient errors may be retried
/// with backoff, structural errors (constraint violations, schema or model
/// mismatches, corrupt metadata) must escalate immediately.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("structural storage failure: {0}")]
    Structural(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::ConstraintViolation => StoreError::Structural(err.to_string()),
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    StoreError::Transient(err.to_string())
                }
                _ => StoreError::Transient(err.to_string()),
            },
            _ => StoreError::Transient(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        // Metadata that fails to (de)serialise is corrupt, not retryable.
        StoreError::Structural(format!("metadata record: {err}"))
    }
}
