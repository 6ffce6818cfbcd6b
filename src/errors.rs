use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error taxonomy from spec.md §7. The teacher boxes every storage error
/// behind `vercel_runtime::Error` (`Box<dyn Error + Send + Sync>`), which
/// suits a serverless handler that only ever returns HTTP 500 on failure.
/// This crate's operator entrypoints must distinguish retryable storage
/// hiccups from fatal schema problems from bad input, so the error type is a
/// `thiserror` enum instead (borrowed from `ChainSafe-forest` /
/// `cooprefr-bettersys`, both of which depend on `thiserror` in the pack).
#[derive(Debug, Error)]
pub enum CoreError {
  #[error("transient storage error: {0}")]
  TransientStorageError(#[source] sqlx::Error),

  #[error("schema error: {0}")]
  SchemaError(String),

  #[error("validation error: {0}")]
  ValidationError(String),

  #[error("margin guardrail violated: {reason}")]
  MarginGuardrailError { reason: String },

  #[error(
    "partial commit for window [{window_start}, {window_end}) payment_type={payment_type}: {detail}"
  )]
  PartialCommitError {
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    payment_type: String,
    detail: String,
  },
}

impl CoreError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, CoreError::TransientStorageError(_))
  }
}

/// Classifies a raw `sqlx::Error` into the transient/fatal split spec.md §4.1
/// and §7 require: connection drops and timeouts are retryable, anything
/// that indicates a schema/decode mismatch is fatal.
pub fn classify_storage_error(err: sqlx::Error) -> CoreError {
  match &err {
    sqlx::Error::PoolTimedOut
    | sqlx::Error::PoolClosed
    | sqlx::Error::Io(_)
    | sqlx::Error::Tls(_) => CoreError::TransientStorageError(err),
    sqlx::Error::Database(db_err) => {
      // Lock wait timeouts and deadlocks (MySQL 1205/1213) are transient;
      // everything else from the database is treated as schema-fatal.
      match db_err.code().as_deref() {
        Some("1205") | Some("1213") => CoreError::TransientStorageError(err),
        _ => CoreError::SchemaError(err.to_string()),
      }
    }
    sqlx::Error::ColumnDecode { .. } | sqlx::Error::TypeNotFound { .. } => {
      CoreError::SchemaError(err.to_string())
    }
    _ => CoreError::TransientStorageError(err),
  }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pool_timeout_is_retryable() {
    let err = classify_storage_error(sqlx::Error::PoolTimedOut);
    assert!(err.is_retryable());
  }

  #[test]
  fn validation_error_is_not_retryable() {
    let err = CoreError::ValidationError("negative pool".to_string());
    assert!(!err.is_retryable());
  }
}
