//! Mapping from `sqlx` errors to the core `StoreError`.

use eventline_core::error::StoreError;

/// Translates a driver error, surfacing uniqueness violations distinctly so
/// callers can treat them as lost races.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation {
            constraint: db.constraint().unwrap_or("unknown").to_owned(),
        },
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_owned()),
        err @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
            StoreError::Serialization(err.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}
