//! Shared mapping from pool, transaction, and Diesel errors to
//! [`RepositoryError`].

use tracing::debug;

use crate::domain::ports::{ConnectionErrorKind, RepositoryError, TransactionErrorKind};

use super::pool::ConnectionError;
use super::transaction::TransactionError;

impl From<ConnectionError> for RepositoryError {
    fn from(error: ConnectionError) -> Self {
        let kind = match &error {
            ConnectionError::Timeout { .. } => ConnectionErrorKind::Timeout,
            ConnectionError::Exhausted { .. } => ConnectionErrorKind::Exhausted,
            ConnectionError::Broken { .. } => ConnectionErrorKind::Broken,
        };
        Self::connection(kind, error.to_string())
    }
}

impl From<TransactionError> for RepositoryError {
    fn from(error: TransactionError) -> Self {
        let (kind, message) = match error {
            TransactionError::Connection(inner) => return inner.into(),
            TransactionError::BeginFailed { message } => (TransactionErrorKind::BeginFailed, message),
            TransactionError::CommitFailed { message } => (TransactionErrorKind::CommitFailed, message),
            TransactionError::RollbackFailed { message } => {
                (TransactionErrorKind::RollbackFailed, message)
            }
        };
        Self::transaction(kind, message)
    }
}

/// Map a Diesel error raised while running `operation` on `entity` rows.
///
/// Unique violations become conflicts, closed connections become broken
/// connection errors, and everything else keeps the server's message under
/// the operation label.
pub fn map_diesel_error(
    error: diesel::result::Error,
    entity: &'static str,
    operation: impl Into<String>,
) -> RepositoryError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    let operation = operation.into();
    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), %operation, "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            %operation,
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            let detail = info.details().unwrap_or_else(|| info.message());
            RepositoryError::conflict(entity, detail)
        }
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            RepositoryError::connection(ConnectionErrorKind::Broken, info.message())
        }
        DieselError::DatabaseError(_, info) => RepositoryError::query(operation, info.message()),
        DieselError::NotFound => RepositoryError::query(operation, "record not found"),
        other => RepositoryError::query(operation, other.to_string()),
    }
}
