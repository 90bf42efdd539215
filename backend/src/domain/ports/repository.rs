//! Generic persistence port shared by every stored entity.
//!
//! A [`Repository`] offers the same five operations for each entity kind:
//! store a draft, retrieve by identifier, retrieve a filtered page, update a
//! full record, and remove by identifier. Adapters run each call inside one
//! database transaction so partial writes are never visible.

use std::fmt;

use async_trait::async_trait;
use pagination::Page;
use uuid::Uuid;

use super::define_port_error;

/// An entity kind that can be persisted through a [`Repository`].
pub trait Entity: Send + Sync + 'static {
    /// Caller-supplied fields used to create a new record.
    type Draft: Send + Sync;
    /// Listing filters, including raw pagination parameters.
    type Filters: Send + Sync;
    /// Lower-case name used in error messages.
    const KIND: &'static str;
}

/// Why a connection could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// No connection became available before the deadline.
    Timeout,
    /// Every pooled connection was checked out when the deadline passed.
    Exhausted,
    /// The connection could not be established or failed mid-operation.
    Broken,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::Exhausted => "exhausted",
            Self::Broken => "broken",
        };
        f.write_str(label)
    }
}

/// Which transaction boundary failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// `BEGIN` was rejected.
    BeginFailed,
    /// `COMMIT` was rejected; the transaction did not persist.
    CommitFailed,
    /// `ROLLBACK` was rejected.
    RollbackFailed,
}

impl fmt::Display for TransactionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BeginFailed => "begin failed",
            Self::CommitFailed => "commit failed",
            Self::RollbackFailed => "rollback failed",
        };
        f.write_str(label)
    }
}

define_port_error! {
    /// Errors raised by repository adapters.
    pub enum RepositoryError {
        /// A connection could not be obtained or broke during the call.
        Connection { kind: ConnectionErrorKind, message: String } =>
            "database connection {kind}: {message}",
        /// A transaction boundary failed.
        Transaction { kind: TransactionErrorKind, message: String } =>
            "transaction {kind}: {message}",
        /// No record with the identifier exists.
        NotFound { entity: String, id: Uuid } => "{entity} {id} not found",
        /// The input was rejected before any storage access.
        Validation { message: String } => "validation failed: {message}",
        /// A uniqueness constraint rejected the write.
        Conflict { entity: String, message: String } => "{entity} conflict: {message}",
        /// Any other statement failure, tagged with the attempted operation.
        Query { operation: String, message: String } => "{operation}: {message}",
    }
}

impl RepositoryError {
    /// Return true when the error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Port for storing and reading one entity kind.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Insert a new record built from `draft`, returning it as stored.
    async fn store(&self, draft: &E::Draft) -> Result<E, RepositoryError>;

    /// Fetch one record by identifier.
    async fn retrieve(&self, id: Uuid) -> Result<E, RepositoryError>;

    /// Fetch one page of records matching `filters`, ordered by creation time.
    async fn retrieve_page(&self, filters: &E::Filters) -> Result<Page<E>, RepositoryError>;

    /// Overwrite the mutable fields of an existing record.
    async fn update(&self, entity: &E) -> Result<E, RepositoryError>;

    /// Delete one record by identifier.
    async fn remove(&self, id: Uuid) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        RepositoryError::connection(ConnectionErrorKind::Exhausted, "all 4 in use"),
        "database connection exhausted: all 4 in use"
    )]
    #[case(
        RepositoryError::transaction(TransactionErrorKind::CommitFailed, "serialization failure"),
        "transaction commit failed: serialization failure"
    )]
    #[case(
        RepositoryError::query("select book where id=7", "syntax error"),
        "select book where id=7: syntax error"
    )]
    fn messages_carry_kind_and_context(#[case] error: RepositoryError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    fn not_found_is_detectable() {
        let error = RepositoryError::not_found("book", Uuid::nil());
        assert!(error.is_not_found());
        assert!(!RepositoryError::validation("empty name").is_not_found());
    }
}
