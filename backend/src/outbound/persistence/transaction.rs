//! Transaction scope over one pooled connection.
//!
//! [`DbPool::begin`] checks out a connection and issues `BEGIN`; the
//! returned [`Transaction`] owns that connection until it commits or rolls
//! back. Both consume the guard, so a transaction ends exactly once.
//!
//! A guard dropped while still open may have been cut off mid-statement, so
//! its connection is never reused: a bounded rollback runs on a background
//! task and the connection is then marked broken for the pool to discard.

use std::fmt;
use std::time::Duration;

use diesel_async::{AnsiTransactionManager, AsyncPgConnection, TransactionManager};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::pool::{ConnectionError, DbPool, PooledPgConnection};

/// Bound on the background rollback of an abandoned transaction.
pub const DROP_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

const SNAPSHOT_BEGIN: &str = "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY";

/// Errors raised at transaction boundaries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// No connection could be checked out.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("cannot begin transaction: {message}")]
    BeginFailed { message: String },

    /// The transaction did not persist.
    #[error("cannot commit transaction: {message}")]
    CommitFailed { message: String },

    #[error("cannot roll back transaction: {message}")]
    RollbackFailed { message: String },
}

/// An open database transaction.
///
/// Exactly one terminal transition happens: [`Transaction::commit`],
/// [`Transaction::rollback`], or the rollback issued on drop.
pub struct Transaction {
    conn: Option<PooledPgConnection>,
    read_only: bool,
}

impl DbPool {
    /// Check out a connection and begin a transaction on it.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Connection` when checkout fails and
    /// `TransactionError::BeginFailed` when `BEGIN` is rejected. The
    /// connection is released before either error is returned.
    pub async fn begin(&self) -> Result<Transaction, TransactionError> {
        let conn = self.acquire().await?;
        Transaction::start(conn, None).await
    }

    /// [`DbPool::begin`] with an explicit checkout deadline.
    ///
    /// # Errors
    ///
    /// See [`DbPool::begin`].
    pub async fn begin_within(&self, deadline: Duration) -> Result<Transaction, TransactionError> {
        let conn = self.acquire_within(deadline).await?;
        Transaction::start(conn, None).await
    }

    /// Begin a read-only `REPEATABLE READ` transaction.
    ///
    /// Every statement inside sees the same snapshot, so reads that must
    /// agree with each other (a count and the page it describes) do.
    ///
    /// # Errors
    ///
    /// See [`DbPool::begin`].
    pub async fn begin_snapshot(&self) -> Result<Transaction, TransactionError> {
        let conn = self.acquire().await?;
        Transaction::start(conn, Some(SNAPSHOT_BEGIN)).await
    }
}

impl Transaction {
    async fn start(
        mut conn: PooledPgConnection,
        begin_sql: Option<&str>,
    ) -> Result<Self, TransactionError> {
        let begun = match begin_sql {
            Some(sql) => AnsiTransactionManager::begin_transaction_sql(&mut *conn, sql).await,
            None => AnsiTransactionManager::begin_transaction(&mut *conn).await,
        };
        begun.map_err(|err| TransactionError::BeginFailed {
            message: err.to_string(),
        })?;
        Ok(Self {
            conn: Some(conn),
            read_only: begin_sql.is_some(),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Connection to run statements on while the transaction is open.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::Connection` if the guard no longer holds
    /// its connection.
    pub fn conn(&mut self) -> Result<&mut AsyncPgConnection, TransactionError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| ConnectionError::broken("transaction connection already released").into())
    }

    /// Commit and release the connection.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::CommitFailed` when `COMMIT` is rejected;
    /// the transaction is then rolled back.
    pub async fn commit(mut self) -> Result<(), TransactionError> {
        let mut conn = self.release()?;
        AnsiTransactionManager::commit_transaction(&mut *conn)
            .await
            .map_err(|err| TransactionError::CommitFailed {
                message: err.to_string(),
            })
    }

    /// Roll back and release the connection.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::RollbackFailed` when `ROLLBACK` is
    /// rejected; the connection is then discarded instead of reused.
    pub async fn rollback(mut self) -> Result<(), TransactionError> {
        let mut conn = self.release()?;
        AnsiTransactionManager::rollback_transaction(&mut *conn)
            .await
            .map_err(|err| TransactionError::RollbackFailed {
                message: err.to_string(),
            })
    }

    fn release(&mut self) -> Result<PooledPgConnection, TransactionError> {
        self.conn
            .take()
            .ok_or_else(|| ConnectionError::broken("transaction connection already released").into())
    }
}

/// Mark `conn` so the pool drops it on release instead of recycling it.
fn mark_broken(conn: &mut AsyncPgConnection) {
    AnsiTransactionManager::transaction_manager_status_mut(conn).set_in_error();
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            warn!("transaction dropped outside a runtime; discarding its connection");
            mark_broken(&mut conn);
            return;
        };
        handle.spawn(async move {
            let rollback = AnsiTransactionManager::rollback_transaction(&mut *conn);
            match tokio::time::timeout(DROP_ROLLBACK_TIMEOUT, rollback).await {
                Ok(Ok(())) => debug!("abandoned transaction rolled back"),
                Ok(Err(error)) => warn!(%error, "abandoned transaction rollback failed"),
                Err(_) => warn!(
                    timeout = ?DROP_ROLLBACK_TIMEOUT,
                    "abandoned transaction rollback timed out"
                ),
            }
            mark_broken(&mut conn);
        });
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("open", &self.conn.is_some())
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}
