//! Named PostgreSQL schemas used to isolate an application's tables.
//!
//! Each call opens its own short-lived connection so namespace management
//! works before any pool exists and never competes with pooled traffic.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use diesel::QueryableByName;
use diesel::sql_types::{Bool, Text};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use tracing::info;

use super::pool::DatabaseTarget;

/// Longest accepted namespace name, leaving room for the `_migrations`
/// suffix within PostgreSQL's 63-byte identifier limit.
pub const NAMESPACE_MAX_LEN: usize = 52;

/// Deadline applied to each namespace operation unless overridden.
pub const DEFAULT_NAMESPACE_TIMEOUT: Duration = Duration::from_secs(4);

/// Errors raised by namespace validation and management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The name is not a plain lower-case identifier.
    #[error("invalid namespace {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The management connection could not be opened.
    #[error("cannot connect to manage namespaces: {message}")]
    Connect { message: String },

    /// The server rejected a namespace statement.
    #[error("namespace {namespace} statement failed: {message}")]
    Statement { namespace: String, message: String },

    /// The operation did not finish in time.
    #[error("namespace operation exceeded {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Validated schema name.
///
/// Names start with a lower-case letter or underscore and continue with
/// lower-case letters, digits, or underscores, so they can be quoted into
/// DDL without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Validate `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidName`] for empty, overlong, or
    /// non-identifier names.
    pub fn new(name: impl Into<String>) -> Result<Self, SchemaError> {
        let name = name.into();
        let invalid = |reason| SchemaError::InvalidName {
            name: name.clone(),
            reason,
        };
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(invalid("must not be empty"));
        };
        if name.len() > NAMESPACE_MAX_LEN {
            return Err(invalid("longer than 52 bytes"));
        }
        if !(first.is_ascii_lowercase() || first == '_') {
            return Err(invalid("must start with a lower-case letter or underscore"));
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(invalid("may only contain lower-case letters, digits, or underscores"));
        }
        if name.starts_with("pg_") {
            return Err(invalid("the pg_ prefix is reserved"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted identifier for use in SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Qualified, quoted name of the tracking table for this namespace.
    pub fn migrations_table(&self) -> String {
        format!("\"{0}\".\"{0}_migrations\"", self.0)
    }

    pub(crate) fn search_path_sql(&self) -> String {
        format!("SET search_path TO {}", self.quoted())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = SchemaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

#[derive(QueryableByName)]
struct Presence {
    #[diesel(sql_type = Bool)]
    present: bool,
}

/// Creates, drops, and inspects namespaces.
#[derive(Debug, Clone)]
pub struct PostgresNamespaceManager {
    target: DatabaseTarget,
    timeout: Duration,
}

impl PostgresNamespaceManager {
    pub fn new(target: DatabaseTarget) -> Self {
        Self {
            target,
            timeout: DEFAULT_NAMESPACE_TIMEOUT,
        }
    }

    /// Override the per-operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create `namespace` unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the connection, statement, or deadline
    /// fails.
    pub async fn create_if_not_exists(&self, namespace: &Namespace) -> Result<(), SchemaError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", namespace.quoted());
        self.execute(namespace, &sql).await?;
        info!(namespace = namespace.as_str(), "namespace ensured");
        Ok(())
    }

    /// Drop `namespace` and everything in it, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the connection, statement, or deadline
    /// fails.
    pub async fn drop_if_exists(&self, namespace: &Namespace) -> Result<(), SchemaError> {
        let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", namespace.quoted());
        self.execute(namespace, &sql).await?;
        info!(namespace = namespace.as_str(), "namespace dropped");
        Ok(())
    }

    /// Report whether `namespace` exists.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the connection, query, or deadline
    /// fails.
    pub async fn exists(&self, namespace: &Namespace) -> Result<bool, SchemaError> {
        self.within(async {
            let mut conn = self.connect().await?;
            diesel::sql_query(
                "SELECT EXISTS (SELECT 1 FROM information_schema.schemata \
                 WHERE schema_name = $1) AS present",
            )
            .bind::<Text, _>(namespace.as_str())
            .get_result::<Presence>(&mut conn)
            .await
            .map(|row| row.present)
            .map_err(|err| statement_error(namespace, &err))
        })
        .await
    }

    async fn execute(&self, namespace: &Namespace, sql: &str) -> Result<(), SchemaError> {
        self.within(async {
            let mut conn = self.connect().await?;
            conn.batch_execute(sql)
                .await
                .map_err(|err| statement_error(namespace, &err))
        })
        .await
    }

    async fn connect(&self) -> Result<AsyncPgConnection, SchemaError> {
        AsyncPgConnection::establish(self.target.url())
            .await
            .map_err(|err| SchemaError::Connect {
                message: err.to_string(),
            })
    }

    async fn within<T>(
        &self,
        operation: impl Future<Output = Result<T, SchemaError>>,
    ) -> Result<T, SchemaError> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| SchemaError::Timeout {
                timeout: self.timeout,
            })?
    }
}

fn statement_error(namespace: &Namespace, err: &diesel::result::Error) -> SchemaError {
    SchemaError::Statement {
        namespace: namespace.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("app")]
    #[case("_staging")]
    #[case("tenant_42")]
    fn plain_identifiers_are_accepted(#[case] name: &str) {
        let namespace = Namespace::new(name).expect("valid namespace");
        assert_eq!(namespace.as_str(), name);
    }

    #[rstest]
    #[case("", "empty")]
    #[case("App", "start with")]
    #[case("9lives", "start with")]
    #[case("app-data", "may only contain")]
    #[case("app\"; DROP SCHEMA public; --", "may only contain")]
    #[case("pg_catalog", "reserved")]
    fn unsafe_names_are_rejected(#[case] name: &str, #[case] fragment: &str) {
        let err = Namespace::new(name).expect_err("namespace should be rejected");
        assert!(err.to_string().contains(fragment), "{err}");
    }

    #[rstest]
    fn overlong_names_are_rejected() {
        let name = "a".repeat(NAMESPACE_MAX_LEN + 1);
        assert!(Namespace::new(name).is_err());
        assert!(Namespace::new("a".repeat(NAMESPACE_MAX_LEN)).is_ok());
    }

    #[rstest]
    fn sql_fragments_are_quoted() {
        let namespace: Namespace = "library".parse().expect("valid namespace");
        assert_eq!(namespace.quoted(), "\"library\"");
        assert_eq!(
            namespace.migrations_table(),
            "\"library\".\"library_migrations\""
        );
        assert_eq!(namespace.search_path_sql(), "SET search_path TO \"library\"");
    }
}
