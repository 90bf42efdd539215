//! Port for applying and reverting versioned schema scripts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;

/// One script touched by a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedScript {
    /// Numeric version parsed from the script name.
    pub version: u64,
    /// Full script name, version prefix included.
    pub name: String,
}

impl AppliedScript {
    /// Build a record for `version` and `name`.
    pub fn new(version: u64, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
        }
    }
}

/// Row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Applied version.
    pub version: u64,
    /// Script name at the time it ran.
    pub name: String,
    /// Batch shared by every script applied in the same run.
    pub batch: i32,
    /// When the script finished.
    pub applied_at: DateTime<Utc>,
}

/// Result of a successful migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing was pending (or nothing was left to revert).
    NoChange,
    /// Scripts applied in ascending version order.
    Applied(Vec<AppliedScript>),
    /// Scripts reverted in descending version order.
    Reverted(Vec<AppliedScript>),
}

impl MigrationOutcome {
    /// Scripts touched by the run, empty for [`MigrationOutcome::NoChange`].
    pub fn scripts(&self) -> &[AppliedScript] {
        match self {
            Self::NoChange => &[],
            Self::Applied(scripts) | Self::Reverted(scripts) => scripts,
        }
    }
}

define_port_error! {
    /// Errors raised while migrating a namespace.
    pub enum MigrationError {
        /// The namespace could not be created.
        Schema { message: String } => "cannot prepare namespace: {message}",
        /// The migration connection could not be opened or configured.
        Connection { message: String } => "migration connection failed: {message}",
        /// Scripts could not be read from their source.
        Source { message: String } => "cannot load migration scripts: {message}",
        /// A script name carries no digits to use as its version.
        InvalidVersion { name: String } => "migration {name} has no numeric version prefix",
        /// Two scripts share one version.
        DuplicateVersion { version: u64, first: String, second: String } =>
            "migrations {first} and {second} share version {version}",
        /// The tracking table could not be read or written.
        Tracking { message: String } => "migration tracking failed: {message}",
        /// A script failed while applying; it and every later script stay pending.
        Failed { version: u64, name: String, message: String } =>
            "migration {version} ({name}) failed: {message}",
        /// A script failed while reverting; it stays recorded.
        RevertFailed { version: u64, name: String, message: String } =>
            "reverting migration {version} ({name}) failed: {message}",
        /// A recorded version has no script to revert it with.
        MissingScript { version: u64, name: String } =>
            "recorded migration {version} ({name}) has no matching script",
        /// The run did not finish within the configured bound.
        Timeout { timeout: Duration } => "migration run exceeded {timeout:?}",
        /// The background migration task stopped unexpectedly.
        Aborted { message: String } => "migration task aborted: {message}",
    }
}

/// Port driving schema migrations for one namespace.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Apply every script newer than the highest recorded version.
    async fn up(&self) -> Result<MigrationOutcome, MigrationError>;

    /// Revert the most recently applied batch.
    async fn down(&self) -> Result<MigrationOutcome, MigrationError>;

    /// List tracking rows in ascending version order.
    async fn applied(&self) -> Result<Vec<MigrationRecord>, MigrationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn no_change_has_no_scripts() {
        assert!(MigrationOutcome::NoChange.scripts().is_empty());
    }

    #[rstest]
    fn applied_lists_scripts_in_order() {
        let outcome = MigrationOutcome::Applied(vec![
            AppliedScript::new(1, "0001_books"),
            AppliedScript::new(2, "0002_users"),
        ]);
        let versions: Vec<u64> = outcome.scripts().iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[rstest]
    fn failure_names_the_script() {
        let error = MigrationError::failed(3_u64, "0003_broken", "syntax error at or near \"TABL\"");
        assert_eq!(
            error.to_string(),
            "migration 3 (0003_broken) failed: syntax error at or near \"TABL\""
        );
    }

    #[rstest]
    #[case(Duration::from_millis(250), "migration run exceeded 250ms")]
    #[case(Duration::from_secs(90), "migration run exceeded 90s")]
    fn timeout_reports_the_configured_bound(#[case] bound: Duration, #[case] expected: &str) {
        assert_eq!(MigrationError::timeout(bound).to_string(), expected);
    }
}
