//! Startup orchestration: migrate, then open the pool.
//!
//! The service only starts serving once the namespace is fully migrated and
//! the pool has answered a ping. Any failure here is fatal.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{PostgresSettings, SettingsError};
use crate::domain::ports::{MigrationError, MigrationOutcome, Migrator};
use crate::outbound::persistence::{
    APP_MIGRATIONS, ConnectionError, DbPool, PoolError, PostgresMigrator, QueryObserver,
};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid database settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("schema migration failed: {0}")]
    Migration(#[from] MigrationError),
    #[error("{0}")]
    Pool(#[from] PoolError),
    #[error("database unreachable: {0}")]
    Connection(#[from] ConnectionError),
}

/// Bring the schema up to date, logging what changed.
///
/// # Errors
///
/// Returns [`StartupError::Migration`] when any script fails; scripts
/// applied before the failure stay applied.
pub async fn run_migrations(migrator: &dyn Migrator) -> Result<MigrationOutcome, StartupError> {
    let outcome = migrator.up().await?;
    match &outcome {
        MigrationOutcome::NoChange => info!("database schema is up to date"),
        MigrationOutcome::Applied(scripts) => {
            for script in scripts {
                info!(version = script.version, name = %script.name, "migration applied");
            }
            info!(count = scripts.len(), "database schema migrated");
        }
        MigrationOutcome::Reverted(scripts) => {
            info!(count = scripts.len(), "unexpected revert during startup migration");
        }
    }
    Ok(outcome)
}

/// Migrate the application namespace, then open and verify the pool.
///
/// # Errors
///
/// Returns [`StartupError`] for invalid settings, failed migrations, or a
/// pool that cannot reach the database.
pub async fn prepare_database(
    settings: &PostgresSettings,
    observer: Option<Arc<dyn QueryObserver>>,
) -> Result<DbPool, StartupError> {
    let mut migrator = PostgresMigrator::new(APP_MIGRATIONS, settings.migrator_config()?);
    if let Some(observer) = &observer {
        migrator = migrator.with_observer(Arc::clone(observer));
    }
    run_migrations(&migrator).await?;

    let pool = DbPool::new(settings.pool_config(observer)?).await?;
    pool.ping().await?;
    info!(status = ?pool.status(), "database ready");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{AppliedScript, MockMigrator};
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn applied_scripts_are_reported() {
        let mut migrator = MockMigrator::new();
        migrator.expect_up().times(1).returning(|| {
            Ok(MigrationOutcome::Applied(vec![AppliedScript::new(
                1,
                "0001_create_books",
            )]))
        });

        let outcome = run_migrations(&migrator).await.expect("migration succeeds");

        assert_eq!(outcome.scripts().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn up_to_date_schema_is_not_an_error() {
        let mut migrator = MockMigrator::new();
        migrator
            .expect_up()
            .times(1)
            .returning(|| Ok(MigrationOutcome::NoChange));

        let outcome = run_migrations(&migrator).await.expect("migration succeeds");

        assert_eq!(outcome, MigrationOutcome::NoChange);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_script_aborts_startup() {
        let mut migrator = MockMigrator::new();
        migrator.expect_up().times(1).returning(|| {
            Err(MigrationError::failed(
                2_u64,
                "0002_create_users",
                "relation \"users\" already exists",
            ))
        });

        let err = run_migrations(&migrator).await.expect_err("startup should fail");

        assert!(matches!(
            err,
            StartupError::Migration(MigrationError::Failed { version: 2, .. })
        ));
        assert!(err.to_string().starts_with("schema migration failed"));
    }

    #[rstest]
    #[tokio::test]
    async fn down_is_never_called_on_startup() {
        let mut migrator = MockMigrator::new();
        migrator
            .expect_up()
            .returning(|| Ok(MigrationOutcome::NoChange));
        migrator.expect_down().never();

        run_migrations(&migrator).await.expect("migration succeeds");
    }
}
