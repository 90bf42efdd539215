//! Versioned schema migrations tracked per namespace.
//!
//! Scripts come from any Diesel [`MigrationSource`]; the binary embeds
//! [`APP_MIGRATIONS`], tests usually point at a directory. Each script's
//! version is the number formed by the digits in its name prefix
//! (`2024-05-01-000000_create_books` is version `20240501000000`).
//!
//! Applied versions are recorded in `"<ns>"."<ns>_migrations"`. A run
//! applies every script above the highest recorded version, each in its own
//! transaction together with its tracking row, so a failure leaves earlier
//! scripts applied and the failed one pending. Scripts applied by one run
//! share a batch number; `down` reverts the newest batch.
//!
//! Runs for the same namespace are serialised with a PostgreSQL advisory
//! lock held for the lifetime of the migration connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::migration::{Migration, MigrationSource};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use tracing::{info, warn};

use crate::domain::ports::{
    AppliedScript, MigrationError, MigrationOutcome, MigrationRecord, Migrator,
};

use super::namespace::{Namespace, PostgresNamespaceManager};
use super::observer::{ObservedConnection, QueryObserver};
use super::pool::DatabaseTarget;

/// Scripts shipped with the service.
pub const APP_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/app");

/// Default bound on one migration run.
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how long to migrate.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    target: DatabaseTarget,
    namespace: Namespace,
    timeout: Duration,
}

impl MigratorConfig {
    pub fn new(target: DatabaseTarget, namespace: Namespace) -> Self {
        Self {
            target,
            namespace,
            timeout: DEFAULT_MIGRATION_TIMEOUT,
        }
    }

    /// Bound each run, including namespace creation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

/// Parse the digits of a script name prefix into a version number.
///
/// Digits are collected up to the first `_`; separators such as `-` are
/// skipped. Returns `None` when the prefix has no digits or overflows.
pub fn parse_version(name: &str) -> Option<u64> {
    let prefix = name.split('_').next().unwrap_or(name);
    let digits: String = prefix.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

struct Script {
    version: u64,
    name: String,
    migration: Box<dyn Migration<Pg>>,
}

fn load_scripts<S: MigrationSource<Pg>>(source: &S) -> Result<Vec<Script>, MigrationError> {
    let migrations = source
        .migrations()
        .map_err(|err| MigrationError::source(err.to_string()))?;
    let mut scripts = migrations
        .into_iter()
        .map(|migration| {
            let name = migration.name().to_string();
            let version =
                parse_version(&name).ok_or_else(|| MigrationError::invalid_version(name.clone()))?;
            Ok(Script {
                version,
                name,
                migration,
            })
        })
        .collect::<Result<Vec<_>, MigrationError>>()?;
    scripts.sort_by_key(|script| script.version);
    for pair in scripts.windows(2) {
        if let [first, second] = pair {
            if first.version == second.version {
                return Err(MigrationError::duplicate_version(
                    first.version,
                    first.name.clone(),
                    second.name.clone(),
                ));
            }
        }
    }
    Ok(scripts)
}

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("{0}")]
    Script(Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

#[derive(QueryableByName)]
struct Watermark {
    #[diesel(sql_type = Nullable<BigInt>)]
    version: Option<i64>,
}

#[derive(QueryableByName)]
struct NextBatch {
    #[diesel(sql_type = Integer)]
    batch: i32,
}

#[derive(QueryableByName)]
struct TrackingRow {
    #[diesel(sql_type = BigInt)]
    version: i64,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Integer)]
    batch: i32,
    #[diesel(sql_type = Timestamptz)]
    applied_at: DateTime<Utc>,
}

fn tracking_error(err: &diesel::result::Error) -> MigrationError {
    MigrationError::tracking(err.to_string())
}

fn db_version(version: u64) -> Result<i64, MigrationError> {
    i64::try_from(version)
        .map_err(|_| MigrationError::tracking(format!("version {version} exceeds BIGINT")))
}

fn record_version(row: &TrackingRow) -> Result<u64, MigrationError> {
    u64::try_from(row.version)
        .map_err(|_| MigrationError::tracking(format!("negative version {} recorded", row.version)))
}

/// Stable advisory lock key for a namespace (FNV-1a over the name).
fn lock_key(namespace: &Namespace) -> i64 {
    let hash = namespace
        .as_str()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |acc, byte| {
            (acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
    i64::from_be_bytes(hash.to_be_bytes())
}

/// Synchronous session holding the migration connection and lock.
struct Session {
    conn: PgConnection,
    table: String,
}

impl Session {
    fn open(
        target: &DatabaseTarget,
        namespace: &Namespace,
        observer: Option<Arc<dyn QueryObserver>>,
    ) -> Result<Self, MigrationError> {
        let mut conn = PgConnection::establish(target.url())
            .map_err(|err| MigrationError::connection(err.to_string()))?;
        if let Some(observer) = observer {
            conn.set_instrumentation(ObservedConnection::new(observer, target.meta().clone()));
        }
        conn.batch_execute(&namespace.search_path_sql())
            .map_err(|err| MigrationError::connection(err.to_string()))?;
        diesel::sql_query("SELECT pg_advisory_lock($1)")
            .bind::<BigInt, _>(lock_key(namespace))
            .execute(&mut conn)
            .map_err(|err| MigrationError::connection(err.to_string()))?;

        let table = namespace.migrations_table();
        conn.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                version BIGINT PRIMARY KEY, \
                name TEXT NOT NULL, \
                batch INTEGER NOT NULL, \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now())"
        ))
        .map_err(|err| tracking_error(&err))?;

        Ok(Self { conn, table })
    }

    fn watermark(&mut self) -> Result<Option<u64>, MigrationError> {
        let row: Watermark = diesel::sql_query(format!("SELECT MAX(version) AS version FROM {}", self.table))
            .get_result(&mut self.conn)
            .map_err(|err| tracking_error(&err))?;
        row.version
            .map(|version| {
                u64::try_from(version).map_err(|_| {
                    MigrationError::tracking(format!("negative version {version} recorded"))
                })
            })
            .transpose()
    }

    fn next_batch(&mut self) -> Result<i32, MigrationError> {
        let row: NextBatch = diesel::sql_query(format!(
            "SELECT COALESCE(MAX(batch), 0) + 1 AS batch FROM {}",
            self.table
        ))
        .get_result(&mut self.conn)
        .map_err(|err| tracking_error(&err))?;
        Ok(row.batch)
    }

    fn records(&mut self) -> Result<Vec<TrackingRow>, MigrationError> {
        diesel::sql_query(format!(
            "SELECT version, name, batch, applied_at FROM {} ORDER BY version",
            self.table
        ))
        .load(&mut self.conn)
        .map_err(|err| tracking_error(&err))
    }

    fn last_batch(&mut self) -> Result<Vec<TrackingRow>, MigrationError> {
        diesel::sql_query(format!(
            "SELECT version, name, batch, applied_at FROM {0} \
             WHERE batch = (SELECT MAX(batch) FROM {0}) ORDER BY version DESC",
            self.table
        ))
        .load(&mut self.conn)
        .map_err(|err| tracking_error(&err))
    }

    fn up(&mut self, scripts: &[Script]) -> Result<MigrationOutcome, MigrationError> {
        let watermark = self.watermark()?;
        let pending: Vec<&Script> = scripts
            .iter()
            .filter(|script| watermark.is_none_or(|applied| script.version > applied))
            .collect();
        if pending.is_empty() {
            info!(watermark, "no pending migrations");
            return Ok(MigrationOutcome::NoChange);
        }

        let batch = self.next_batch()?;
        let mut applied = Vec::with_capacity(pending.len());
        for script in pending {
            info!(version = script.version, name = %script.name, batch, "applying migration");
            self.apply(script, batch).map_err(|err| {
                warn!(version = script.version, name = %script.name, error = %err, "migration failed");
                MigrationError::failed(script.version, script.name.clone(), err.to_string())
            })?;
            applied.push(AppliedScript::new(script.version, script.name.clone()));
        }
        Ok(MigrationOutcome::Applied(applied))
    }

    fn apply(&mut self, script: &Script, batch: i32) -> Result<(), StepError> {
        let version = db_version(script.version).map_err(|err| StepError::Script(Box::new(err)))?;
        let insert = format!(
            "INSERT INTO {} (version, name, batch) VALUES ($1, $2, $3)",
            self.table
        );
        let step = |conn: &mut PgConnection| -> Result<(), StepError> {
            script.migration.run(conn).map_err(StepError::Script)?;
            diesel::sql_query(&insert)
                .bind::<BigInt, _>(version)
                .bind::<Text, _>(&script.name)
                .bind::<Integer, _>(batch)
                .execute(conn)?;
            Ok(())
        };
        if script.migration.metadata().run_in_transaction() {
            self.conn.transaction(step)
        } else {
            step(&mut self.conn)
        }
    }

    fn down(&mut self, scripts: &[Script]) -> Result<MigrationOutcome, MigrationError> {
        let rows = self.last_batch()?;
        if rows.is_empty() {
            info!("no applied migrations to revert");
            return Ok(MigrationOutcome::NoChange);
        }

        let mut targets = Vec::with_capacity(rows.len());
        for row in &rows {
            let version = record_version(row)?;
            let script = scripts
                .iter()
                .find(|script| script.version == version)
                .ok_or_else(|| MigrationError::missing_script(version, row.name.clone()))?;
            targets.push(script);
        }

        let mut reverted = Vec::with_capacity(targets.len());
        for script in targets {
            info!(version = script.version, name = %script.name, "reverting migration");
            self.revert(script).map_err(|err| {
                MigrationError::revert_failed(script.version, script.name.clone(), err.to_string())
            })?;
            reverted.push(AppliedScript::new(script.version, script.name.clone()));
        }
        Ok(MigrationOutcome::Reverted(reverted))
    }

    fn revert(&mut self, script: &Script) -> Result<(), StepError> {
        let version = db_version(script.version).map_err(|err| StepError::Script(Box::new(err)))?;
        let delete = format!("DELETE FROM {} WHERE version = $1", self.table);
        let step = |conn: &mut PgConnection| -> Result<(), StepError> {
            script.migration.revert(conn).map_err(StepError::Script)?;
            diesel::sql_query(&delete)
                .bind::<BigInt, _>(version)
                .execute(conn)?;
            Ok(())
        };
        if script.migration.metadata().run_in_transaction() {
            self.conn.transaction(step)
        } else {
            step(&mut self.conn)
        }
    }

    fn applied(&mut self) -> Result<Vec<MigrationRecord>, MigrationError> {
        self.records()?
            .into_iter()
            .map(|row| {
                Ok(MigrationRecord {
                    version: record_version(&row)?,
                    name: row.name,
                    batch: row.batch,
                    applied_at: row.applied_at,
                })
            })
            .collect()
    }
}

/// Diesel-backed [`Migrator`].
///
/// Migration scripts run on a dedicated blocking connection outside the
/// pool. The configured timeout bounds the whole run; on expiry the caller
/// gets [`MigrationError::Timeout`] while the blocking thread finishes or
/// fails on its own, and its advisory lock is released when its connection
/// closes.
pub struct PostgresMigrator<S> {
    source: Arc<S>,
    config: MigratorConfig,
    namespaces: PostgresNamespaceManager,
    observer: Option<Arc<dyn QueryObserver>>,
}

impl<S> PostgresMigrator<S>
where
    S: MigrationSource<Pg> + Send + Sync + 'static,
{
    pub fn new(source: S, config: MigratorConfig) -> Self {
        let namespaces =
            PostgresNamespaceManager::new(config.target.clone()).with_timeout(config.timeout);
        Self {
            source: Arc::new(source),
            config,
            namespaces,
            observer: None,
        }
    }

    /// Report migration statements to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    async fn run<T, F>(&self, step: F) -> Result<T, MigrationError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session, &[Script]) -> Result<T, MigrationError> + Send + 'static,
    {
        let timeout = self.config.timeout;
        let work = async {
            self.namespaces
                .create_if_not_exists(&self.config.namespace)
                .await
                .map_err(|err| MigrationError::schema(err.to_string()))?;

            let source = Arc::clone(&self.source);
            let target = self.config.target.clone();
            let namespace = self.config.namespace.clone();
            let observer = self.observer.clone();
            tokio::task::spawn_blocking(move || {
                let scripts = load_scripts(source.as_ref())?;
                let mut session = Session::open(&target, &namespace, observer)?;
                step(&mut session, &scripts)
            })
            .await
            .map_err(|err| MigrationError::aborted(err.to_string()))?
        };
        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| MigrationError::timeout(timeout))?
    }
}

#[async_trait::async_trait]
impl<S> Migrator for PostgresMigrator<S>
where
    S: MigrationSource<Pg> + Send + Sync + 'static,
{
    async fn up(&self) -> Result<MigrationOutcome, MigrationError> {
        let namespace = self.config.namespace.to_string();
        let outcome = self.run(|session, scripts| session.up(scripts)).await?;
        info!(
            namespace,
            applied = outcome.scripts().len(),
            "migration run finished"
        );
        Ok(outcome)
    }

    async fn down(&self) -> Result<MigrationOutcome, MigrationError> {
        let namespace = self.config.namespace.to_string();
        let outcome = self.run(|session, scripts| session.down(scripts)).await?;
        info!(
            namespace,
            reverted = outcome.scripts().len(),
            "migration rollback finished"
        );
        Ok(outcome)
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        self.run(|session, _| session.applied()).await
    }
}
