//! Shared helpers for the embedded PostgreSQL integration suites.
//!
//! Each suite compiles as its own crate, so not every helper is used by
//! every suite.
#![allow(dead_code)]

pub mod cluster_skip;
pub mod pg_embed;

use std::future::Future;
use std::time::Duration;

use bookshelf::domain::ports::Migrator;
use bookshelf::outbound::persistence::{
    APP_MIGRATIONS, DatabaseTarget, DbPool, MigratorConfig, Namespace, PoolConfig,
    PostgresMigrator,
};
use diesel_migrations::EmbeddedMigrations;
use pg_embedded_setup_unpriv::TemporaryDatabase;
use postgres::{Client, NoTls};
use tokio::runtime::Runtime;
use uuid::Uuid;

pub use cluster_skip::handle_cluster_setup_failure;

/// Render a `postgres` error with its SQLSTATE, detail, and hint.
///
/// The plain `Display` output collapses server errors to `db error`.
pub fn format_postgres_error(error: &postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut summary = format!(
        "postgres error {:?}: {}",
        db_error.code(),
        db_error.message()
    );
    if let Some(detail) = db_error.detail() {
        summary.push_str("; detail: ");
        summary.push_str(detail);
    }
    if let Some(hint) = db_error.hint() {
        summary.push_str("; hint: ");
        summary.push_str(hint);
    }
    summary
}

/// Namespace unique to one test, so suites can share a database.
pub fn unique_namespace(prefix: &str) -> Namespace {
    let suffix = Uuid::new_v4().simple().to_string();
    Namespace::new(format!("{prefix}_{}", &suffix[..12])).expect("generated namespace is valid")
}

/// A throwaway database plus the runtime its async work runs on.
///
/// The sync `postgres` client and cluster bootstrap must run outside the
/// runtime, so tests drive async code through [`TestDatabase::block_on`].
pub struct TestDatabase {
    runtime: Runtime,
    target: DatabaseTarget,
    url: String,
    _database: TemporaryDatabase,
}

impl TestDatabase {
    /// Create a fresh database on the shared cluster.
    ///
    /// Returns `None` when the cluster is unavailable and
    /// `SKIP_TEST_CLUSTER` is set.
    pub fn provision() -> Option<Self> {
        let cluster = match pg_embed::shared_cluster() {
            Ok(cluster) => cluster,
            Err(reason) => return handle_cluster_setup_failure(reason),
        };
        let database = match cluster.create_temporary_database() {
            Ok(database) => database,
            Err(err) => return handle_cluster_setup_failure(format!("{err:?}")),
        };
        let url = database.url().to_owned();
        let target = DatabaseTarget::from_url(&url).expect("cluster url is valid");
        let runtime = Runtime::new().expect("tokio runtime");
        Some(Self {
            runtime,
            target,
            url,
            _database: database,
        })
    }

    pub fn target(&self) -> DatabaseTarget {
        self.target.clone()
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Plain synchronous client for assertions made behind the adapters' backs.
    pub fn client(&self) -> Client {
        Client::connect(&self.url, NoTls)
            .unwrap_or_else(|err| panic!("connect: {}", format_postgres_error(&err)))
    }

    pub fn migrator(&self, namespace: &Namespace) -> PostgresMigrator<EmbeddedMigrations> {
        PostgresMigrator::new(
            APP_MIGRATIONS,
            MigratorConfig::new(self.target(), namespace.clone())
                .with_timeout(Duration::from_secs(60)),
        )
    }

    /// Pool pinned to a freshly migrated namespace.
    pub fn migrated_pool(&self, max_size: u32) -> (Namespace, DbPool) {
        self.migrated_pool_with(max_size, Duration::from_secs(5))
    }

    pub fn migrated_pool_with(&self, max_size: u32, acquire_timeout: Duration) -> (Namespace, DbPool) {
        let namespace = unique_namespace("app");
        let pool = self.block_on(async {
            self.migrator(&namespace)
                .up()
                .await
                .expect("application migrations apply");
            DbPool::new(
                PoolConfig::new(self.target())
                    .with_namespace(namespace.clone())
                    .with_min_size(0)
                    .with_max_size(max_size)
                    .with_acquire_timeout(acquire_timeout),
            )
            .await
            .expect("pool builds")
        });
        (namespace, pool)
    }

    /// Run `sql` outside the pool.
    pub fn execute(&self, sql: &str) {
        self.client()
            .batch_execute(sql)
            .unwrap_or_else(|err| panic!("{sql}: {}", format_postgres_error(&err)));
    }

    /// Row count of `namespace.table`, read outside the pool.
    pub fn count_rows(&self, namespace: &Namespace, table: &str) -> i64 {
        self.scalar(&format!("SELECT count(*) FROM {}.{table}", namespace.quoted()))
    }

    /// True when `namespace.table` exists.
    pub fn table_exists(&self, namespace: &Namespace, table: &str) -> bool {
        let row = self
            .client()
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&namespace.as_str(), &table],
            )
            .unwrap_or_else(|err| panic!("table lookup: {}", format_postgres_error(&err)));
        row.get(0)
    }

    /// Run `sql` outside the pool and return the first column as `i64`.
    pub fn scalar(&self, sql: &str) -> i64 {
        let row = self
            .client()
            .query_one(sql, &[])
            .unwrap_or_else(|err| panic!("{sql}: {}", format_postgres_error(&err)));
        row.get(0)
    }
}
