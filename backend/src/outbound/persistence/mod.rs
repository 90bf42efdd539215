//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! This module provides the connection pool, transaction scope, namespace
//! management, migrations, and the repository adapters built on them,
//! backed by PostgreSQL via `diesel-async` and `bb8`.
//!
//! # Architecture
//!
//! - **Thin adapters**: Repository implementations only translate between
//!   Diesel models and domain types. No business logic resides here.
//! - **Internal models**: Diesel row structs (`models.rs`) and schema
//!   definitions (`schema.rs`) never leave this module.
//! - **One transaction per call**: Every repository operation checks out a
//!   connection, runs inside a [`Transaction`], and releases it before
//!   returning.
//! - **Namespaced tables**: Pooled connections pin their `search_path` to
//!   the configured [`Namespace`]; migrations track versions inside it.
//!
//! # Example
//!
//! ```ignore
//! use bookshelf::outbound::persistence::{DbPool, DieselBookRepository, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new(target).with_namespace(namespace)).await?;
//! let books = DieselBookRepository::new(pool);
//! ```

mod diesel_basic_error_mapping;
mod diesel_book_repository;
mod diesel_helpers;
mod diesel_user_repository;
mod migrator;
mod models;
mod namespace;
mod observer;
mod pool;
mod schema;
mod transaction;

pub use diesel_basic_error_mapping::map_diesel_error;
pub use diesel_book_repository::DieselBookRepository;
pub use diesel_helpers::contains_pattern;
pub use diesel_user_repository::DieselUserRepository;
pub use migrator::{
    APP_MIGRATIONS, DEFAULT_MIGRATION_TIMEOUT, MigratorConfig, PostgresMigrator, parse_version,
};
pub use namespace::{
    DEFAULT_NAMESPACE_TIMEOUT, NAMESPACE_MAX_LEN, Namespace, PostgresNamespaceManager, SchemaError,
};
pub use observer::{ConnectionMeta, QueryObserver, TracingQueryObserver};
pub use pool::{
    ConnectionError, DEFAULT_PORT, DatabaseTarget, DbPool, PoolConfig, PoolError, PoolStatus,
    PooledPgConnection, SslMode,
};
pub use transaction::{DROP_ROLLBACK_TIMEOUT, Transaction, TransactionError};
