//! Async-safe connection pool for Diesel PostgreSQL connections.
//!
//! This module wraps `diesel-async` and `bb8` to provide the pooled
//! connections every repository borrows from. The pool manages connection
//! lifetime, validation, and bounded checkout.
//!
//! # Design
//!
//! - Connections are established through a setup hook that pins the
//!   `search_path` to the configured namespace and attaches the query
//!   observer, so every pooled connection behaves the same way.
//! - Checkout is bounded by a deadline. A caller deadline that passes is a
//!   `Timeout`; the pool's own bound running out while every connection is
//!   checked out is `Exhausted`.
//! - Connections are validated on checkout and reaped when idle or old.
//! - Connections returned with an open or failed transaction are discarded
//!   rather than reused.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use diesel::ConnectionResult;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection, RunError};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig, RecyclingMethod};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

use super::namespace::Namespace;
use super::observer::{ConnectionMeta, ObservedConnection, QueryObserver};

/// Port used when none is given.
pub const DEFAULT_PORT: u16 = 5432;

/// Owned pooled connection, returned to the pool on drop.
pub type PooledPgConnection = PooledConnection<'static, AsyncPgConnection>;

/// Errors raised while configuring or building the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The configuration is inconsistent.
    #[error("invalid pool configuration: {message}")]
    Config { message: String },

    /// Failed to build the connection pool.
    #[error("failed to build connection pool: {message}")]
    Build { message: String },
}

impl PoolError {
    /// Create a configuration error with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a build error with the given message.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

/// Errors raised while checking out or using a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The checkout deadline passed before a connection was handed out.
    #[error("no connection available after {waited:?}")]
    Timeout { waited: Duration },

    /// The pool's own checkout bound ran out while every connection was
    /// checked out.
    #[error("connection pool exhausted: all {max_size} connections in use")]
    Exhausted { max_size: u32 },

    /// The connection could not be established or failed during use.
    #[error("database connection broken: {message}")]
    Broken { message: String },
}

impl ConnectionError {
    pub fn broken(message: impl Into<String>) -> Self {
        Self::Broken {
            message: message.into(),
        }
    }
}

/// TLS negotiation mode passed to the server as `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Allow => "allow",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Value understood by the driver's URL parser, which only knows
    /// `disable`, `prefer`, and `require`.
    fn driver_value(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Allow | Self::Prefer => "prefer",
            Self::Require | Self::VerifyCa | Self::VerifyFull => "require",
        }
    }
}

impl FromStr for SslMode {
    type Err = PoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(PoolError::config(format!("unknown sslmode {other:?}"))),
        }
    }
}

/// Connection parameters for one database.
///
/// Holds the full connection URL, password included, in memory that is
/// zeroed on drop. `Debug` output only shows [`ConnectionMeta`].
#[derive(Clone)]
pub struct DatabaseTarget {
    url: Zeroizing<String>,
    meta: ConnectionMeta,
}

impl DatabaseTarget {
    /// Build a target from individual parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] when the host or credentials cannot be
    /// encoded into a connection URL.
    pub fn from_parts(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        database: &str,
        ssl_mode: SslMode,
    ) -> Result<Self, PoolError> {
        let mut url = Url::parse("postgres://localhost")
            .map_err(|err| PoolError::config(err.to_string()))?;
        url.set_host(Some(host))
            .map_err(|err| PoolError::config(format!("invalid host {host:?}: {err}")))?;
        url.set_port(Some(port))
            .map_err(|()| PoolError::config("cannot set port"))?;
        url.set_username(user)
            .map_err(|()| PoolError::config("cannot set user"))?;
        if !password.is_empty() {
            url.set_password(Some(password))
                .map_err(|()| PoolError::config("cannot set password"))?;
        }
        url.set_path(database);
        url.query_pairs_mut()
            .append_pair("sslmode", ssl_mode.driver_value());

        Ok(Self {
            url: Zeroizing::new(url.into()),
            meta: ConnectionMeta {
                host: host.to_owned(),
                port,
                user: user.to_owned(),
                database: database.to_owned(),
            },
        })
    }

    /// Wrap an existing `postgres://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] when the URL does not parse or uses
    /// another scheme.
    pub fn from_url(raw: &str) -> Result<Self, PoolError> {
        let url = Url::parse(raw).map_err(|err| PoolError::config(format!("invalid database url: {err}")))?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(PoolError::config(format!(
                "unsupported database url scheme {:?}",
                url.scheme()
            )));
        }
        let meta = ConnectionMeta {
            host: url.host_str().unwrap_or("localhost").to_owned(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            user: url.username().to_owned(),
            database: url.path().trim_start_matches('/').to_owned(),
        };
        Ok(Self {
            url: Zeroizing::new(raw.to_owned()),
            meta,
        })
    }

    /// Connection URL including credentials.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Configuration for the database connection pool.
///
/// # Example
///
/// ```ignore
/// let config = PoolConfig::new(target)
///     .with_namespace(Namespace::new("app")?)
///     .with_max_size(20)
///     .with_acquire_timeout(Duration::from_secs(2));
/// ```
#[derive(Clone)]
pub struct PoolConfig {
    target: DatabaseTarget,
    namespace: Option<Namespace>,
    observer: Option<Arc<dyn QueryObserver>>,
    min_size: u32,
    max_size: u32,
    max_lifetime: Duration,
    max_idle_time: Duration,
    health_check_period: Duration,
    acquire_timeout: Duration,
}

impl PoolConfig {
    /// Create a configuration for `target`.
    ///
    /// Defaults:
    /// - `min_size`: 2 connections
    /// - `max_size`: 10 connections
    /// - `max_lifetime`: 1 hour
    /// - `max_idle_time`: 10 minutes
    /// - `health_check_period`: 1 minute
    /// - `acquire_timeout`: 5 seconds
    pub fn new(target: DatabaseTarget) -> Self {
        Self {
            target,
            namespace: None,
            observer: None,
            min_size: 2,
            max_size: 10,
            max_lifetime: Duration::from_secs(60 * 60),
            max_idle_time: Duration::from_secs(10 * 60),
            health_check_period: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Pin every connection's `search_path` to `namespace`.
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Report every statement to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set the number of idle connections kept warm.
    pub fn with_min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    /// Set the maximum number of connections in the pool.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = idle;
        self
    }

    /// Set how often idle connections are reaped and the background ping runs.
    pub fn with_health_check_period(mut self, period: Duration) -> Self {
        self.health_check_period = period;
        self
    }

    /// Set the default checkout deadline.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Check the limits before they reach the pool builder.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] for a zero `max_size`, a `min_size`
    /// above `max_size`, or any zero duration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::config("max_size must be at least 1"));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::config(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        let durations = [
            ("max_lifetime", self.max_lifetime),
            ("max_idle_time", self.max_idle_time),
            ("health_check_period", self.health_check_period),
            ("acquire_timeout", self.acquire_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(PoolError::config(format!("{name} must be greater than zero")));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("target", &self.target)
            .field("namespace", &self.namespace)
            .field("observed", &self.observer.is_some())
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("max_lifetime", &self.max_lifetime)
            .field("max_idle_time", &self.max_idle_time)
            .field("health_check_period", &self.health_check_period)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle or checked out.
    pub connections: u32,
    /// Open connections waiting in the pool.
    pub idle_connections: u32,
}

impl PoolStatus {
    pub fn in_use(&self) -> u32 {
        self.connections.saturating_sub(self.idle_connections)
    }
}

/// Per-connection setup run whenever the pool opens a connection.
struct ConnectionSetup {
    meta: ConnectionMeta,
    namespace: Option<Namespace>,
    observer: Option<Arc<dyn QueryObserver>>,
}

impl ConnectionSetup {
    async fn establish(&self, url: &str) -> ConnectionResult<AsyncPgConnection> {
        let mut conn = AsyncPgConnection::establish(url).await?;
        if let Some(observer) = &self.observer {
            conn.set_instrumentation(ObservedConnection::new(
                Arc::clone(observer),
                self.meta.clone(),
            ));
        }
        if let Some(namespace) = &self.namespace {
            conn.batch_execute(&namespace.search_path_sql())
                .await
                .map_err(diesel::ConnectionError::CouldntSetupConfiguration)?;
        }
        Ok(conn)
    }
}

fn setup_hook<F>(hook: F) -> F
where
    F: for<'a> Fn(&'a str) -> BoxFuture<'a, ConnectionResult<AsyncPgConnection>>
        + Send
        + Sync
        + 'static,
{
    hook
}

/// Async connection pool for PostgreSQL via Diesel.
///
/// Clones share the same underlying pool.
///
/// # Example
///
/// ```ignore
/// let pool = DbPool::new(config).await?;
/// let mut conn = pool.acquire().await?;
/// // Use conn for Diesel operations...
/// ```
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<AsyncPgConnection>,
    max_size: u32,
    acquire_timeout: Duration,
    health_check_period: Duration,
}

impl DbPool {
    /// Create a new connection pool with the given configuration.
    ///
    /// Opens `min_size` connections before returning.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Config` for inconsistent limits and
    /// `PoolError::Build` if the initial connections cannot be opened.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let setup = Arc::new(ConnectionSetup {
            meta: config.target.meta().clone(),
            namespace: config.namespace.clone(),
            observer: config.observer.clone(),
        });
        let mut manager_config = ManagerConfig::<AsyncPgConnection>::default();
        manager_config.recycling_method = RecyclingMethod::Verified;
        manager_config.custom_setup = Box::new(setup_hook(move |url| {
            let setup = Arc::clone(&setup);
            async move { setup.establish(url).await }.boxed()
        }));
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            config.target.url(),
            manager_config,
        );

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_size))
            .max_lifetime(Some(config.max_lifetime))
            .idle_timeout(Some(config.max_idle_time))
            .reaper_rate(config.health_check_period)
            .connection_timeout(config.acquire_timeout)
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;

        debug!(
            host = %config.target.meta().host,
            database = %config.target.meta().database,
            namespace = config.namespace.as_ref().map(Namespace::as_str),
            max_size = config.max_size,
            "connection pool ready"
        );

        Ok(Self {
            inner: pool,
            max_size: config.max_size,
            acquire_timeout: config.acquire_timeout,
            health_check_period: config.health_check_period,
        })
    }

    /// Default checkout deadline.
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Check out a connection, waiting at most the pool's own checkout bound.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Exhausted` when the pool gave up while every
    /// connection was checked out, `ConnectionError::Timeout` when it gave up
    /// with capacity to spare, and `ConnectionError::Broken` when a new
    /// connection could not be opened.
    pub async fn acquire(&self) -> Result<PooledPgConnection, ConnectionError> {
        self.inner.get_owned().await.map_err(|err| self.checkout_failed(err))
    }

    /// Check out a connection, giving up after `deadline`.
    ///
    /// A caller that gives up never leaves a reservation behind; the pool's
    /// occupancy is unchanged by a failed checkout.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Timeout` whenever `deadline` passes first.
    /// If the pool's own checkout bound is shorter and runs out, the error is
    /// classified as in [`DbPool::acquire`].
    pub async fn acquire_within(
        &self,
        deadline: Duration,
    ) -> Result<PooledPgConnection, ConnectionError> {
        match tokio::time::timeout(deadline, self.inner.get_owned()).await {
            Ok(result) => result.map_err(|err| self.checkout_failed(err)),
            Err(_) => Err(ConnectionError::Timeout { waited: deadline }),
        }
    }

    fn checkout_failed(&self, error: RunError) -> ConnectionError {
        match error {
            RunError::User(err) => ConnectionError::broken(err.to_string()),
            RunError::TimedOut => {
                let status = self.status();
                if status.connections >= self.max_size && status.idle_connections == 0 {
                    ConnectionError::Exhausted {
                        max_size: self.max_size,
                    }
                } else {
                    ConnectionError::Timeout {
                        waited: self.acquire_timeout,
                    }
                }
            }
        }
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    /// Round-trip a trivial statement on a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns the checkout error, or `ConnectionError::Broken` if the
    /// statement fails.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        let conn = self.acquire().await?;
        select_one(conn).await
    }

    /// [`DbPool::ping`] with an explicit checkout deadline.
    ///
    /// # Errors
    ///
    /// See [`DbPool::ping`].
    pub async fn ping_within(&self, deadline: Duration) -> Result<(), ConnectionError> {
        let conn = self.acquire_within(deadline).await?;
        select_one(conn).await
    }

    /// Ping the database every health-check period until the task is aborted.
    ///
    /// Failures are logged; broken connections are already discarded by
    /// checkout validation.
    pub fn spawn_health_check(&self) -> JoinHandle<()> {
        let pool = self.clone();
        let period = self.health_check_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match pool.ping().await {
                    Ok(()) => debug!(status = ?pool.status(), "pool health check passed"),
                    Err(error) => warn!(%error, "pool health check failed"),
                }
            }
        })
    }
}

async fn select_one(mut conn: PooledPgConnection) -> Result<(), ConnectionError> {
    diesel::sql_query("SELECT 1")
        .execute(&mut *conn)
        .await
        .map(|_| ())
        .map_err(|err| ConnectionError::broken(err.to_string()))
}

impl fmt::Debug for DbPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbPool")
            .field("max_size", &self.max_size)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
