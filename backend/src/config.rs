//! Database settings loaded via OrthoConfig.
//!
//! Values come from `POSTGRES_*` environment variables (and any OrthoConfig
//! configuration file), falling back to local-development defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::outbound::persistence::{
    DatabaseTarget, MigratorConfig, Namespace, PoolConfig, PoolError, QueryObserver, SchemaError,
    SslMode,
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_USER: &str = "postgres";
const DEFAULT_PASSWORD: &str = "postgres";
const DEFAULT_DB: &str = "postgres";
const DEFAULT_SSL_MODE: &str = "disable";
const DEFAULT_SCHEMA: &str = "app";

/// Errors raised when settings cannot be turned into runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Connection(#[from] PoolError),
    #[error(transparent)]
    Namespace(#[from] SchemaError),
}

/// PostgreSQL connection, pool, and migration settings.
#[derive(Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "POSTGRES")]
pub struct PostgresSettings {
    pub host: Option<String>,
    #[ortho_config(default = 5432)]
    pub port: u16,
    pub user: Option<String>,
    /// Never logged; see the `Debug` implementation.
    pub password: Option<String>,
    /// Database name.
    pub db: Option<String>,
    pub ssl_mode: Option<String>,
    /// Namespace (PostgreSQL schema) holding the application's tables.
    pub schema: Option<String>,
    #[ortho_config(default = 2)]
    pub pool_min_size: u32,
    #[ortho_config(default = 10)]
    pub pool_max_size: u32,
    #[ortho_config(default = 3600)]
    pub conn_max_lifetime_secs: u64,
    #[ortho_config(default = 600)]
    pub conn_max_idle_time_secs: u64,
    #[ortho_config(default = 60)]
    pub health_check_period_secs: u64,
    /// Deadline for checking out a pooled connection.
    #[ortho_config(default = 5)]
    pub operation_timeout_secs: u64,
    #[ortho_config(default = 30)]
    pub migration_timeout_secs: u64,
}

impl PostgresSettings {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_USER)
    }

    fn password(&self) -> &str {
        self.password.as_deref().unwrap_or(DEFAULT_PASSWORD)
    }

    pub fn db(&self) -> &str {
        self.db.as_deref().unwrap_or(DEFAULT_DB)
    }

    pub fn ssl_mode(&self) -> &str {
        self.ssl_mode.as_deref().unwrap_or(DEFAULT_SSL_MODE)
    }

    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    /// Connection target built from host, port, credentials, and SSL mode.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Connection`] for an unknown SSL mode or a
    /// host that cannot be encoded.
    pub fn target(&self) -> Result<DatabaseTarget, SettingsError> {
        let ssl_mode: SslMode = self.ssl_mode().parse()?;
        Ok(DatabaseTarget::from_parts(
            self.host(),
            self.port,
            self.user(),
            self.password(),
            self.db(),
            ssl_mode,
        )?)
    }

    /// Validated application namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Namespace`] when the name is not a plain
    /// lower-case identifier.
    pub fn namespace(&self) -> Result<Namespace, SettingsError> {
        Ok(Namespace::new(self.schema())?)
    }

    /// Pool configuration with the namespace pinned and `observer` attached.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the target, namespace, or limits are
    /// invalid.
    pub fn pool_config(
        &self,
        observer: Option<Arc<dyn QueryObserver>>,
    ) -> Result<PoolConfig, SettingsError> {
        let mut config = PoolConfig::new(self.target()?)
            .with_namespace(self.namespace()?)
            .with_min_size(self.pool_min_size)
            .with_max_size(self.pool_max_size)
            .with_max_lifetime(Duration::from_secs(self.conn_max_lifetime_secs))
            .with_max_idle_time(Duration::from_secs(self.conn_max_idle_time_secs))
            .with_health_check_period(Duration::from_secs(self.health_check_period_secs))
            .with_acquire_timeout(Duration::from_secs(self.operation_timeout_secs));
        if let Some(observer) = observer {
            config = config.with_observer(observer);
        }
        config.validate()?;
        Ok(config)
    }

    /// Migration configuration for the application namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the target or namespace is invalid.
    pub fn migrator_config(&self) -> Result<MigratorConfig, SettingsError> {
        Ok(MigratorConfig::new(self.target()?, self.namespace()?)
            .with_timeout(Duration::from_secs(self.migration_timeout_secs)))
    }
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host())
            .field("port", &self.port)
            .field("user", &self.user())
            .field("password", &"<redacted>")
            .field("db", &self.db())
            .field("ssl_mode", &self.ssl_mode())
            .field("schema", &self.schema())
            .field("pool_min_size", &self.pool_min_size)
            .field("pool_max_size", &self.pool_max_size)
            .field("conn_max_lifetime_secs", &self.conn_max_lifetime_secs)
            .field("conn_max_idle_time_secs", &self.conn_max_idle_time_secs)
            .field("health_check_period_secs", &self.health_check_period_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("migration_timeout_secs", &self.migration_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for database settings parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 15] = [
        "POSTGRES_HOST",
        "POSTGRES_PORT",
        "POSTGRES_USER",
        "POSTGRES_PASSWORD",
        "POSTGRES_DB",
        "POSTGRES_SSL_MODE",
        "POSTGRES_SCHEMA",
        "POSTGRES_POOL_MIN_SIZE",
        "POSTGRES_POOL_MAX_SIZE",
        "POSTGRES_CONN_MAX_LIFETIME_SECS",
        "POSTGRES_CONN_MAX_IDLE_TIME_SECS",
        "POSTGRES_HEALTH_CHECK_PERIOD_SECS",
        "POSTGRES_OPERATION_TIMEOUT_SECS",
        "POSTGRES_MIGRATION_TIMEOUT_SECS",
        "POSTGRES_CONFIG_PATH",
    ];

    fn cleared_except<'a>(
        overrides: &'a [(&'a str, &'a str)],
    ) -> Vec<(&'a str, Option<String>)> {
        VARS.iter()
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_owned());
                (*name, value)
            })
            .collect()
    }

    fn load_from_empty_args() -> PostgresSettings {
        PostgresSettings::load_from_iter([OsString::from("bookshelf")])
            .expect("config should load")
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env(cleared_except(&[]));

        let settings = load_from_empty_args();
        assert_eq!(settings.host(), "127.0.0.1");
        assert_eq!(settings.port, 5432);
        assert_eq!(settings.user(), "postgres");
        assert_eq!(settings.db(), "postgres");
        assert_eq!(settings.ssl_mode(), "disable");
        assert_eq!(settings.schema(), "app");
        assert_eq!((settings.pool_min_size, settings.pool_max_size), (2, 10));
        assert_eq!(settings.operation_timeout_secs, 5);
        assert_eq!(settings.migration_timeout_secs, 30);
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(cleared_except(&[
            ("POSTGRES_HOST", "db.internal"),
            ("POSTGRES_PORT", "6432"),
            ("POSTGRES_PASSWORD", "hunter2"),
            ("POSTGRES_SCHEMA", "library"),
            ("POSTGRES_POOL_MAX_SIZE", "4"),
            ("POSTGRES_POOL_MIN_SIZE", "1"),
        ]));

        let settings = load_from_empty_args();
        let config = settings.pool_config(None).expect("pool config");

        assert_eq!(config.target().meta().host, "db.internal");
        assert_eq!(config.target().meta().port, 6432);
        assert_eq!(config.max_size(), 4);
        assert_eq!(settings.namespace().expect("namespace").as_str(), "library");
    }

    #[rstest]
    fn debug_output_redacts_password() {
        let _guard = lock_env(cleared_except(&[("POSTGRES_PASSWORD", "hunter2")]));

        let settings = load_from_empty_args();
        let rendered = format!("{settings:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[rstest]
    fn unknown_ssl_mode_is_rejected() {
        let _guard = lock_env(cleared_except(&[("POSTGRES_SSL_MODE", "sometimes")]));

        let err = load_from_empty_args().target().expect_err("ssl mode should fail");
        assert!(err.to_string().contains("sometimes"));
    }

    #[rstest]
    fn unsafe_schema_is_rejected() {
        let _guard = lock_env(cleared_except(&[("POSTGRES_SCHEMA", "public; drop")]));

        let err = load_from_empty_args().namespace().expect_err("schema should fail");
        assert!(matches!(err, SettingsError::Namespace(_)));
    }

    #[rstest]
    fn inverted_pool_limits_are_rejected() {
        let _guard = lock_env(cleared_except(&[
            ("POSTGRES_POOL_MIN_SIZE", "8"),
            ("POSTGRES_POOL_MAX_SIZE", "4"),
        ]));

        let err = load_from_empty_args()
            .pool_config(None)
            .expect_err("limits should fail");
        assert!(err.to_string().contains("min_size 8 exceeds max_size 4"));
    }
}
