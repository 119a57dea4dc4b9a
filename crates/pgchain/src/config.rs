//! Connection pool configuration.

use crate::error::{DbError, DbResult};
use std::time::Duration;

/// Configuration for the process-wide connection pool.
///
/// Defaults target a local development database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Maximum number of simultaneously open connections.
    pub max_size: usize,
    /// Connections unused for longer than this are closed.
    pub idle_timeout: Duration,
    /// Upper bound for waiting on a free slot and for opening a new connection.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_size: 20,
            idle_timeout: Duration::from_millis(30_000),
            connect_timeout: Duration::from_millis(2_000),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `DB_*` environment variables.
    ///
    /// Unset variables keep their default. Recognized variables:
    /// `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`, `DB_POOL_MAX`,
    /// `DB_IDLE_TIMEOUT_MS`, `DB_CONNECT_TIMEOUT_MS`.
    pub fn from_env() -> DbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup (used by `from_env`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("DB_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            config.port = parse_number("DB_PORT", &port)?;
        }
        if let Some(database) = lookup("DB_NAME") {
            config.database = database;
        }
        if let Some(user) = lookup("DB_USER") {
            config.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            config.password = password;
        }
        if let Some(max) = lookup("DB_POOL_MAX") {
            config.max_size = parse_number("DB_POOL_MAX", &max)?;
        }
        if let Some(ms) = lookup("DB_IDLE_TIMEOUT_MS") {
            config.idle_timeout = Duration::from_millis(parse_number("DB_IDLE_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("DB_CONNECT_TIMEOUT_MS") {
            config.connect_timeout =
                Duration::from_millis(parse_number("DB_CONNECT_TIMEOUT_MS", &ms)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the login user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the login password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the maximum pool size.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Reject configurations the pool cannot be built from.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_size == 0 {
            return Err(DbError::Config("max pool size must be at least 1".to_string()));
        }
        if self.host.is_empty() {
            return Err(DbError::Config("host must not be empty".to_string()));
        }
        Ok(())
    }

    /// Translate into a `tokio_postgres::Config`.
    pub(crate) fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .password(&self.password)
            .connect_timeout(self.connect_timeout);
        pg
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> DbResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| DbError::Config(format!("{key} must be a number, got '{raw}'")))
}
