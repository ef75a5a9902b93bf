//! Driver configuration.
//!
//! Everything is passed explicitly at construction. Configuration can be
//! built in code or loaded from TOML, where durations are written in
//! milliseconds:
//!
//! ```toml
//! endpoint = "grpcs://ydb.example.net:2135"
//! database = "/ru-central1/b1g/etn"
//! default_isolation = "serializable"
//! operation_timeout_ms = 30000
//!
//! [credentials]
//! type = "token"
//! token = "..."
//!
//! [pool]
//! max_size = 50
//! acquire_timeout_ms = 5000
//! ```

use crate::driver::IsolationMode;
use crate::error::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

/// Authentication material passed to the session API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    #[default]
    Anonymous,
    Static { user: String, password: String },
    Token { token: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Static { user, .. } => f
                .debug_struct("Static")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Credentials::Token { .. } => f.debug_struct("Token").field("token", &"***").finish(),
        }
    }
}

/// Bounded exponential backoff for session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    #[serde(rename = "initial_backoff_ms", with = "millis")]
    pub initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    fn validate(&self) -> DriverResult<()> {
        if self.max_attempts == 0 {
            return Err(DriverError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(DriverError::Config(
                "retry.initial_backoff must not exceed retry.max_backoff".into(),
            ));
        }
        Ok(())
    }
}

/// Session pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on leased plus idle sessions.
    pub max_size: usize,
    /// Sessions created up front and kept warm.
    pub min_idle: usize,
    /// Idle sessions older than this are discarded.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,
    /// Maximum wait in `acquire`, session creation included.
    #[serde(rename = "acquire_timeout_ms", with = "millis")]
    pub acquire_timeout: Duration,
    /// Deadline for each session round-trip (create, keep-alive, delete).
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub call_timeout: Duration,
    /// Sessions older than this are recycled regardless of use.
    #[serde(rename = "max_lifetime_ms", with = "opt_millis")]
    pub max_lifetime: Option<Duration>,
    /// Check idle sessions with a keep-alive before handing them out.
    pub validate_on_acquire: bool,
    /// How often the background reaper sweeps idle sessions.
    #[serde(rename = "reaper_interval_ms", with = "opt_millis")]
    pub reaper_interval: Option<Duration>,
    pub retry: RetryConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            min_idle: 0,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(2),
            max_lifetime: None,
            validate_on_acquire: false,
            reaper_interval: Some(Duration::from_secs(30)),
            retry: RetryConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self
    }

    pub fn min_idle(mut self, min: usize) -> Self {
        self.min_idle = min;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn validate_on_acquire(mut self, enabled: bool) -> Self {
        self.validate_on_acquire = enabled;
        self
    }

    /// `None` disables the background reaper.
    pub fn reaper_interval(mut self, interval: Option<Duration>) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.max_size == 0 {
            return Err(DriverError::Config("pool.max_size must be at least 1".into()));
        }
        if self.min_idle > self.max_size {
            return Err(DriverError::Config(format!(
                "pool.min_idle ({}) exceeds pool.max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(DriverError::Config("pool.acquire_timeout must be positive".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(DriverError::Config("pool.call_timeout must be positive".into()));
        }
        if matches!(self.reaper_interval, Some(d) if d.is_zero()) {
            return Err(DriverError::Config("pool.reaper_interval must be positive".into()));
        }
        self.retry.validate()
    }
}

/// Everything a [`ConnectionFactory`](crate::ConnectionFactory) needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub database: String,
    pub credentials: Credentials,
    pub pool: PoolConfig,
    /// Isolation for implicit statements and for `begin()` without an argument.
    pub default_isolation: IsolationMode,
    /// Deadline for each backend round-trip.
    #[serde(rename = "operation_timeout_ms", with = "millis")]
    pub operation_timeout: Duration,
    /// Default part size hint for results.
    pub fetch_size: Option<usize>,
    /// Start explicit transactions with their first statement instead of a
    /// separate round-trip.
    pub lazy_begin: bool,
    /// Ask the server to keep compiled queries in its cache.
    pub keep_in_query_cache: bool,
    /// Parsed statement templates kept per connection; 0 disables the cache.
    pub statement_cache_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "grpc://localhost:2136".to_string(),
            database: "/local".to_string(),
            credentials: Credentials::Anonymous,
            pool: PoolConfig::default(),
            default_isolation: IsolationMode::Serializable,
            operation_timeout: Duration::from_secs(30),
            fetch_size: None,
            lazy_begin: true,
            keep_in_query_cache: true,
            statement_cache_capacity: 64,
        }
    }
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> DriverResult<Self> {
        let config: ConnectionConfig =
            toml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DriverResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(DriverError::Config("endpoint must not be empty".into()));
        }
        if self.database.trim().is_empty() {
            return Err(DriverError::Config("database must not be empty".into()));
        }
        if self.operation_timeout.is_zero() {
            return Err(DriverError::Config("operation_timeout must be positive".into()));
        }
        if self.fetch_size == Some(0) {
            return Err(DriverError::Config("fetch_size must be at least 1".into()));
        }
        self.pool.validate()
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    pub fn default_isolation(mut self, isolation: IsolationMode) -> Self {
        self.config.default_isolation = isolation;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    pub fn fetch_size(mut self, rows: usize) -> Self {
        self.config.fetch_size = Some(rows);
        self
    }

    pub fn lazy_begin(mut self, lazy: bool) -> Self {
        self.config.lazy_begin = lazy;
        self
    }

    pub fn keep_in_query_cache(mut self, keep: bool) -> Self {
        self.config.keep_in_query_cache = keep;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.statement_cache_capacity = capacity;
        self
    }

    /// Validate and build.
    pub fn build(self) -> DriverResult<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
