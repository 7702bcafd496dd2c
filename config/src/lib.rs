//! # Configuration Management for unidata
//!
//! This crate provides centralized configuration structures for all unidata components,
//! including the PostgreSQL backend, the query cache, change subscriptions and the
//! data service itself.
//!
//! ## Quick Start
//!
//! ### Programmatic Configuration
//! ```rust
//! use config::{CacheConfig, DatabaseConfig, ServiceConfig};
//!
//! let db_config = DatabaseConfig::new(
//!     "localhost".to_string(), 5432, "fleet".to_string(),
//!     "postgres".to_string(), "password".to_string(),
//!     1, 10, 30, 600, 3600,
//! );
//!
//! let cache_config = CacheConfig::new(true, 300, 300, "unidata".to_string());
//! let service_config = ServiceConfig::default().with_request_timeout_ms(5_000);
//! ```
//!
//! ### TOML File Configuration
//! ```toml
//! [database]
//! host = "localhost"
//! port = 5432
//! database = "fleet"
//! username = "postgres"
//! password = "password"
//! min_connections = 1
//! max_connections = 10
//! connection_timeout_seconds = 30
//! idle_timeout_seconds = 600
//! max_lifetime_seconds = 3600
//!
//! [cache]
//! enabled = true
//! default_ttl_seconds = 300
//! sweep_interval_seconds = 300
//! key_prefix = "unidata"
//!
//! [subscription]
//! channel_buffer = 256
//! open_timeout_ms = 10000
//!
//! [service]
//! request_timeout_ms = 15000
//! analysis_timeout_ms = 5000
//! enrichment_enabled = true
//! enrichment_min_length = 50
//! validation_min_length = 10
//! batch_read_concurrency = 5
//! audit_table = "system_logs"
//! id_column = "id"
//! created_column = "created_at"
//! ```
//!
//! Load configuration:
//! ```rust,no_run
//! use config::AppConfig;
//!
//! // Load from unidata.toml (or the path in UNIDATA_CONFIG)
//! let config = AppConfig::load()?;
//!
//! // Or load from custom path
//! let config = AppConfig::from_file("config/production.toml")?;
//! # Ok::<(), config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, path::Path};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./unidata.toml";
const CONFIG_PATH_ENV: &str = "UNIDATA_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Environment variable error: {0}")]
    Env(#[from] env::VarError),
    #[error("Dotenvy error: {0}")]
    Dotenvy(#[from] dotenvy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// PostgreSQL backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; when off every query goes to the remote store
    pub enabled: bool,
    /// TTL applied when a query does not specify its own
    pub default_ttl_seconds: u64,
    /// Interval of the background expiry sweep
    pub sweep_interval_seconds: u64,
    /// Prefix for every cache key
    pub key_prefix: String,
}

/// Change subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Buffered change events per upstream channel
    pub channel_buffer: usize,
    /// Upper bound on opening an upstream change channel
    pub open_timeout_ms: u64,
}

/// Data service behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Upper bound on every remote store call
    pub request_timeout_ms: u64,
    /// Upper bound on every text analysis call
    pub analysis_timeout_ms: u64,
    pub enrichment_enabled: bool,
    /// Strings longer than this are candidates for enrichment
    pub enrichment_min_length: usize,
    /// Payloads holding a string longer than this are validated before writing
    pub validation_min_length: usize,
    /// Reads executed at once inside a batch
    pub batch_read_concurrency: usize,
    /// Table receiving audit records; `None` keeps audit events in the log only
    pub audit_table: Option<String>,
    pub id_column: String,
    pub created_column: String,
}

impl AppConfig {
    /// Load configuration from the TOML file named in `.env`/the environment, or the default path
    pub fn load() -> Result<Self, ConfigError> {
        let config = {
            // A missing .env file is fine; a malformed one is not
            match dotenvy::dotenv() {
                Ok(_) => {}
                Err(e) if e.not_found() => {}
                Err(e) => return Err(e.into()),
            }

            if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
                Self::from_file(&config_path)
            } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
                Self::from_file(DEFAULT_CONFIG_PATH)
            } else {
                Err(ConfigError::Invalid(format!(
                    "Config path must be specified in .env file as {} or in {} file",
                    CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH
                )))
            }
        }?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.cache.validate()?;
        self.subscription.validate()?;
        self.service.validate()
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

impl DatabaseConfig {
    /// Create a new database configuration
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
        min_connections: u32,
        max_connections: u32,
        connection_timeout_seconds: u64,
        idle_timeout_seconds: u64,
        max_lifetime_seconds: u64,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
            min_connections,
            max_connections,
            connection_timeout_seconds,
            idle_timeout_seconds,
            max_lifetime_seconds,
        }
    }

    /// Build connection string
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(invalid("Database host cannot be empty"));
        }
        if self.port == 0 {
            return Err(invalid("Database port cannot be zero"));
        }
        if self.database.is_empty() {
            return Err(invalid("Database name cannot be empty"));
        }
        if self.username.is_empty() {
            return Err(invalid("Database username cannot be empty"));
        }
        if self.min_connections == 0 {
            return Err(invalid("Database min_connections must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(invalid("Database max_connections must be greater than 0"));
        }
        if self.min_connections > self.max_connections {
            return Err(invalid(
                "Database min_connections cannot be greater than max_connections",
            ));
        }
        if self.connection_timeout_seconds == 0 {
            return Err(invalid(
                "Database connection_timeout_seconds must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "unidata".to_string(),
            username: "postgres".to_string(),
            password: String::new(),
            min_connections: 1,
            max_connections: 10,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            max_lifetime_seconds: 3600,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration
    pub fn new(
        enabled: bool,
        default_ttl_seconds: u64,
        sweep_interval_seconds: u64,
        key_prefix: String,
    ) -> Self {
        Self {
            enabled,
            default_ttl_seconds,
            sweep_interval_seconds,
            key_prefix,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_seconds = ttl.as_secs();
        self
    }

    /// Get TTL as Duration
    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(invalid("Cache key_prefix cannot be empty"));
        }
        if self.default_ttl_seconds == 0 {
            return Err(invalid("Cache default_ttl_seconds must be greater than 0"));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(invalid("Cache sweep_interval_seconds must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: 300,
            sweep_interval_seconds: 300,
            key_prefix: "unidata".to_string(),
        }
    }
}

impl SubscriptionConfig {
    pub fn new(channel_buffer: usize, open_timeout_ms: u64) -> Self {
        Self {
            channel_buffer,
            open_timeout_ms,
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_buffer == 0 {
            return Err(invalid("Subscription channel_buffer must be greater than 0"));
        }
        if self.open_timeout_ms == 0 {
            return Err(invalid("Subscription open_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 256,
            open_timeout_ms: 10_000,
        }
    }
}

impl ServiceConfig {
    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_enrichment(mut self, enabled: bool) -> Self {
        self.enrichment_enabled = enabled;
        self
    }

    pub fn with_audit_table(mut self, table: Option<String>) -> Self {
        self.audit_table = table;
        self
    }

    pub fn with_batch_read_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_read_concurrency = concurrency;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(invalid("Service request_timeout_ms must be greater than 0"));
        }
        if self.analysis_timeout_ms == 0 {
            return Err(invalid("Service analysis_timeout_ms must be greater than 0"));
        }
        if self.batch_read_concurrency == 0 {
            return Err(invalid(
                "Service batch_read_concurrency must be greater than 0",
            ));
        }
        if self.id_column.is_empty() || self.created_column.is_empty() {
            return Err(invalid(
                "Service id_column and created_column cannot be empty",
            ));
        }
        if matches!(&self.audit_table, Some(table) if table.is_empty()) {
            return Err(invalid("Service audit_table cannot be empty when set"));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            analysis_timeout_ms: 5_000,
            enrichment_enabled: true,
            enrichment_min_length: 50,
            validation_min_length: 10,
            batch_read_concurrency: 5,
            audit_table: Some("system_logs".to_string()),
            id_column: "id".to_string(),
            created_column: "created_at".to_string(),
        }
    }
}
