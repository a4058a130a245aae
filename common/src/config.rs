// Configuration management with layered configuration (defaults, file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pool: PoolRetryConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Connection settings handed to the database driver when a pool is created
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Negotiate TLS with the server
    pub encrypt: bool,
    /// Accept the server certificate without verifying it
    pub trust_server_certificate: bool,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub pool_max: u32,
    pub pool_min: u32,
    pub pool_idle_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_idle_timeout_ms)
    }

    /// `user@host:port/name`, safe to log
    pub fn redacted_target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.name)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "payment_gateway".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            encrypt: false,
            trust_server_certificate: false,
            connection_timeout_ms: 15_000,
            request_timeout_ms: 15_000,
            pool_max: 10,
            pool_min: 0,
            pool_idle_timeout_ms: 30_000,
        }
    }
}

// Hand-written so the password never reaches a log line
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("pool_max", &self.pool_max)
            .field("pool_min", &self.pool_min)
            .field("pool_idle_timeout_ms", &self.pool_idle_timeout_ms)
            .finish()
    }
}

/// Retry policy for pool creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolRetryConfig {
    /// Consecutive failed creation attempts tolerated before giving up
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for PoolRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with built-in defaults so every key is optional
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.host.is_empty() {
            return Err("Database host cannot be empty".to_string());
        }
        if self.database.name.is_empty() {
            return Err("Database name cannot be empty".to_string());
        }
        if self.database.port == 0 {
            return Err("Database port must be greater than 0".to_string());
        }
        if self.database.pool_max == 0 {
            return Err("Database pool_max must be greater than 0".to_string());
        }
        if self.database.pool_min > self.database.pool_max {
            return Err(format!(
                "Database pool_min ({}) cannot exceed pool_max ({})",
                self.database.pool_min, self.database.pool_max
            ));
        }

        if self.pool.max_retries == 0 {
            return Err("Pool max_retries must be greater than 0".to_string());
        }
        if self.pool.base_delay_ms > self.pool.max_delay_ms {
            return Err("Pool base_delay_ms cannot exceed max_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.pool.jitter_factor) {
            return Err("Pool jitter_factor must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            pool: PoolRetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
