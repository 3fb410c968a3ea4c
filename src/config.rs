use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub accrual: AccrualConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccrualConfig {
    /// Base address of the accrual provider (scheme optional)
    pub address: String,
    /// Interval between scans for unresolved orders in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Worker pool size; 0 means one per CPU core
    #[serde(default)]
    pub workers: usize,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Backoff used when a 429 carries no usable Retry-After
    #[serde(default = "default_retry_after")]
    pub default_retry_after_secs: u64,
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_retry_after() -> u64 {
    1
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8081".to_string(),
            poll_interval_ms: default_poll_interval(),
            workers: 0,
            request_timeout_ms: default_request_timeout(),
            default_retry_after_secs: default_retry_after(),
        }
    }
}

impl AccrualConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    /// Configured worker count, falling back to the number of CPU cores
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address for the health endpoints
    #[serde(default = "default_run_address")]
    pub run_address: String,
}

fn default_run_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            run_address: default_run_address(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound for draining workers on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.url", "postgres://localhost/loyalty")?
            .set_default("database.max_connections", 10)?
            .set_default("accrual.address", "localhost:8081")?
            .set_default("accrual.poll_interval_ms", 2000)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LOYALTY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (LOYALTY__DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("LOYALTY")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat variables used by deployment scripts
            .set_override_option("server.run_address", std::env::var("RUN_ADDRESS").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URI").ok())?
            .set_override_option(
                "accrual.address",
                std::env::var("ACCRUAL_SYSTEM_ADDRESS").ok(),
            )?;

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be positive".to_string());
        }

        if self.accrual.address.trim().is_empty() {
            errors.push("accrual.address must be set".to_string());
        }

        if self.accrual.poll_interval_ms == 0 {
            errors.push("accrual.poll_interval_ms must be positive".to_string());
        }

        if self.accrual.request_timeout_ms == 0 {
            errors.push("accrual.request_timeout_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
