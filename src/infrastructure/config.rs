//! Configuration infrastructure
//!
//! Configuration is layered with the `config` crate:
//! 1. Built-in defaults (`AppConfig::default()`, constants in [`defaults`])
//! 2. Optional config file (JSON/TOML/YAML, picked by extension)
//! 3. Environment overrides, e.g. `BILLING_CRAWLER_ENGINE__BATCH_SIZE=20`

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable holding an explicit config file path
pub const CONFIG_PATH_ENV: &str = "BILLING_CRAWLER_CONFIG";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "BILLING_CRAWLER";

/// Config file looked up (any supported extension) when no path is given
pub const DEFAULT_CONFIG_BASENAME: &str = "config/billing-crawler";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub paths: PathsConfig,
    pub portal: PortalConfig,
    pub connectivity: ConnectivityConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Batch engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identifiers per batch (one progress advance per batch)
    pub batch_size: usize,

    /// Workers launched by a start request without an explicit count
    pub default_workers: usize,

    /// Upper bound for a start request's worker count
    pub max_workers: usize,

    /// Attempts per identifier before it lands in the failure set
    pub max_retries: u32,

    /// Fixed delay between attempts
    pub retry_delay_ms: u64,

    /// Poll interval while waiting for connectivity
    pub connectivity_poll_ms: u64,

    /// Re-check interval while paused
    pub pause_poll_ms: u64,

    /// Delay after each batch
    pub inter_batch_delay_ms: u64,

    /// Progress log interval while a run is active
    pub stats_interval_ms: u64,
}

impl EngineConfig {
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub const fn connectivity_poll(&self) -> Duration {
        Duration::from_millis(self.connectivity_poll_ms)
    }

    pub const fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub const fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub const fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Clamps a requested worker count into `1..=max_workers`
    pub fn clamp_workers(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_workers)
            .clamp(1, self.max_workers.max(1))
    }
}

/// Locations of the persisted artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Ordered identifier list (`.json` array or one id per line)
    pub input_list: PathBuf,

    /// Result table (CSV)
    pub result_table: PathBuf,

    /// Failure list (JSON array)
    pub failure_list: PathBuf,

    /// Status file (progress checkpoint)
    pub status_file: PathBuf,
}

/// Billing portal endpoints and page selectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Page holding the lookup form and the challenge
    pub form_url: String,

    /// Form submission target; the form's own action is used when empty
    pub submit_url: String,

    /// Form field receiving the customer identifier
    pub id_field: String,

    /// Form field receiving the challenge answer
    pub challenge_field: String,

    /// Element whose text is the challenge; empty disables challenge handling
    pub challenge_selector: String,

    /// Element shown when the portal rejects the submission
    pub rejection_selector: String,

    /// Link that opens the billing history view
    pub history_link_selector: String,

    /// Rows of the billing history table
    pub history_row_selector: String,

    /// Column holding the period label
    pub period_column: usize,

    /// Column holding the amount
    pub amount_column: usize,

    /// Timeout for every page wait condition
    pub step_timeout_ms: u64,

    /// Requests per second allowed per worker
    pub max_requests_per_second: u32,

    pub user_agent: String,
}

impl PortalConfig {
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Rows shorter than this are skipped
    pub fn min_columns(&self) -> usize {
        self.period_column.max(self.amount_column) + 1
    }
}

/// Network reachability probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub probe_url: String,
    pub timeout_ms: u64,
}

/// Control API listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address.parse().map_err(|e| ConfigError::Validation {
            message: format!("invalid server.bind_address '{}': {}", self.bind_address, e),
        })
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Log directory; defaults to the user data directory
    pub log_dir: Option<PathBuf>,

    pub file_name: String,

    /// "daily" or "never"
    pub rotation: String,

    /// Offset applied to log timestamps
    pub utc_offset_hours: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            default_workers: defaults::DEFAULT_WORKERS,
            max_workers: defaults::MAX_WORKERS,
            max_retries: defaults::MAX_RETRIES,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            connectivity_poll_ms: defaults::CONNECTIVITY_POLL_MS,
            pause_poll_ms: defaults::PAUSE_POLL_MS,
            inter_batch_delay_ms: defaults::INTER_BATCH_DELAY_MS,
            stats_interval_ms: defaults::STATS_INTERVAL_MS,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_list: PathBuf::from("data/cids.txt"),
            result_table: PathBuf::from("data/results.csv"),
            failure_list: PathBuf::from("data/failed_cids.json"),
            status_file: PathBuf::from("data/status.json"),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            form_url: "http://localhost:8080/billing/inquiry".to_string(),
            submit_url: String::new(),
            id_field: "cid".to_string(),
            challenge_field: "captcha".to_string(),
            challenge_selector: "#captcha-text".to_string(),
            rejection_selector: ".alert-danger, .error-dialog".to_string(),
            history_link_selector: "a.bill-history".to_string(),
            history_row_selector: "table.history tbody tr".to_string(),
            period_column: 0,
            amount_column: 1,
            step_timeout_ms: defaults::STEP_TIMEOUT_MS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            user_agent: format!("billing-crawler/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://www.gstatic.com/generate_204".to_string(),
            timeout_ms: 3_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            file_name: "billing-crawler.log".to_string(),
            rotation: "daily".to_string(),
            utc_offset_hours: 0,
        }
    }
}

impl AppConfig {
    /// Rejects settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        let invalid = |message: &str| {
            Err(ConfigError::Validation { message: message.to_string() })
        };

        if engine.batch_size == 0 {
            return invalid("engine.batch_size must be greater than 0");
        }
        if engine.default_workers == 0 {
            return invalid("engine.default_workers must be greater than 0");
        }
        if engine.max_workers < engine.default_workers {
            return invalid("engine.max_workers cannot be less than engine.default_workers");
        }
        if engine.max_retries == 0 {
            return invalid("engine.max_retries must be greater than 0");
        }
        if self.portal.max_requests_per_second == 0 {
            return invalid("portal.max_requests_per_second must be greater than 0");
        }

        let paths = &self.paths;
        for (name, path) in [
            ("paths.input_list", &paths.input_list),
            ("paths.result_table", &paths.result_table),
            ("paths.failure_list", &paths.failure_list),
            ("paths.status_file", &paths.status_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation {
                    message: format!("{name} must not be empty"),
                });
            }
        }

        Ok(())
    }
}

/// Loads the layered configuration
pub struct ConfigManager;

impl ConfigManager {
    /// Loads defaults, then the config file, then environment overrides.
    ///
    /// An explicit `path` (or `BILLING_CRAWLER_CONFIG`) must exist; the
    /// default location is optional.
    pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let explicit = path.map(Path::to_path_buf).or(env_path);

        let file_source = match &explicit {
            Some(path) => config::File::from(path.as_path()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_BASENAME).required(false),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        match explicit {
            Some(path) => info!("Loaded configuration from: {:?}", path),
            None => info!("Loaded configuration (defaults + optional {DEFAULT_CONFIG_BASENAME})"),
        }
        Ok(config)
    }

    /// Default data directory for logs when none is configured
    pub fn get_app_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("billing-crawler")
    }
}

/// Engine defaults
pub mod defaults {
    pub const BATCH_SIZE: usize = 10;

    pub const DEFAULT_WORKERS: usize = 1;

    pub const MAX_WORKERS: usize = 4;

    pub const MAX_RETRIES: u32 = 3;

    pub const RETRY_DELAY_MS: u64 = 10_000;

    pub const CONNECTIVITY_POLL_MS: u64 = 5_000;

    pub const PAUSE_POLL_MS: u64 = 1_000;

    pub const INTER_BATCH_DELAY_MS: u64 = 1_000;

    pub const STATS_INTERVAL_MS: u64 = 30_000;

    /// Per wait condition on the portal
    pub const STEP_TIMEOUT_MS: u64 = 10_000;

    pub const MAX_REQUESTS_PER_SECOND: u32 = 2;

    pub const LOG_LEVEL: &str = "info";
}
