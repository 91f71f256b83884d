//! Logging system configuration and initialization
//!
//! This module provides the logging setup with:
//! - File logging through a non-blocking appender (daily rotation or a single file)
//! - Configuration based log level control, overridable by `RUST_LOG`
//! - Structured JSON file logs (optional)
//! - Console and file output support
//! - Timestamps in a configurable fixed UTC offset

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Subscriber, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::config::ConfigManager;

// Keeps the file writer alive for the process lifetime
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Timestamp formatter for a fixed UTC offset
#[derive(Clone, Copy)]
struct OffsetTimeFormatter {
    offset: FixedOffset,
}

impl OffsetTimeFormatter {
    fn new(offset_hours: i32) -> Self {
        let offset =
            FixedOffset::east_opt(offset_hours.clamp(-23, 23) * 3600).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }
}

impl FormatTime for OffsetTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Utc::now().with_timezone(&self.offset);
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Log directory: configured, or `<data_local_dir>/billing-crawler/logs`
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    config
        .log_dir
        .clone()
        .unwrap_or_else(|| ConfigManager::get_app_data_dir().join("logs"))
}

/// Dependencies held at warn unless tracing everything
const QUIET_DIRECTIVES: [&str; 7] = [
    "reqwest=warn",
    "hyper=warn",
    "hyper_util=warn",
    "h2=warn",
    "html5ever=warn",
    "selectors=warn",
    "tower=warn",
];

/// Builds the filter: `RUST_LOG` wins, otherwise the configured level with
/// noisy dependencies held at warn unless tracing everything.
fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level)
        .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))?;

    if !level.to_lowercase().contains("trace") {
        for directive in QUIET_DIRECTIVES {
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| anyhow!("Invalid log directive '{}': {}", directive, e))?,
            );
        }
    }

    Ok(filter)
}

fn console_layer<S>(enabled: bool, timer: OffsetTimeFormatter) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    enabled.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(timer)
            .with_target(false)
    })
}

fn file_appender(log_dir: &Path, config: &LoggingConfig) -> rolling::RollingFileAppender {
    match config.rotation.as_str() {
        "never" => rolling::never(log_dir, &config.file_name),
        _ => rolling::daily(log_dir, &config.file_name),
    }
}

/// Initialize logging with custom configuration
///
/// # Environment Variable Override
/// ```bash
/// # Show HTTP client internals
/// RUST_LOG="debug,reqwest=debug,hyper=debug" billing-crawler
/// ```
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config.level)?;
    let timer = OffsetTimeFormatter::new(config.utc_offset_hours);
    let registry = Registry::default().with(env_filter);

    match (config.file_output, config.json_format) {
        (true, json) => {
            let log_dir = get_log_directory(config);
            std::fs::create_dir_all(&log_dir)
                .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

            let (file_writer, file_guard) = non_blocking(file_appender(&log_dir, config));
            LOG_GUARDS
                .lock()
                .map_err(|_| anyhow!("Log guard registry poisoned"))?
                .push(file_guard);

            if json {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(timer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false);
                registry
                    .with(file_layer)
                    .with(console_layer(config.console_output, timer))
                    .try_init()?;
            } else {
                // Minimal formatting for files (time + level + message)
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(timer)
                    .with_target(false)
                    .with_ansi(false);
                registry
                    .with(file_layer)
                    .with(console_layer(config.console_output, timer))
                    .try_init()?;
            }

            info!("Log directory: {:?}", log_dir);
        }
        (false, _) => {
            if !config.console_output {
                return Err(anyhow!("No logging output configured"));
            }
            registry.with(console_layer(config.console_output, timer)).try_init()?;
        }
    }

    info!("Logging system initialized (level: {}, json: {})", config.level, config.json_format);
    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Billing Crawler System Information ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);

    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
    info!("==========================================");
}
