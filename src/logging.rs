//! Logging system.
//!
//! Structured logging via the `tracing` crate. Level, format, and output
//! destination come from [`LoggingConfig`]; the `DATASHED_LOG` environment
//! variable overrides the level with a full `EnvFilter` directive set.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether logging is enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output is file; None means the platform default.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable colored output (text format only)
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: true,
        }
    }
}

/// Resolve the log file path: `DATASHED_LOG_FILE` env, config value, then
/// the platform state directory.
pub fn resolve_log_file_path(config_file: Option<PathBuf>) -> Result<PathBuf, Error> {
    if let Ok(env_path) = std::env::var("DATASHED_LOG_FILE") {
        if !env_path.is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }
    if let Some(p) = config_file {
        if !p.as_os_str().is_empty() {
            return Ok(p);
        }
    }
    let project_dirs = directories::ProjectDirs::from("", "datashed", "datashed").ok_or_else(
        || Error::Config("could not determine platform state directory for log file".to_string()),
    )?;
    let state_dir = project_dirs
        .state_dir()
        .unwrap_or_else(|| project_dirs.data_dir());
    Ok(state_dir.join("datashed.log"))
}

/// Initialize the global subscriber from configuration.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &LoggingConfig) -> Result<(), Error> {
    if !config.enabled || config.level == "off" {
        return Ok(());
    }

    let filter = EnvFilter::try_from_env("DATASHED_LOG")
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", config.level, e)))?;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output.as_str() {
        "stdout" => format_layer(config, std::io::stdout),
        "file" => {
            let path = resolve_log_file_path(config.file.clone())?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            // File output never uses ANSI color.
            let mut file_config = config.clone();
            file_config.color = false;
            format_layer(&file_config, Mutex::new(file))
        }
        _ => format_layer(config, std::io::stderr),
    };

    // The boxed layer is typed against the bare Registry, so it attaches
    // first; the filter layers on top of the result.
    // Ignore AlreadyInit: tests and embedding callers may race on the global.
    let _ = tracing_subscriber::registry().with(layer).with(filter).try_init();
    Ok(())
}

fn format_layer<W>(config: &LoggingConfig, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    if config.format == "json" {
        fmt::layer()
            .json()
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(config.color)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(writer)
            .boxed()
    }
}
