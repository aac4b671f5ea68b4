//! # Logger Setup
//!
//! Installs a `tracing` subscriber with:
//!
//! - an `EnvFilter` (`RUST_LOG` wins over the configured level),
//! - a console layer, plain or JSON,
//! - an optional JSON file layer rolled daily by `tracing-appender`.
//!
//! Keep the returned [`WorkerGuard`] alive for as long as the process logs;
//! dropping it flushes and stops the file writer.

use std::fs;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::LoggerError;

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Level name: trace, debug, info, warn, error, fatal or off.
    pub level: String,
    /// JSON lines on the console instead of human-readable text.
    pub json: bool,
    /// Colour console output.
    pub ansi: bool,
    /// Directory for daily log files; no file output when `None`.
    pub log_dir: Option<PathBuf>,
    /// File name prefix inside `log_dir`.
    pub file_prefix: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
            log_dir: None,
            file_prefix: "realtime".to_string(),
        }
    }
}

/// Maps a level name onto an `EnvFilter` directive.
pub fn level_directive(level: &str) -> Result<&'static str, LoggerError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "fatal" => Ok("error"),
        "off" => Ok("off"),
        other => Err(LoggerError::Level(other.to_string())),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn setup_logging(options: &LogOptions) -> Result<Option<WorkerGuard>, LoggerError> {
    let directive = level_directive(&options.level)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .map_err(|e| LoggerError::Filter(e.to_string()))?;

    let console = if options.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_ansi(options.ansi)
            .boxed()
    };

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| LoggerError::Io {
                path: dir.clone(),
                source,
            })?;
            let (writer, guard) = non_blocking(rolling::daily(dir, &options.file_prefix));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))?;

    tracing::debug!(level = directive, file = options.log_dir.is_some(), "logging initialized");
    Ok(guard)
}
