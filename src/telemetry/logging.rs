//! Logging configuration and initialization.
//!
//! Provides flexible logging setup with support for:
//! - Environment variable (RUST_LOG) configuration
//! - Configuration file settings
//! - Multiple output formats (pretty, compact, json)
//! - Appending to a log file instead of stderr

use crate::Result;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
    /// Output format: pretty, compact, json
    pub format: String,
    /// Log file (appended to); stderr when unset
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Creates a new LogConfig with default values.
    pub fn new() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

/// Initializes the logging system.
///
/// Priority:
/// 1. RUST_LOG environment variable (if set)
/// 2. config parameter (if provided)
/// 3. Default: info level, pretty format
///
/// Logs go to stderr unless a file is configured; stdout carries the
/// decision report.
///
/// # Examples
///
/// ```ignore
/// // Use environment variable
/// std::env::set_var("RUST_LOG", "debug");
/// init_logging(None)?;
///
/// // Use config file settings
/// let config = LogConfig { level: "debug".into(), format: "json".into(), file: None };
/// init_logging(Some(&config))?;
/// ```
pub fn init_logging(config: Option<&LogConfig>) -> Result<()> {
    // Determine log level filter
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        // RUST_LOG takes priority
        EnvFilter::from_default_env()
    } else if let Some(cfg) = config {
        // Use config file setting
        let level = parse_level(&cfg.level);
        EnvFilter::new(level.as_str())
    } else {
        // Default to info
        EnvFilter::new("info")
    };

    let (writer, ansi) = match config.and_then(|c| c.file.as_ref()) {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    // Get format from config or default
    let format = config.map(|c| c.format.as_str()).unwrap_or("pretty");

    // Build and set subscriber based on format
    match format {
        "json" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_span_events(FmtSpan::CLOSE),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        "compact" => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(ansi)
                    .with_writer(writer),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        _ => {
            // "pretty" or default
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(writer),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }

    Ok(())
}

/// Parses a log level string into a Level.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
