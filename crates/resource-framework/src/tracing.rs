//! # Observability & Tracing
//!
//! Components never hold a logger handle: they emit events through the `tracing`
//! macros and the subscriber installed here, once, at process entry.
//!
//! ## What gets traced
//!
//! - **Repository operations**: one span per call (`repository.find_by_id`, ...)
//!   carrying `collection`, `entity`, `id` and, on failure, `error`
//! - **Resource lifecycle**: one `resource{name, phase}` span per connect/close task
//! - **Health checks**: ping outcome and duration
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run                       # lifecycle + results
//! RUST_LOG=debug cargo run                      # every repository call
//! RUST_LOG=resource_framework=debug cargo run   # framework only
//! ```
//!
//! `RUST_LOG`, when set, wins over the configured level.

use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line output with span context inline. Suited to development.
    #[default]
    Compact,
    Pretty,
    /// One JSON object per event. Suited to log shipping.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "console" | "text" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Compact => "compact",
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `resource_framework=debug,info`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

fn build_filter(level: &str) -> Result<EnvFilter, TracingError> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(level).map_err(|e| TracingError::InvalidFilter {
        directive: level.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber described by `config`.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn try_setup_tracing(config: &LogConfig) -> Result<(), TracingError> {
    let filter = build_filter(&config.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Compact => builder.with_target(false).compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|_| TracingError::AlreadyInstalled)
}

/// Installs a compact subscriber filtered by `RUST_LOG` (default `info`).
///
/// A second call is a no-op.
pub fn setup_tracing() {
    let _ = try_setup_tracing(&LogConfig::default());
}
