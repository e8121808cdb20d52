//! Structured logging utilities for phototree components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use phototree_config::logging::*;
//!
//! log_ingest_info!("Upload stored", path = "2021/07/04/1-3fa9c1d2.jpg");
//! log_cli_debug!("Resolved storage root", root = "/srv/photos");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CLI: &'static str = "CLI";
    pub const INGEST: &'static str = "INGEST";
    pub const BOOTSTRAP: &'static str = "BOOTSTRAP";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// `steps` levels more verbose, saturating at `Trace`.
    pub fn raised(self, steps: u8) -> Self {
        const ORDER: [LogLevel; 5] = [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ];
        let at = self as usize + steps as usize;
        ORDER[at.min(ORDER.len() - 1)]
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level {:?}", other)),
        }
    }
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLI", $($key = $value,)* $msg)
    };
}

// === INGEST logging macros ===

#[macro_export]
macro_rules! log_ingest_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "INGEST", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_ingest_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "INGEST", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_ingest_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "INGEST", $($key = $value,)* $msg)
    };
}

// === BOOTSTRAP logging macros ===

#[macro_export]
macro_rules! log_bootstrap_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "BOOTSTRAP", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_bootstrap_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "BOOTSTRAP", $($key = $value,)* $msg)
    };
}

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "PHOTOTREE_LOG";

/// Initialize logging with the given level filter.
/// Call this once at application startup; later calls are no-ops.
///
/// Logs go to stderr so that stdout stays machine-readable.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::CLI, "CLI");
        assert_eq!(Component::INGEST, "INGEST");
        assert_eq!(Component::BOOTSTRAP, "BOOTSTRAP");
    }

    #[test]
    fn test_level_parse_and_raise() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Info.raised(1), LogLevel::Debug);
        assert_eq!(LogLevel::Info.raised(9), LogLevel::Trace);
        assert_eq!(LogLevel::Warn.raised(0), LogLevel::Warn);
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging(LogLevel::Debug);
        init_logging(LogLevel::Trace);
        log_cli_debug!("logging initialised", attempt = 2);
    }
}
