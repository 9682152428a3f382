//! Structured logging setup.
//!
//! JSON output for production, pretty output for development, with an
//! optional log file. Worker thread names are included in every event
//! since most interesting lines here come from pool and controller
//! threads.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration, normally built by [`crate::config::load`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directive string, e.g. `info` or `bidmatch_core=debug`.
    pub level: String,
    /// Log file destination; stderr when absent.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("failed to open log file: {0}")]
    OpenLogFile(#[from] std::io::Error),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Install the global tracing subscriber. Call once at startup; a second
/// call reports [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LogError::InvalidFilter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let events = fmt::layer().with_thread_names(true);

    let installed = match (config.format, &config.output_path) {
        (LogFormat::Json, Some(path)) => {
            let file = Mutex::new(File::create(path)?);
            registry.with(events.json().with_writer(file)).try_init()
        }
        (LogFormat::Json, None) => registry.with(events.json()).try_init(),
        (LogFormat::Pretty, Some(path)) => {
            let file = Mutex::new(File::create(path)?);
            registry.with(events.pretty().with_writer(file)).try_init()
        }
        (LogFormat::Pretty, None) => registry.with(events.pretty()).try_init(),
    };
    installed.map_err(|_| LogError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_filter_is_rejected() {
        let config = LogConfig {
            level: "not==a==filter".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(LogError::InvalidFilter { .. })
        ));
    }
}
