//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `BIDMATCH_*` environment
//! variables with sensible defaults. Invalid values fall back to defaults
//! without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `BIDMATCH_WORKER_THREADS` | 0 | Controller workers (0 = one per CPU) |
//! | `BIDMATCH_MAX_SESSIONS` | 64 | Aggregate session ceiling |
//! | `BIDMATCH_SESSION_POOL_THREADS` | 8 | Session pool thread ceiling |
//! | `BIDMATCH_MAX_TCP_OBJECTS` | 32 | Mixed pool ceiling for TCP objects |
//! | `BIDMATCH_MAX_PIPE_OBJECTS` | 32 | Mixed pool ceiling for pipe objects |
//! | `BIDMATCH_MIXED_POOL_THREADS` | 4 | Mixed pool thread ceiling |
//! | `BIDMATCH_STRATEGY` | `admatch` | Strategy: admatch, echo, diagnostic |
//! | `BIDMATCH_BID_FILE` | `bids.txt` | Bid inventory path |
//! | `BIDMATCH_LOG_FORMAT` | `json` | Log format: json or pretty |
//! | `BIDMATCH_LOG_LEVEL` | `info` | Log level filter |

use std::path::PathBuf;

use crate::scheduler::ControllerConfig;
use crate::telemetry::{LogConfig, LogFormat};

/// Effective runtime configuration summary, logged at startup.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub worker_threads: usize,
    pub max_sessions: usize,
    pub session_pool_threads: usize,
    pub max_tcp_objects: usize,
    pub max_pipe_objects: usize,
    pub mixed_pool_threads: usize,
    pub strategy: String,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub controller: ControllerConfig,
    pub max_sessions: usize,
    pub session_pool_threads: usize,
    pub max_tcp_objects: usize,
    pub max_pipe_objects: usize,
    pub mixed_pool_threads: usize,
    pub strategy: String,
    pub bid_file: PathBuf,
    pub log: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn load_log_config() -> LogConfig {
    let format = match std::env::var("BIDMATCH_LOG_FORMAT").as_deref() {
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    let level = std::env::var("BIDMATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let worker_threads = parse_usize("BIDMATCH_WORKER_THREADS", 0);
    let max_sessions = parse_usize("BIDMATCH_MAX_SESSIONS", 64).max(1);
    let session_pool_threads = parse_usize("BIDMATCH_SESSION_POOL_THREADS", 8).max(1);
    let max_tcp_objects = parse_usize("BIDMATCH_MAX_TCP_OBJECTS", 32).max(1);
    let max_pipe_objects = parse_usize("BIDMATCH_MAX_PIPE_OBJECTS", 32).max(1);
    let mixed_pool_threads = parse_usize("BIDMATCH_MIXED_POOL_THREADS", 4).max(1);
    let strategy = std::env::var("BIDMATCH_STRATEGY").unwrap_or_else(|_| "admatch".to_string());
    let bid_file =
        PathBuf::from(std::env::var("BIDMATCH_BID_FILE").unwrap_or_else(|_| "bids.txt".to_string()));

    EnvConfig {
        controller: ControllerConfig {
            worker_threads,
            ..Default::default()
        },
        max_sessions,
        session_pool_threads,
        max_tcp_objects,
        max_pipe_objects,
        mixed_pool_threads,
        strategy,
        bid_file,
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Return a summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let worker_threads = if self.controller.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.controller.worker_threads
        };
        EffectiveConfig {
            worker_threads,
            max_sessions: self.max_sessions,
            session_pool_threads: self.session_pool_threads,
            max_tcp_objects: self.max_tcp_objects,
            max_pipe_objects: self.max_pipe_objects,
            mixed_pool_threads: self.mixed_pool_threads,
            strategy: self.strategy.clone(),
        }
    }
}
