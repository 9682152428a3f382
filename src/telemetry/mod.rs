//! Telemetry module.
//!
//! Structured logging via `tracing` and scheduler/pool metrics via the
//! `metrics` facade. All output is local; this crate performs no network
//! I/O.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{record_admission_overload, record_batch_completed, record_queue_depth};
