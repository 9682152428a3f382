//! Metric recording helpers over the `metrics` facade.
//!
//! The facade is a no-op until the embedding process installs a
//! recorder, so these helpers are safe to call unconditionally from the
//! hot path.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Record one fully completed batch.
pub fn record_batch_completed(rows: usize, latency: Duration) {
    counter!("bidmatch_batches_completed_total").increment(1);
    counter!("bidmatch_rows_processed_total").increment(rows as u64);
    histogram!("bidmatch_batch_latency_seconds").record(latency.as_secs_f64());
}

/// Track the pending-task queue depth.
pub fn record_queue_depth(depth: usize) {
    gauge!("bidmatch_task_queue_depth").set(depth as f64);
}

/// Record an admission that went over a ceiling.
pub fn record_admission_overload(kind: &'static str, status: &'static str) {
    counter!(
        "bidmatch_admission_overload_total",
        "kind" => kind,
        "status" => status,
    )
    .increment(1);
}
