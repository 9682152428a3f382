//! One batch of requests and its two claim-based traversal phases.
//!
//! A task owns its rows, an atomic claim cursor shared by every worker,
//! a key-sorted index permutation used only during the process phase, and
//! response slots index-aligned to the order the rows arrived in. Workers
//! never coordinate beyond the cursor: each `fetch_add` hands out one row
//! exactly once, and each response slot has exactly one writer because the
//! slot index is owned by the claimed row.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::protocol::{RequestHeader, Response};
use crate::strategy::MatchStrategy;

use super::signal::{completion_pair, CompletionSignal, CompletionWaiter};

/// Outcome of one claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller won a row and handled it.
    Claimed,
    /// No rows left in this phase.
    Exhausted,
}

/// One request row: its text and the key derived during preprocess.
///
/// The original position is the row's index in `Task::rows`; it never
/// moves, only the sorted permutation does.
#[derive(Debug)]
struct Row {
    text: String,
    key: OnceLock<String>,
}

/// A batch of rows moving through the preprocess and process phases.
pub struct Task {
    id: u64,
    rows: Vec<Row>,
    /// Permutation of `[0, rows.len())`; written once by the phase leader
    /// while every other worker is parked at the barrier.
    sorted: RwLock<Vec<usize>>,
    /// Shared claim cursor, reset between phases.
    cursor: AtomicUsize,
    responses: Vec<OnceLock<String>>,
    signal: CompletionSignal,
    diagnostics: bool,
    stop: bool,
    enqueued_at: Instant,
}

impl Task {
    /// Build a task from the decoded header and raw (already decompressed)
    /// batch bytes, split on line boundaries.
    pub fn new(id: u64, header: &RequestHeader, raw: &[u8]) -> (Arc<Self>, CompletionWaiter) {
        let text = String::from_utf8_lossy(raw);
        let rows: Vec<Row> = text
            .lines()
            .map(|line| Row {
                text: line.to_string(),
                key: OnceLock::new(),
            })
            .collect();

        let n = rows.len();
        let (signal, waiter) = completion_pair();
        let task = Arc::new(Self {
            id,
            rows,
            sorted: RwLock::new((0..n).collect()),
            cursor: AtomicUsize::new(0),
            responses: (0..n).map(|_| OnceLock::new()).collect(),
            signal,
            diagnostics: header.diagnostics,
            stop: false,
            enqueued_at: Instant::now(),
        });
        (task, waiter)
    }

    /// Empty task installed at startup so the barrier always has a valid
    /// subject before the first real submission.
    pub fn placeholder() -> Arc<Self> {
        Self::empty(false)
    }

    /// Sentinel that tells the worker pool to exit its loop.
    pub fn stop_sentinel() -> Arc<Self> {
        Self::empty(true)
    }

    fn empty(stop: bool) -> Arc<Self> {
        let (signal, _waiter) = completion_pair();
        Arc::new(Self {
            id: 0,
            rows: Vec::new(),
            sorted: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            responses: Vec::new(),
            signal,
            diagnostics: false,
            stop,
            enqueued_at: Instant::now(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_stop(&self) -> bool {
        self.stop
    }

    /// Time since the batch was constructed for submission.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Claim the next row and derive its key. No two callers ever receive
    /// the same cursor value.
    pub fn preprocess_next(&self, strategy: &MatchStrategy) -> Claim {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        if i >= self.rows.len() {
            return Claim::Exhausted;
        }
        let row = &self.rows[i];
        let key = strategy.derive_key(&row.text);
        if row.key.set(key).is_err() {
            // The cursor hands out each index once; a second writer means
            // the cursor was reset mid-phase.
            tracing::error!(task = self.id, row = i, "row key derived twice");
        }
        Claim::Claimed
    }

    /// Reorder the permutation so the process phase visits rows by
    /// ascending key. The sort is deliberately unstable: tie order among
    /// equal keys is unspecified.
    pub fn sort_indices(&self) {
        let mut sorted = self.sorted.write();
        sorted.sort_unstable_by(|&a, &b| self.key_of(a).cmp(self.key_of(b)));
    }

    fn key_of(&self, index: usize) -> &str {
        self.rows[index].key.get().map(String::as_str).unwrap_or("")
    }

    /// Reset the shared cursor for reuse in the process phase.
    pub fn reset_cursor(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    /// Claim the next sorted position, process its row, and write the
    /// result into the slot of the row's original position. This is why
    /// response order equals submission order regardless of processing
    /// order.
    pub fn process_next(&self, strategy: &MatchStrategy) -> Claim {
        let claim = self.cursor.fetch_add(1, Ordering::Relaxed);
        if claim >= self.rows.len() {
            return Claim::Exhausted;
        }
        let index = self.sorted.read()[claim];
        let row = &self.rows[index];
        let key = row.key.get().map(String::as_str).unwrap_or("");
        let line = strategy.process(key, &row.text, self.diagnostics);
        if self.responses[index].set(line).is_err() {
            tracing::error!(task = self.id, row = index, "response slot written twice");
        }
        Claim::Claimed
    }

    /// Fire the completion signal with the assembled response.
    pub fn finish(&self) {
        let lines = self
            .responses
            .iter()
            .map(|slot| slot.get().cloned().unwrap_or_default())
            .collect();
        self.signal.complete(Response::new(lines));
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("rows", &self.rows.len())
            .field("stop", &self.stop)
            .finish()
    }
}
