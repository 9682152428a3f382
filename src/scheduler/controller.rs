//! Batch coordinator: a fixed pool of persistent workers draining one
//! task at a time in two barrier-synchronized phases.
//!
//! The controller gives the system its two scheduling guarantees: at most
//! one task is active across the whole pool at any instant (strict FIFO
//! cross-task serialization), while up to N workers cooperate row-by-row
//! inside that task. Workers rendezvous twice per task: after the
//! preprocess drain the cycle leader sorts the index permutation and
//! resets the claim cursor, and after the process drain the leader fires
//! the completion signal and blocks everyone on the next queued task.
//!
//! The controller is an explicitly constructed object, not a process-wide
//! singleton: the server owns one and hands it to every session, and
//! tests build as many independent instances as they like.
//!
//! A worker that fails its phase loop logs and exits, permanently
//! reducing effective intra-task parallelism for the process lifetime;
//! the barrier is not reconstituted. The pure-Rust phase path has no
//! fallible step left, so this remains a documented weakness rather than
//! an observed one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::protocol::{RequestHeader, Response};
use crate::strategy::MatchStrategy;
use crate::telemetry;

use super::barrier::PhaseBarrier;
use super::queue::TaskQueue;
use super::task::{Claim, Task};

/// Configuration for the controller's worker pool.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of persistent worker threads (0 = one per CPU).
    pub worker_threads: usize,
    /// Thread name prefix.
    pub thread_name_prefix: String,
    /// Thread stack size in bytes (0 = platform default).
    pub stack_size: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name_prefix: "bid-worker".to_string(),
            stack_size: 0,
        }
    }
}

impl ControllerConfig {
    pub fn with_threads(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Default::default()
        }
    }

    fn effective_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("task controller is stopped")]
    Stopped,
}

struct ControllerShared {
    queue: TaskQueue,
    barrier: PhaseBarrier,
    /// Task currently being drained. Replaced only by the cycle leader
    /// while every other worker is parked at the barrier.
    current: RwLock<Arc<Task>>,
    strategy: MatchStrategy,
    shutdown: AtomicBool,
}

/// Coordinator owning the fixed worker pool and the pending-task queue.
pub struct TaskController {
    shared: Arc<ControllerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_task_id: AtomicU64,
    stopped: AtomicBool,
}

impl TaskController {
    /// Spawn the worker pool. An empty placeholder task is installed so
    /// the barrier has a valid subject before the first real submission.
    pub fn new(config: ControllerConfig, strategy: MatchStrategy) -> Arc<Self> {
        let parties = config.effective_threads();
        let shared = Arc::new(ControllerShared {
            queue: TaskQueue::new(),
            barrier: PhaseBarrier::new(parties),
            current: RwLock::new(Task::placeholder()),
            strategy,
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(parties);
        for id in 0..parties {
            let shared = Arc::clone(&shared);
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, id));
            if config.stack_size > 0 {
                builder = builder.stack_size(config.stack_size);
            }
            match builder.spawn(move || worker_loop(&shared)) {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    // Spawn failure at startup shrinks the pool below the
                    // barrier party count and would wedge it; treat as fatal.
                    panic!("failed to spawn controller worker {id}: {error}");
                }
            }
        }

        tracing::info!(workers = parties, "task controller started");
        Arc::new(Self {
            shared,
            workers: Mutex::new(workers),
            next_task_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        })
    }

    /// Number of persistent workers cooperating on each task.
    pub fn worker_threads(&self) -> usize {
        self.shared.barrier.parties()
    }

    /// Number of tasks waiting behind the active one.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Submit one batch and block until exactly that batch has been fully
    /// processed. Tasks complete in strict submission order.
    pub fn submit_task(
        &self,
        header: &RequestHeader,
        raw: &[u8],
    ) -> Result<Response, ControllerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ControllerError::Stopped);
        }
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (task, waiter) = Task::new(id, header, raw);
        tracing::debug!(task = id, rows = task.len(), "batch submitted");
        if !self.shared.queue.push(task) {
            // Lost the race against stop(): the queue is already closed.
            return Err(ControllerError::Stopped);
        }
        Ok(waiter.wait())
    }

    /// Stop the worker pool and join every thread. Idempotent. The queue
    /// is closed atomically with the sentinel push, so every submission
    /// accepted before the close still completes in order.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("task controller stopping");
        self.shared.queue.close_with(Task::stop_sentinel());

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("controller worker panicked during shutdown");
            }
        }
    }
}

impl Drop for TaskController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &ControllerShared) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let task = Arc::clone(&shared.current.read());

        // PREPROCESS: claim rows until exhausted, then rendezvous. The
        // leader sorts the permutation and rewinds the cursor before any
        // worker enters the process phase.
        while task.preprocess_next(&shared.strategy) == Claim::Claimed {}
        shared.barrier.arrive(|| {
            task.sort_indices();
            task.reset_cursor();
        });

        // PROCESS: claim sorted positions until exhausted, rendezvous
        // again. The leader completes the batch and pulls the next task
        // while all parties are blocked together.
        while task.process_next(&shared.strategy) == Claim::Claimed {}
        shared.barrier.arrive(|| {
            task.finish();
            if task.id() != 0 {
                telemetry::record_batch_completed(task.len(), task.age());
            }
            let next = shared.queue.pop_blocking();
            if next.is_stop() {
                shared.shutdown.store(true, Ordering::Release);
            }
            *shared.current.write() = next;
        });
    }
    tracing::debug!("controller worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn echo_controller(threads: usize) -> Arc<TaskController> {
        TaskController::new(ControllerConfig::with_threads(threads), MatchStrategy::Echo)
    }

    #[test]
    fn submit_returns_rows_in_submission_order() {
        let controller = echo_controller(3);
        let batch = b"c\na\ne\nb\nd";
        let header = RequestHeader::for_batch(MessageType::EchoRequest, batch.len());

        let response = controller.submit_task(&header, batch).unwrap();
        assert_eq!(response.lines, vec!["c", "a", "e", "b", "d"]);
        controller.stop();
    }

    #[test]
    fn empty_batch_is_processed() {
        let controller = echo_controller(2);
        let header = RequestHeader::for_batch(MessageType::EchoRequest, 0);
        let response = controller.submit_task(&header, b"").unwrap();
        assert!(response.is_empty());
        controller.stop();
    }

    #[test]
    fn stop_is_idempotent_and_rejects_new_submissions() {
        let controller = echo_controller(2);
        controller.stop();
        controller.stop();

        let header = RequestHeader::for_batch(MessageType::EchoRequest, 1);
        assert!(matches!(
            controller.submit_task(&header, b"x"),
            Err(ControllerError::Stopped)
        ));
    }

    #[test]
    fn single_worker_controller_still_completes() {
        let controller = echo_controller(1);
        let header = RequestHeader::for_batch(MessageType::EchoRequest, 3);
        let response = controller.submit_task(&header, b"a\nb").unwrap();
        assert_eq!(response.lines, vec!["a", "b"]);
        controller.stop();
    }
}
