//! Pending-task queue.
//!
//! Unbounded FIFO guarded by a mutex/condvar pair. Tasks are pushed by
//! submitting sessions and popped only from the controller's
//! phase-completion step, which is what keeps at most one task active
//! across the whole worker pool. Closing the queue and enqueueing the
//! stop sentinel happen under one lock, so no submission can ever land
//! behind the sentinel and strand its caller.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::telemetry;

use super::task::Task;

struct QueueState {
    pending: VecDeque<Arc<Task>>,
    closed: bool,
}

pub struct TaskQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue a task. Never blocks; the queue is unbounded. Returns
    /// `false` once the queue has been closed.
    pub fn push(&self, task: Arc<Task>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.pending.push_back(task);
        telemetry::record_queue_depth(state.pending.len());
        drop(state);
        self.cond.notify_one();
        true
    }

    /// Close the queue to further submissions and enqueue the stop
    /// sentinel as the final item, atomically.
    pub fn close_with(&self, sentinel: Arc<Task>) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.push_back(sentinel);
        drop(state);
        self.cond.notify_one();
    }

    /// Block until a task is available, then take the oldest one.
    pub fn pop_blocking(&self) -> Arc<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.pending.pop_front() {
                telemetry::record_queue_depth(state.pending.len());
                return task;
            }
            self.cond.wait(&mut state);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pop_returns_fifo_order() {
        let queue = TaskQueue::new();
        assert!(queue.push(Task::placeholder()));
        queue.close_with(Task::stop_sentinel());

        assert!(!queue.pop_blocking().is_stop());
        assert!(queue.pop_blocking().is_stop());
        assert!(queue.is_empty());
    }

    #[test]
    fn push_after_close_is_refused() {
        let queue = TaskQueue::new();
        queue.close_with(Task::stop_sentinel());
        assert!(!queue.push(Task::placeholder()));
        // The sentinel stays the final item.
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_blocking().is_stop());
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(TaskQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking().is_stop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(Task::stop_sentinel());
        assert!(popper.join().unwrap());
    }
}
