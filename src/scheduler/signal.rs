//! Single-shot completion signal tying a submitted batch to its caller.
//!
//! The submitting session blocks on the waiter half until the worker that
//! finishes the batch fires the signal half. Firing twice is tolerated and
//! logged, never fatal: racing finishers are harmless by design.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::protocol::Response;

struct SignalInner {
    slot: Mutex<Option<Response>>,
    cond: Condvar,
}

/// Producer half, held by the task being processed.
pub(crate) struct CompletionSignal {
    inner: Arc<SignalInner>,
}

/// Consumer half, held by the submitting caller.
pub struct CompletionWaiter {
    inner: Arc<SignalInner>,
}

pub(crate) fn completion_pair() -> (CompletionSignal, CompletionWaiter) {
    let inner = Arc::new(SignalInner {
        slot: Mutex::new(None),
        cond: Condvar::new(),
    });
    (
        CompletionSignal { inner: Arc::clone(&inner) },
        CompletionWaiter { inner },
    )
}

impl CompletionSignal {
    /// Fire the signal. The first response wins; later fires are dropped
    /// with a warning.
    pub(crate) fn complete(&self, response: Response) {
        let mut slot = self.inner.slot.lock();
        if slot.is_some() {
            tracing::warn!("completion signal fired twice; keeping first response");
            return;
        }
        *slot = Some(response);
        self.inner.cond.notify_all();
    }
}

impl CompletionWaiter {
    /// Block until the signal fires, then take the response.
    pub fn wait(self) -> Response {
        let mut slot = self.inner.slot.lock();
        while slot.is_none() {
            self.inner.cond.wait(&mut slot);
        }
        // Exactly one waiter exists per signal, so take() always succeeds
        // once the loop exits.
        slot.take().unwrap_or_else(|| Response::new(Vec::new()))
    }
}
