//! The poolable-unit contract and its admission bookkeeping.
//!
//! Anything that wants to execute on an admission-controlled pool
//! implements [`Runnable`]. The pool tracks how many objects of each kind
//! are alive through [`ObjectCounter`] (lock-free, tied to guard
//! lifetime) and hands every admission an [`AdmissionTicket`] carrying
//! the overload status for that object. Overload is a status, never an
//! error: the ticket's owner decides whether to proceed, report
//! backpressure to its peer, or block until the status clears.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::protocol::AdmissionStatus;

/// The closed set of poolable object kinds in the surrounding server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    TcpAcceptor,
    TcpSession,
    PipeAcceptor,
    PipeSession,
}

impl ObjectKind {
    /// Label used for metrics and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::TcpAcceptor => "tcp_acceptor",
            ObjectKind::TcpSession => "tcp_session",
            ObjectKind::PipeAcceptor => "pipe_acceptor",
            ObjectKind::PipeSession => "pipe_session",
        }
    }
}

/// A poolable unit of work.
///
/// The pool drives the lifecycle as `start` -> `run` -> `stop`. `start`
/// is the capacity check: returning `false` skips `run` (the default
/// declines when the ticket is marked overloaded; a session that would
/// rather run anyway and report "retry later" to its peer overrides
/// this). `stop` always runs, admitted or not.
pub trait Runnable: Send + 'static {
    fn kind(&self) -> ObjectKind;

    fn start(&mut self, ticket: &AdmissionTicket) -> bool {
        !ticket.status().is_overloaded()
    }

    fn run(&mut self);

    fn stop(&mut self) {}
}

/// Per-kind live-instance counters.
///
/// Incrementing hands back a [`CountGuard`] that decrements on drop, so
/// "how many of this kind are alive" needs no explicit bookkeeping at
/// the call sites.
#[derive(Debug, Default)]
pub struct ObjectCounter {
    counts: DashMap<ObjectKind, Arc<AtomicUsize>>,
}

impl ObjectCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, kind: ObjectKind) -> Arc<AtomicUsize> {
        Arc::clone(
            &self
                .counts
                .entry(kind)
                .or_insert_with(|| Arc::new(AtomicUsize::new(0))),
        )
    }

    /// Count one live object of `kind` until the returned guard drops.
    pub fn acquire(&self, kind: ObjectKind) -> CountGuard {
        let cell = self.cell(kind);
        cell.fetch_add(1, Ordering::SeqCst);
        CountGuard { cell }
    }

    /// Live objects of one kind.
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.counts
            .get(&kind)
            .map(|cell| cell.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Live objects across all kinds.
    pub fn total(&self) -> usize {
        self.counts
            .iter()
            .map(|entry| entry.value().load(Ordering::SeqCst))
            .sum()
    }
}

/// RAII handle for one counted object.
#[derive(Debug)]
pub struct CountGuard {
    cell: Arc<AtomicUsize>,
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.cell.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Admission handle for one pushed runnable.
///
/// Carries the overload status assigned at push time. The status only
/// transitions back to [`AdmissionStatus::None`] on an explicit
/// capacity-release notification from the pool, never silently; waiters
/// can block on that transition.
#[derive(Debug)]
pub struct AdmissionTicket {
    id: u64,
    kind: ObjectKind,
    status: Mutex<AdmissionStatus>,
    cond: Condvar,
}

impl AdmissionTicket {
    pub(crate) fn new(id: u64, kind: ObjectKind, status: AdmissionStatus) -> Self {
        Self {
            id,
            kind,
            status: Mutex::new(status),
            cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn status(&self) -> AdmissionStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: AdmissionStatus) {
        *self.status.lock() = status;
        self.cond.notify_all();
    }

    /// Block until the status returns to `None`.
    pub fn wait_until_clear(&self) {
        let mut status = self.status.lock();
        while status.is_overloaded() {
            self.cond.wait(&mut status);
        }
    }

    /// Like [`wait_until_clear`](Self::wait_until_clear) with a deadline.
    /// Returns `true` when the status cleared in time.
    pub fn wait_until_clear_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut status = self.status.lock();
        while status.is_overloaded() {
            if self.cond.wait_until(&mut status, deadline).timed_out() {
                return !status.is_overloaded();
            }
        }
        true
    }
}
