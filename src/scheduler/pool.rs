//! Admission-controlled worker pools.
//!
//! [`ThreadPool`] bounds how many runnables of each kind, and in
//! aggregate, may be alive at once - without ever blocking or rejecting
//! the admission call. `push` always enqueues; overload is annotated on
//! the returned [`AdmissionTicket`] for the caller to relay to its peer
//! as "retry later". Worker threads are created lazily, one whenever the
//! pool tracks more live objects than it has threads, up to the
//! configured thread ceiling, and retired only at pool shutdown.
//!
//! Dispatch scans the queue from the front and takes the first runnable
//! whose kind still has running headroom, leaving saturated kinds queued
//! for a later pass. That bounded-fairness scan is what stops one kind
//! from starving the others when heterogeneous runnables share one pool.
//!
//! Two flavors wrap the same algorithm: [`SessionPool`] adds one
//! aggregate ceiling across every kind it hosts, [`MixedObjectPool`]
//! gives each kind its own ceiling.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::protocol::AdmissionStatus;
use crate::telemetry;

use super::runnable::{AdmissionTicket, CountGuard, ObjectCounter, ObjectKind, Runnable};

/// Configuration for one admission pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker thread ceiling.
    pub max_threads: usize,
    /// Per-kind live-object ceilings; kinds not listed use the default.
    pub kind_ceilings: HashMap<ObjectKind, usize>,
    /// Ceiling for kinds absent from `kind_ceilings`.
    pub default_kind_ceiling: usize,
    /// Aggregate live-object ceiling across all kinds, if any.
    pub max_total: Option<usize>,
    /// Thread name prefix.
    pub thread_name_prefix: String,
    /// Thread stack size in bytes (0 = platform default).
    pub stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: 4,
            kind_ceilings: HashMap::new(),
            default_kind_ceiling: 32,
            max_total: None,
            thread_name_prefix: "pool-worker".to_string(),
            stack_size: 0,
        }
    }
}

impl PoolConfig {
    fn ceiling(&self, kind: ObjectKind) -> usize {
        self.kind_ceilings
            .get(&kind)
            .copied()
            .unwrap_or(self.default_kind_ceiling)
    }
}

struct Admitted {
    runnable: Box<dyn Runnable>,
    ticket: Arc<AdmissionTicket>,
    /// Counts the object as live until its run/stop finished; dropping it
    /// is the capacity-release notification.
    #[allow(dead_code)]
    live_guard: LiveGuard,
}

enum PoolItem {
    Work(Admitted),
    Stop,
}

struct PoolState {
    queue: VecDeque<PoolItem>,
    threads: usize,
    shutdown: bool,
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    cond: Condvar,
    /// Live objects: queued plus running, per kind.
    live: ObjectCounter,
    /// Currently running objects, per kind; drives the fairness scan.
    running: ObjectCounter,
    /// Admission registry: ticket handles for queued runnables, so a
    /// capacity release can clear their status explicitly.
    registry: DashMap<u64, Arc<AdmissionTicket>>,
}

impl PoolShared {
    /// Ceiling evaluation for one kind at current live counts. The
    /// aggregate verdict wins when both ceilings are exceeded.
    fn evaluate(&self, kind: ObjectKind) -> AdmissionStatus {
        let mut status = AdmissionStatus::None;
        if self.live.live(kind) > self.config.ceiling(kind) {
            status = AdmissionStatus::MaxOfType;
        }
        if let Some(max_total) = self.config.max_total {
            if self.live.total() > max_total {
                status = AdmissionStatus::MaxTotal;
            }
        }
        status
    }

    /// True when the item may be dispatched under the running ceilings.
    fn dispatchable(&self, item: &PoolItem) -> bool {
        match item {
            PoolItem::Stop => true,
            PoolItem::Work(admitted) => {
                let kind = admitted.runnable.kind();
                if self.running.live(kind) >= self.config.ceiling(kind) {
                    return false;
                }
                match self.config.max_total {
                    Some(max_total) => self.running.total() < max_total,
                    None => true,
                }
            }
        }
    }

    /// Capacity-release notification: re-evaluate every ticket still in
    /// the admission registry (one entry per queued runnable), clear the
    /// ones whose constraints now pass, and wake both their waiters and
    /// the pool workers.
    fn on_release(&self) {
        for entry in self.registry.iter() {
            let ticket = entry.value();
            if ticket.status().is_overloaded() {
                let verdict = self.evaluate(ticket.kind());
                if !verdict.is_overloaded() {
                    tracing::debug!(
                        ticket = ticket.id(),
                        kind = ticket.kind().as_str(),
                        "admission overload cleared"
                    );
                    ticket.set_status(AdmissionStatus::None);
                }
            }
        }
        self.cond.notify_all();
    }
}

/// Holds an object's live count and notifies the pool when it drops.
struct LiveGuard {
    count: Option<CountGuard>,
    pool: Weak<PoolShared>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        // Decrement before notifying so re-evaluation sees the freed slot.
        self.count.take();
        if let Some(shared) = self.pool.upgrade() {
            shared.on_release();
        }
    }
}

/// Generic admission-controlled pool. Usually used through
/// [`SessionPool`] or [`MixedObjectPool`].
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_ticket: AtomicU64,
    stopped: AtomicBool,
}

impl ThreadPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    threads: 0,
                    shutdown: false,
                }),
                cond: Condvar::new(),
                live: ObjectCounter::new(),
                running: ObjectCounter::new(),
                registry: DashMap::new(),
            }),
            handles: Mutex::new(Vec::new()),
            next_ticket: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    /// Admit a runnable. Never blocks, never fails: the runnable is
    /// always enqueued, and any ceiling violation rides back as status
    /// on the returned ticket.
    pub fn push(&self, runnable: Box<dyn Runnable>) -> Arc<AdmissionTicket> {
        let kind = runnable.kind();
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let mut state = self.shared.state.lock();

        // Count this object first so the ceilings see it.
        let live_guard = LiveGuard {
            count: Some(self.shared.live.acquire(kind)),
            pool: Arc::downgrade(&self.shared),
        };
        let status = self.shared.evaluate(kind);
        if status.is_overloaded() {
            telemetry::record_admission_overload(kind.as_str(), status.as_str());
            tracing::debug!(
                ticket = id,
                kind = kind.as_str(),
                status = status.as_str(),
                "admission over ceiling"
            );
        }

        // Lazy spawn rule: more live objects than threads, ceiling permitting.
        if !state.shutdown
            && self.shared.live.total() > state.threads
            && state.threads < self.shared.config.max_threads
        {
            self.spawn_worker(&mut state);
        }

        let ticket = Arc::new(AdmissionTicket::new(id, kind, status));
        self.shared.registry.insert(id, Arc::clone(&ticket));
        state.queue.push_back(PoolItem::Work(Admitted {
            runnable,
            ticket: Arc::clone(&ticket),
            live_guard,
        }));
        drop(state);
        self.shared.cond.notify_one();
        ticket
    }

    fn spawn_worker(&self, state: &mut PoolState) {
        let index = state.threads;
        let shared = Arc::clone(&self.shared);
        let mut builder = thread::Builder::new()
            .name(format!("{}-{}", self.shared.config.thread_name_prefix, index));
        if self.shared.config.stack_size > 0 {
            builder = builder.stack_size(self.shared.config.stack_size);
        }
        match builder.spawn(move || pool_worker(&shared)) {
            Ok(handle) => {
                state.threads += 1;
                self.handles.lock().push(handle);
            }
            Err(error) => {
                tracing::error!(%error, "failed to spawn pool worker; continuing with current threads");
            }
        }
    }

    /// Live objects of one kind (queued plus running).
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.shared.live.live(kind)
    }

    /// Live objects across all kinds.
    pub fn total_live(&self) -> usize {
        self.shared.live.total()
    }

    /// Worker threads spawned so far.
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().threads
    }

    /// Stop all workers: one stop sentinel per live thread, then join.
    /// Guarded to run at most once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        for _ in 0..state.threads {
            state.queue.push_back(PoolItem::Stop);
        }
        drop(state);
        self.shared.cond.notify_all();

        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("pool worker panicked during shutdown");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pool_worker(shared: &Arc<PoolShared>) {
    loop {
        let (item, running) = {
            let mut state = shared.state.lock();
            loop {
                let position = state
                    .queue
                    .iter()
                    .position(|item| shared.dispatchable(item));
                if let Some(position) = position {
                    match state.queue.remove(position) {
                        Some(item) => {
                            // Claim the running slot and retire the
                            // registry entry while the queue lock is still
                            // held; a concurrent scan must see the count
                            // already raised, or it could pass the same
                            // ceiling check for a second runnable.
                            let running = match &item {
                                PoolItem::Work(admitted) => {
                                    shared.registry.remove(&admitted.ticket.id());
                                    Some(shared.running.acquire(admitted.runnable.kind()))
                                }
                                PoolItem::Stop => None,
                            };
                            break (item, running);
                        }
                        None => continue,
                    }
                }
                shared.cond.wait(&mut state);
            }
        };

        match item {
            PoolItem::Stop => break,
            PoolItem::Work(mut admitted) => {
                if admitted.runnable.start(&admitted.ticket) {
                    admitted.runnable.run();
                }
                admitted.runnable.stop();
                drop(running);
                // Dropping `admitted` releases the live slot and triggers
                // the capacity-release notification.
            }
        }
    }
    tracing::debug!("pool worker exiting");
}

/// Pool flavor for homogeneous session traffic: every kind it hosts
/// shares one aggregate sessions ceiling.
pub struct SessionPool {
    pool: ThreadPool,
}

impl SessionPool {
    pub fn new(max_sessions: usize, max_threads: usize) -> Self {
        Self::with_prefix(max_sessions, max_threads, "session-worker")
    }

    pub fn with_prefix(max_sessions: usize, max_threads: usize, prefix: &str) -> Self {
        Self {
            pool: ThreadPool::new(PoolConfig {
                max_threads,
                kind_ceilings: HashMap::new(),
                // Per-kind headroom is bounded by the aggregate anyway.
                default_kind_ceiling: max_sessions,
                max_total: Some(max_sessions),
                thread_name_prefix: prefix.to_string(),
                stack_size: 0,
            }),
        }
    }

    pub fn push(&self, runnable: Box<dyn Runnable>) -> Arc<AdmissionTicket> {
        self.pool.push(runnable)
    }

    pub fn total_live(&self) -> usize {
        self.pool.total_live()
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    pub fn stop(&self) {
        self.pool.stop();
    }
}

/// Pool flavor for heterogeneous acceptor/session mixes: each kind gets
/// its own ceiling, and the fairness scan keeps saturated kinds from
/// starving the rest.
pub struct MixedObjectPool {
    pool: ThreadPool,
}

impl MixedObjectPool {
    pub fn new(kind_ceilings: HashMap<ObjectKind, usize>, max_threads: usize) -> Self {
        Self {
            pool: ThreadPool::new(PoolConfig {
                max_threads,
                kind_ceilings,
                default_kind_ceiling: 32,
                max_total: None,
                thread_name_prefix: "mixed-worker".to_string(),
                stack_size: 0,
            }),
        }
    }

    pub fn push(&self, runnable: Box<dyn Runnable>) -> Arc<AdmissionTicket> {
        self.pool.push(runnable)
    }

    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.pool.live_count(kind)
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    pub fn stop(&self) {
        self.pool.stop();
    }
}
