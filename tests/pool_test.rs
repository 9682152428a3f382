//! Integration tests for the admission-controlled pools: non-blocking
//! push, ceiling statuses, and capacity-release notification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use bidmatch_core::protocol::AdmissionStatus;
use bidmatch_core::scheduler::{
    AdmissionTicket, MixedObjectPool, ObjectKind, Runnable, SessionPool,
};

/// Session stand-in that holds its pool slot until the test releases it.
struct GatedSession {
    kind: ObjectKind,
    gate: mpsc::Receiver<()>,
    started: Arc<AtomicUsize>,
}

impl Runnable for GatedSession {
    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn start(&mut self, _ticket: &AdmissionTicket) -> bool {
        // Run regardless of overload; the tests observe the ticket.
        true
    }

    fn run(&mut self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.recv_timeout(Duration::from_secs(5));
    }
}

struct NopSession {
    kind: ObjectKind,
    started: Arc<AtomicUsize>,
}

impl Runnable for NopSession {
    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn start(&mut self, _ticket: &AdmissionTicket) -> bool {
        true
    }

    fn run(&mut self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
}

fn gated(
    kind: ObjectKind,
    started: &Arc<AtomicUsize>,
) -> (Box<GatedSession>, mpsc::Sender<()>) {
    let (tx, rx) = mpsc::channel();
    let session = Box::new(GatedSession {
        kind,
        gate: rx,
        started: Arc::clone(started),
    });
    (session, tx)
}

fn wait_for(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}

#[test]
fn push_never_blocks_while_the_queue_grows() {
    // One worker, every session parked: pushes past any ceiling must
    // still return promptly with a ticket.
    let pool = SessionPool::new(2, 1);
    let started = Arc::new(AtomicUsize::new(0));
    let mut gates = Vec::new();

    let before = Instant::now();
    let mut tickets = Vec::new();
    for _ in 0..20 {
        let (session, gate) = gated(ObjectKind::TcpSession, &started);
        tickets.push(pool.push(session));
        gates.push(gate);
    }
    assert!(before.elapsed() < Duration::from_secs(1));
    assert_eq!(pool.total_live(), 20);

    for gate in &gates {
        let _ = gate.send(());
    }
    wait_for(|| started.load(Ordering::SeqCst) == 20);
    pool.stop();
}

#[test]
fn pushes_beyond_kind_ceiling_report_max_of_type() {
    let pool = MixedObjectPool::new(HashMap::from([(ObjectKind::TcpSession, 2)]), 1);
    let started = Arc::new(AtomicUsize::new(0));
    let mut gates = Vec::new();

    let mut push = |kind| {
        let (session, gate) = gated(kind, &started);
        gates.push(gate);
        pool.push(session)
    };

    assert_eq!(push(ObjectKind::TcpSession).status(), AdmissionStatus::None);
    assert_eq!(push(ObjectKind::TcpSession).status(), AdmissionStatus::None);
    // Third live object of the same kind is over the ceiling.
    assert_eq!(
        push(ObjectKind::TcpSession).status(),
        AdmissionStatus::MaxOfType
    );
    // A different kind still has headroom.
    assert_eq!(push(ObjectKind::PipeSession).status(), AdmissionStatus::None);

    for gate in &gates {
        let _ = gate.send(());
    }
    wait_for(|| started.load(Ordering::SeqCst) == 4);
    pool.stop();
}

#[test]
fn pushes_beyond_aggregate_ceiling_report_max_total() {
    let pool = SessionPool::new(2, 1);
    let started = Arc::new(AtomicUsize::new(0));
    let mut gates = Vec::new();

    for _ in 0..2 {
        let (session, gate) = gated(ObjectKind::TcpSession, &started);
        assert_eq!(pool.push(session).status(), AdmissionStatus::None);
        gates.push(gate);
    }

    // Mixing kinds does not help against the aggregate ceiling, and the
    // aggregate verdict wins over the per-kind one.
    let (session, gate) = gated(ObjectKind::PipeSession, &started);
    assert_eq!(pool.push(session).status(), AdmissionStatus::MaxTotal);
    gates.push(gate);

    for gate in &gates {
        let _ = gate.send(());
    }
    wait_for(|| started.load(Ordering::SeqCst) == 3);
    pool.stop();
}

#[test]
fn capacity_release_clears_queued_overloaded_ticket() {
    let pool = MixedObjectPool::new(HashMap::from([(ObjectKind::TcpSession, 1)]), 1);
    let started = Arc::new(AtomicUsize::new(0));

    let (first, first_gate) = gated(ObjectKind::TcpSession, &started);
    let first_ticket = pool.push(first);
    assert_eq!(first_ticket.status(), AdmissionStatus::None);
    wait_for(|| started.load(Ordering::SeqCst) == 1);

    let second_ticket = pool.push(Box::new(NopSession {
        kind: ObjectKind::TcpSession,
        started: Arc::clone(&started),
    }));
    assert_eq!(second_ticket.status(), AdmissionStatus::MaxOfType);

    let waiter = {
        let ticket = Arc::clone(&second_ticket);
        thread::spawn(move || {
            ticket.wait_until_clear();
            ticket.status()
        })
    };

    // Finishing the first session frees its slot; the release must flip
    // the queued ticket back to None and wake the waiter.
    let _ = first_gate.send(());
    assert_eq!(waiter.join().unwrap(), AdmissionStatus::None);

    wait_for(|| started.load(Ordering::SeqCst) == 2);
    pool.stop();
}

/// Session stand-in that records how many instances of its kind are
/// inside run() at once.
struct TrackedSession {
    kind: ObjectKind,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    done: Arc<AtomicUsize>,
}

impl Runnable for TrackedSession {
    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn start(&mut self, _ticket: &AdmissionTicket) -> bool {
        true
    }

    fn run(&mut self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(200));
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn running_ceiling_holds_with_contending_workers() {
    // Four workers race the dispatch scan for a kind capped at one
    // concurrent execution; the running count must be raised before the
    // queue lock is released, so the peak can never exceed the ceiling.
    let pool = MixedObjectPool::new(HashMap::from([(ObjectKind::TcpSession, 1)]), 4);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        pool.push(Box::new(TrackedSession {
            kind: ObjectKind::TcpSession,
            active: Arc::clone(&active),
            peak: Arc::clone(&peak),
            done: Arc::clone(&done),
        }));
    }

    wait_for(|| done.load(Ordering::SeqCst) == 100);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    pool.stop();
}

#[test]
fn release_clears_only_tickets_whose_constraints_pass() {
    // Two kinds capped at one each, one worker. Freeing a tcp slot must
    // clear the queued tcp ticket and leave the still-over-ceiling pipe
    // ticket overloaded.
    let pool = MixedObjectPool::new(
        HashMap::from([(ObjectKind::TcpSession, 1), (ObjectKind::PipeSession, 1)]),
        1,
    );
    let started = Arc::new(AtomicUsize::new(0));

    let (tcp1, tcp1_gate) = gated(ObjectKind::TcpSession, &started);
    assert_eq!(pool.push(tcp1).status(), AdmissionStatus::None);
    wait_for(|| started.load(Ordering::SeqCst) == 1);

    let (tcp2, tcp2_gate) = gated(ObjectKind::TcpSession, &started);
    let tcp2_ticket = pool.push(tcp2);
    assert_eq!(tcp2_ticket.status(), AdmissionStatus::MaxOfType);

    let (pipe1, pipe1_gate) = gated(ObjectKind::PipeSession, &started);
    assert_eq!(pool.push(pipe1).status(), AdmissionStatus::None);
    let (pipe2, pipe2_gate) = gated(ObjectKind::PipeSession, &started);
    let pipe2_ticket = pool.push(pipe2);
    assert_eq!(pipe2_ticket.status(), AdmissionStatus::MaxOfType);

    let _ = tcp1_gate.send(());
    assert!(tcp2_ticket.wait_until_clear_timeout(Duration::from_secs(2)));
    // Two pipe objects are still live, so that ticket stays overloaded.
    assert_eq!(pipe2_ticket.status(), AdmissionStatus::MaxOfType);

    let _ = tcp2_gate.send(());
    let _ = pipe1_gate.send(());
    let _ = pipe2_gate.send(());
    wait_for(|| started.load(Ordering::SeqCst) == 4);
    pool.stop();
}

#[test]
fn overloaded_sessions_still_run_once_capacity_frees() {
    let pool = SessionPool::new(1, 2);
    let started = Arc::new(AtomicUsize::new(0));

    let (first, first_gate) = gated(ObjectKind::PipeSession, &started);
    pool.push(first);
    wait_for(|| started.load(Ordering::SeqCst) == 1);

    let ticket = pool.push(Box::new(NopSession {
        kind: ObjectKind::PipeSession,
        started: Arc::clone(&started),
    }));
    assert!(ticket.status().is_overloaded());

    let _ = first_gate.send(());
    assert!(ticket.wait_until_clear_timeout(Duration::from_secs(2)));
    wait_for(|| started.load(Ordering::SeqCst) == 2);
    pool.stop();
}
