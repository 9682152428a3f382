//! N-party phase barrier with a leader-run completion action.
//!
//! Every worker arrives once per phase; the last arriver (the elected
//! leader for that cycle, not deterministic) runs the completion closure
//! while the others stay parked, so the action always executes exactly
//! once per cycle before any party is released. A generation counter
//! distinguishes cycles so a fast thread cannot lap a slow one.

use parking_lot::{Condvar, Mutex};

struct BarrierState {
    arrived: usize,
    generation: u64,
}

pub struct PhaseBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl PhaseBarrier {
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "barrier needs at least one party");
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Arrive at the barrier. The Nth arriver runs `completion` and then
    /// releases everyone; the rest block until the cycle advances.
    ///
    /// `completion` may itself block (the controller's second-phase action
    /// waits on the pending-task queue); the parked parties hold no locks
    /// while waiting, so that is safe.
    pub fn arrive<F: FnOnce()>(&self, completion: F) {
        let mut state = self.state.lock();
        state.arrived += 1;
        if state.arrived == self.parties {
            completion();
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cond.notify_all();
        } else {
            let generation = state.generation;
            while state.generation == generation {
                self.cond.wait(&mut state);
            }
        }
    }
}
