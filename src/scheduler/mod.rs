//! Batch scheduling module.
//!
//! Owns the two halves of the core: the barrier-synchronized task
//! pipeline (task, queue, controller) and the admission-controlled
//! worker pools (runnable contract, pool flavors).

mod barrier;
mod controller;
mod pool;
mod queue;
mod runnable;
mod signal;
mod task;

pub use barrier::PhaseBarrier;
pub use controller::{ControllerConfig, ControllerError, TaskController};
pub use pool::{MixedObjectPool, PoolConfig, SessionPool, ThreadPool};
pub use queue::TaskQueue;
pub use runnable::{AdmissionTicket, CountGuard, ObjectCounter, ObjectKind, Runnable};
pub use signal::CompletionWaiter;
pub use task::{Claim, Task};
