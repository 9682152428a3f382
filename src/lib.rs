//! bidmatch-core
//!
//! Scheduler core of a bid-matching batch server. Sessions in the
//! surrounding transport layer (TCP and named pipes, not part of this
//! crate) decode request batches and call
//! [`scheduler::TaskController::submit_task`], which blocks until exactly
//! that batch has been processed and returns the responses in submission
//! order.
//!
//! # Scheduling model
//!
//! - At most one batch is active across the whole worker pool at any
//!   instant; batches complete in strict submission order.
//! - Within the active batch, up to N persistent workers cooperate
//!   row-by-row through an atomic claim cursor and rendezvous at a
//!   two-phase barrier (preprocess, then key-sorted process).
//! - Acceptors and sessions admit themselves through the
//!   [`scheduler::SessionPool`] / [`scheduler::MixedObjectPool`] family,
//!   which never blocks or rejects an admission: overload rides back as
//!   an [`protocol::AdmissionStatus`] for the peer to retry later.
//!
//! Everything runs on native OS threads; there is no async runtime in
//! this core.

pub mod config;
pub mod protocol;
pub mod scheduler;
pub mod strategy;
pub mod telemetry;

use std::collections::HashMap;
use std::sync::Arc;

use scheduler::{
    ControllerConfig, MixedObjectPool, ObjectKind, SessionPool, TaskController,
};
use strategy::{BidTable, MatchStrategy};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    /// Aggregate ceiling for the session pool.
    pub max_sessions: usize,
    pub session_pool_threads: usize,
    /// Per-kind ceilings for the mixed acceptor/session pool.
    pub max_tcp_objects: usize,
    pub max_pipe_objects: usize,
    pub mixed_pool_threads: usize,
    /// Business strategy, selected once before traffic starts.
    pub strategy: MatchStrategy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            max_sessions: 64,
            session_pool_threads: 8,
            max_tcp_objects: 32,
            max_pipe_objects: 32,
            mixed_pool_threads: 4,
            strategy: MatchStrategy::AdMatch(BidTable::new()),
        }
    }
}

impl RuntimeConfig {
    /// Build from environment configuration plus an already-loaded bid
    /// inventory (the bootstrap layer reads the file).
    pub fn from_env(env: &config::EnvConfig, bids: BidTable) -> Self {
        let strategy = MatchStrategy::from_name(&env.strategy, bids).unwrap_or_else(|| {
            tracing::warn!(strategy = env.strategy, "unknown strategy, using echo");
            MatchStrategy::Echo
        });
        Self {
            controller: env.controller.clone(),
            max_sessions: env.max_sessions,
            session_pool_threads: env.session_pool_threads,
            max_tcp_objects: env.max_tcp_objects,
            max_pipe_objects: env.max_pipe_objects,
            mixed_pool_threads: env.mixed_pool_threads,
            strategy,
        }
    }
}

/// The assembled scheduler core: one explicitly constructed controller
/// plus the two admission pools, owned by the embedding server and
/// handed to sessions by reference.
pub struct Runtime {
    controller: Arc<TaskController>,
    session_pool: SessionPool,
    mixed_pool: MixedObjectPool,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(strategy = config.strategy.name(), "building runtime");
        let controller = TaskController::new(config.controller, config.strategy);
        let session_pool = SessionPool::new(config.max_sessions, config.session_pool_threads);
        let mixed_pool = MixedObjectPool::new(
            HashMap::from([
                (ObjectKind::TcpAcceptor, config.max_tcp_objects),
                (ObjectKind::TcpSession, config.max_tcp_objects),
                (ObjectKind::PipeAcceptor, config.max_pipe_objects),
                (ObjectKind::PipeSession, config.max_pipe_objects),
            ]),
            config.mixed_pool_threads,
        );
        Self {
            controller,
            session_pool,
            mixed_pool,
        }
    }

    pub fn controller(&self) -> &Arc<TaskController> {
        &self.controller
    }

    pub fn session_pool(&self) -> &SessionPool {
        &self.session_pool
    }

    pub fn mixed_pool(&self) -> &MixedObjectPool {
        &self.mixed_pool
    }

    /// Stop the controller and both pools. Idempotent.
    pub fn shutdown(&self) {
        self.controller.stop();
        self.session_pool.stop();
        self.mixed_pool.stop();
    }
}
