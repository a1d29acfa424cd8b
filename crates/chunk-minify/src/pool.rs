//! The seam between the session and whatever actually runs minify tasks.

use std::future::Future;

use cell_minify_proto::{MinifyOutput, MinifyTask};

use crate::process_pool::{ProcessPool, ProcessPoolFactory};
use crate::thread_pool::{ThreadPool, ThreadPoolFactory};
use crate::Result;

// ============================================================================
// Traits
// ============================================================================

/// A set of workers that runs minify tasks.
///
/// `run` may be called concurrently; tasks beyond the pool's capacity wait
/// for a free worker. `shutdown` is called once, after the last task settled.
pub trait WorkerPool: Send + Sync + 'static {
    fn run(&self, task: MinifyTask) -> impl Future<Output = Result<MinifyOutput>> + Send;

    fn shutdown(&self) -> impl Future<Output = ShutdownReport> + Send;
}

/// Creates pools on demand. The session calls this each time it goes from
/// idle to active.
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: WorkerPool;

    fn create(&self, max_workers: usize) -> Result<Self::Pool>;
}

/// How a pool went down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// At least one worker had to be killed after the grace period
    pub forced_exit: bool,
}

// ============================================================================
// Backend dispatch
// ============================================================================

/// Factory for whichever backend the options selected
#[derive(Debug)]
pub enum BackendFactory {
    Process(ProcessPoolFactory),
    Thread(ThreadPoolFactory),
}

/// Pool for whichever backend the options selected
pub enum BackendPool {
    Process(ProcessPool),
    Thread(ThreadPool),
}

impl PoolFactory for BackendFactory {
    type Pool = BackendPool;

    fn create(&self, max_workers: usize) -> Result<BackendPool> {
        match self {
            BackendFactory::Process(factory) => factory.create(max_workers).map(BackendPool::Process),
            BackendFactory::Thread(factory) => factory.create(max_workers).map(BackendPool::Thread),
        }
    }
}

impl WorkerPool for BackendPool {
    async fn run(&self, task: MinifyTask) -> Result<MinifyOutput> {
        match self {
            BackendPool::Process(pool) => pool.run(task).await,
            BackendPool::Thread(pool) => pool.run(task).await,
        }
    }

    async fn shutdown(&self) -> ShutdownReport {
        match self {
            BackendPool::Process(pool) => pool.shutdown().await,
            BackendPool::Thread(pool) => pool.shutdown().await,
        }
    }
}
