//! Build-scoped pool lifecycle.
//!
//! The pool does not exist until the first chunk is submitted. Every submission
//! holds a reference to it; when the last in-flight submission settles, the pool
//! is shut down and the session goes back to idle. A later submission starts a
//! fresh pool.
//!
//! The session also owns the accumulated name cache, when there is one: it is
//! handed to every task and folded together with what each task sends back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8PathBuf;
use cell_minify_proto::{MinifyOutput, MinifyTask, NameCache};
use tracing::{debug, warn};

use crate::Result;
use crate::name_cache::{merge_name_cache, save_name_cache};
use crate::pool::{PoolFactory, WorkerPool};

enum PoolState<P> {
    Idle,
    Active { pool: Arc<P>, in_flight: usize },
}

pub struct Session<F: PoolFactory> {
    factory: F,
    max_workers: usize,
    state: Mutex<PoolState<F::Pool>>,
    /// Held while a pool is being created, so the state lock never is.
    starting: tokio::sync::Mutex<()>,

    /// `None` unless the build author opted into name caching.
    name_cache: Mutex<Option<NameCache>>,
    name_cache_file: Option<Utf8PathBuf>,
    saving: tokio::sync::Mutex<()>,

    pools_created: AtomicUsize,
    pools_torn_down: AtomicUsize,
}

impl<F: PoolFactory> Session<F> {
    pub fn new(factory: F, max_workers: usize) -> Self {
        Self {
            factory,
            max_workers: max_workers.max(1),
            state: Mutex::new(PoolState::Idle),
            starting: tokio::sync::Mutex::new(()),
            name_cache: Mutex::new(None),
            name_cache_file: None,
            saving: tokio::sync::Mutex::new(()),
            pools_created: AtomicUsize::new(0),
            pools_torn_down: AtomicUsize::new(0),
        }
    }

    /// Start tracking a name cache, seeded with `cache`.
    pub fn with_name_cache(mut self, cache: NameCache) -> Self {
        self.name_cache = Mutex::new(Some(cache));
        self
    }

    /// Save the name cache here every time the session goes idle.
    pub fn with_name_cache_file(mut self, path: Utf8PathBuf) -> Self {
        self.name_cache_file = Some(path);
        self
    }

    /// Run one task on the pool, starting the pool if needed.
    ///
    /// The pool is released whether the task succeeds or fails. Callers should
    /// drive the returned future to completion: dropping it midway leaves the
    /// pool active.
    pub async fn submit(&self, mut task: MinifyTask) -> Result<MinifyOutput> {
        let pool = self.acquire().await?;

        if let Some(cache) = self.lock_name_cache().as_ref() {
            task.options.name_cache = Some(cache.clone());
        }

        let result = pool.run(task).await;
        drop(pool);

        if let Ok(MinifyOutput {
            name_cache: Some(incoming),
            ..
        }) = &result
        {
            self.merge_name_cache(incoming);
        }

        self.release().await;
        result
    }

    /// Join the active pool, or create one.
    ///
    /// Creation runs under `starting` rather than the state lock: concurrent
    /// submissions wait for it asynchronously, and the state stays readable.
    async fn acquire(&self) -> Result<Arc<F::Pool>> {
        if let Some(pool) = self.join_active() {
            return Ok(pool);
        }

        let _starting = self.starting.lock().await;
        if let Some(pool) = self.join_active() {
            return Ok(pool);
        }

        let pool = Arc::new(self.factory.create(self.max_workers)?);
        let generation = self.pools_created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            max_workers = self.max_workers,
            generation, "minify workers started"
        );
        *self.lock_state() = PoolState::Active {
            pool: Arc::clone(&pool),
            in_flight: 1,
        };
        Ok(pool)
    }

    fn join_active(&self) -> Option<Arc<F::Pool>> {
        let mut state = self.lock_state();
        match &mut *state {
            PoolState::Active { pool, in_flight } => {
                *in_flight += 1;
                Some(Arc::clone(pool))
            }
            PoolState::Idle => None,
        }
    }

    async fn release(&self) {
        let Some(pool) = self.release_slot() else {
            return;
        };

        let report = pool.shutdown().await;
        self.pools_torn_down.fetch_add(1, Ordering::Relaxed);
        if report.forced_exit {
            warn!("minify workers failed to exit gracefully");
        } else {
            debug!("minify workers stopped");
        }

        self.persist_name_cache().await;
    }

    /// Decrement the in-flight count. Hands back the pool if this was the
    /// last submission, leaving the session idle.
    fn release_slot(&self) -> Option<Arc<F::Pool>> {
        let mut state = self.lock_state();
        let PoolState::Active { in_flight, .. } = &mut *state else {
            warn!("minify pool released while idle");
            return None;
        };

        *in_flight -= 1;
        if *in_flight > 0 {
            return None;
        }

        match std::mem::replace(&mut *state, PoolState::Idle) {
            PoolState::Active { pool, .. } => Some(pool),
            PoolState::Idle => None,
        }
    }

    fn merge_name_cache(&self, incoming: &NameCache) {
        let mut guard = self.lock_name_cache();
        if let Some(accumulated) = guard.as_mut() {
            *accumulated = merge_name_cache(accumulated, incoming);
        }
    }

    async fn persist_name_cache(&self) {
        let Some(path) = &self.name_cache_file else {
            return;
        };

        // Overlapping teardowns save one at a time, each with the latest cache.
        let _saving = self.saving.lock().await;
        let Some(cache) = self.name_cache() else {
            return;
        };

        if let Err(e) = save_name_cache(path, &cache).await {
            warn!("failed to save name cache to {}: {}", path, e);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<F::Pool>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_name_cache(&self) -> MutexGuard<'_, Option<NameCache>> {
        self.name_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the accumulated name cache, if one is being tracked.
    pub fn name_cache(&self) -> Option<NameCache> {
        self.lock_name_cache().clone()
    }

    /// Submissions currently holding the pool.
    pub fn in_flight(&self) -> usize {
        match &*self.lock_state() {
            PoolState::Idle => 0,
            PoolState::Active { in_flight, .. } => *in_flight,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(&*self.lock_state(), PoolState::Active { .. })
    }

    pub fn pools_created(&self) -> usize {
        self.pools_created.load(Ordering::Relaxed)
    }

    pub fn pools_torn_down(&self) -> usize {
        self.pools_torn_down.load(Ordering::Relaxed)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}
