//! In-process backend: tasks run on tokio's blocking threads, at most
//! `max_workers` at a time.

use std::sync::Arc;

use cell_minify_proto::{MinifyOutput, MinifyTask};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::pool::{PoolFactory, ShutdownReport, WorkerPool};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ThreadPoolFactory;

impl PoolFactory for ThreadPoolFactory {
    type Pool = ThreadPool;

    fn create(&self, max_workers: usize) -> Result<ThreadPool> {
        debug!(max_workers, "starting in-process minify pool");
        Ok(ThreadPool {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        })
    }
}

pub struct ThreadPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool for ThreadPool {
    async fn run(&self, task: MinifyTask) -> Result<MinifyOutput> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            dodeca_minify::minify(&task)
        })
        .await?
        .map_err(|e| Error::Minify(e.to_string()))
    }

    async fn shutdown(&self) -> ShutdownReport {
        self.permits.close();
        debug!("in-process minify pool shut down");
        ShutdownReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_tasks_and_rejects_after_shutdown() {
        let pool = ThreadPoolFactory.create(2).unwrap();

        let output = pool
            .run(MinifyTask {
                code: "function add(first, second) { return first + second; }\nadd(1, 2);"
                    .to_string(),
                options: Default::default(),
            })
            .await
            .unwrap();
        assert!(!output.code.is_empty());

        let err = pool
            .run(MinifyTask {
                code: "let = = ;".to_string(),
                options: Default::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Minify(_)), "{err}");

        assert_eq!(pool.shutdown().await, ShutdownReport::default());
        let err = pool
            .run(MinifyTask {
                code: "1".to_string(),
                options: Default::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PoolClosed));
    }
}
