//! Bounded worker pool
//!
//! Bean invocations, recovery scans and session creation are blocking calls
//! into application code. They run on tokio's blocking threads, with a
//! semaphore capping how many run at once so a burst of requests on one
//! channel cannot starve the rest of the server.

use crate::{RemotingError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Maximum number of concurrently running blocking tasks
    pub max_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_workers: 64 }
    }
}

/// Shared, cloneable handle to the pool
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    completed: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(config.max_workers)),
                max_workers: config.max_workers,
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Run blocking `work` once a worker slot is free
    ///
    /// A panic inside `work` surfaces as [`RemotingError::Worker`].
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RemotingError::worker("worker pool is shut down"))?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await;

        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        Ok(result?)
    }

    /// Detach an async task that drives a request to its response
    pub fn submit<Fut>(&self, task: Fut) -> JoinHandle<()>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task)
    }

    /// Stop accepting work; tasks already running finish normally
    pub fn shutdown(&self) {
        debug!(
            completed = self.completed(),
            "Worker pool shutting down"
        );
        self.inner.semaphore.close();
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Worker slots not currently in use
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(&WorkerPoolConfig::default());
        assert_eq!(pool.run(|| 2 + 3).await.unwrap(), 5);
        assert_eq!(pool.completed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(&WorkerPoolConfig { max_workers: 2 });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    pool.run(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
                })
            })
            .collect();

        futures::future::join_all(tasks).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_panic_becomes_worker_error() {
        let pool = WorkerPool::new(&WorkerPoolConfig::default());
        let err = pool.run(|| -> u32 { panic!("bean exploded") }).await.unwrap_err();
        assert!(matches!(err, RemotingError::Worker { .. }));
        assert_eq!(pool.available(), pool.max_workers());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = WorkerPool::new(&WorkerPoolConfig::default());
        pool.shutdown();
        assert!(matches!(
            pool.run(|| ()).await,
            Err(RemotingError::Worker { .. })
        ));
    }
}
