//! Bounded worker pools for blocking work.
//!
//! The ingest coordinator runs on tokio and never blocks. CPU-bound and
//! blocking I/O units (frame decoding, OCR, transcript chunking) are handed
//! to a [`WorkerPool`], a fixed-size rayon thread pool whose results come
//! back through oneshot channels.
//!
//! Two pools are built per process: `branch` for the top-level audio/visual
//! work and `fanout` for per-frame OCR. A unit running on one pool never
//! waits on work queued to the same pool, so nested fan-out cannot starve
//! the branch that issued it.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::config::WorkersConfig;
use crate::error::{Error, Result};

/// Minimum size of the branch pool: one slot per top-level branch.
pub const TOP_LEVEL_BRANCHES: usize = 2;

/// A fixed-size pool of OS threads for blocking work.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    inner: Arc<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(name: &'static str, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::Config(format!(
                "worker pool '{}' needs at least one thread",
                name
            )));
        }
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", name, i))
            .build()
            .map_err(|e| Error::internal(format!("failed to build {} pool: {}", name, e)))?;
        debug!(pool = name, threads, "worker pool ready");
        Ok(Self {
            name,
            inner: Arc::new(inner),
        })
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn threads(&self) -> usize {
        self.inner.current_num_threads()
    }

    /// Queue `job` on the pool and return a receiver for its result.
    ///
    /// The job starts as soon as a thread is free; callers may submit many
    /// jobs before awaiting any of them.
    pub fn submit<T, F>(&self, job: F) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.inner.spawn(move || {
            // Receiver may have been dropped; nothing to report then.
            let _ = tx.send(job());
        });
        rx
    }

    /// Run `job` on the pool and wait for it.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit(job)
            .await
            .map_err(|_| Error::internal(format!("{} pool dropped a job", self.name)))
    }
}

/// Resolved pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizing {
    pub branch: usize,
    pub fanout: usize,
}

impl PoolSizing {
    /// Resolve configured sizes; `0` means "available parallelism".
    pub fn from_config(cfg: &WorkersConfig) -> Result<Self> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let branch = if cfg.branch_threads == 0 {
            TOP_LEVEL_BRANCHES
        } else {
            cfg.branch_threads
        };
        let fanout = if cfg.fanout_threads == 0 {
            cores
        } else {
            cfg.fanout_threads
        };
        let sizing = Self { branch, fanout };
        sizing.validate()?;
        Ok(sizing)
    }

    pub fn validate(&self) -> Result<()> {
        if self.branch < TOP_LEVEL_BRANCHES {
            return Err(Error::Config(format!(
                "workers.branch_threads must be >= {} (one per top-level branch), got {}",
                TOP_LEVEL_BRANCHES, self.branch
            )));
        }
        if self.fanout == 0 {
            return Err(Error::Config("workers.fanout_threads must be >= 1".into()));
        }
        Ok(())
    }
}

/// The two pools used by one orchestrator.
#[derive(Clone)]
pub struct Pools {
    pub branch: WorkerPool,
    pub fanout: WorkerPool,
}

impl Pools {
    pub fn new(sizing: PoolSizing) -> Result<Self> {
        sizing.validate()?;
        Ok(Self {
            branch: WorkerPool::new("branch", sizing.branch)?,
            fanout: WorkerPool::new("fanout", sizing.fanout)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let v = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn test_submit_many_before_awaiting() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let receivers: Vec<_> = (0..16)
            .map(|i| {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();
        let mut sum = 0;
        for rx in receivers {
            sum += rx.await.unwrap();
        }
        assert_eq!(sum, (0..16).sum::<i32>());
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_branch_job_can_wait_on_fanout_pool() {
        // A branch job that blocks on fan-out work must not deadlock, even
        // with a single fan-out thread and a minimal branch pool.
        let pools = Pools::new(PoolSizing { branch: 2, fanout: 1 }).unwrap();
        let fanout = pools.fanout.clone();
        let total = pools
            .branch
            .run(move || {
                let rxs: Vec<_> = (0..8).map(|i| fanout.submit(move || i * 2)).collect();
                rxs.into_iter()
                    .map(|rx| rx.blocking_recv().unwrap())
                    .sum::<i32>()
            })
            .await
            .unwrap();
        assert_eq!(total, 56);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(WorkerPool::new("bad", 0).is_err());
    }

    #[test]
    fn test_sizing_defaults() {
        let sizing = PoolSizing::from_config(&WorkersConfig::default()).unwrap();
        assert_eq!(sizing.branch, TOP_LEVEL_BRANCHES);
        assert!(sizing.fanout >= 1);
    }

    #[test]
    fn test_sizing_rejects_single_branch_thread() {
        let cfg = WorkersConfig {
            branch_threads: 1,
            fanout_threads: 4,
        };
        assert!(PoolSizing::from_config(&cfg).is_err());
    }
}
