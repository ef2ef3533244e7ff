//! Dedicated worker pools for CPU-bound and blocking work, bridged to async callers.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;

use crate::core::config::ThreadConfig;
use crate::core::error::Error;
use crate::core::types::Result;

/// Separate pools so a burst of file I/O never starves downsampling, and vice versa.
pub struct WorkerPools {
    transform: ThreadPool,
    io: ThreadPool,
    merge: ThreadPool,
}

impl WorkerPools {
    pub fn new(threads: &ThreadConfig) -> Result<Self> {
        Ok(Self {
            transform: build_pool("lod-transform", threads.transform)?,
            io: build_pool("lod-io", threads.io)?,
            merge: build_pool("lod-merge", threads.merge)?,
        })
    }

    /// Chunk ingestion and promotion checks.
    pub async fn run_transform<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        run_on(&self.transform, "transform", f).await
    }

    /// Container reads and writes.
    pub async fn run_io<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        run_on(&self.io, "io", f).await
    }

    /// Downsampling reductions.
    pub async fn run_merge<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        run_on(&self.merge, "merge", f).await
    }
}

fn build_pool(name: &'static str, threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{}-{}", name, i))
        // without a handler a panicking task aborts the process
        .panic_handler(move |_| log::error!("task on the {} pool panicked", name))
        .build()
        .map_err(|e| Error::Config(format!("failed to build {} pool: {}", name, e)))
}

async fn run_on<R, F>(pool: &ThreadPool, name: &str, f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    pool.spawn(move || {
        let _ = tx.send(f());
    });
    rx.await
        .map_err(|_| Error::Concurrency(format!("{} worker dropped its task", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_pool_runs_on_its_own_threads() {
        let pools = WorkerPools::new(&ThreadConfig { transform: 1, io: 1, merge: 1 }).unwrap();
        let name = || std::thread::current().name().unwrap_or_default().to_string();

        assert_eq!(pools.run_transform(name).await.unwrap(), "lod-transform-0");
        assert_eq!(pools.run_io(name).await.unwrap(), "lod-io-0");
        assert_eq!(pools.run_merge(name).await.unwrap(), "lod-merge-0");
    }

    #[tokio::test]
    async fn test_panicking_task_reports_error() {
        let pools = WorkerPools::new(&ThreadConfig::default()).unwrap();
        let result: Result<()> = pools.run_merge(|| panic!("boom")).await;
        assert!(matches!(result, Err(Error::Concurrency(_))));
        assert_eq!(pools.run_merge(|| 2 + 2).await.unwrap(), 4);
    }
}
