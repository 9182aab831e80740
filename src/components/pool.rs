//! Named background task pools.
//!
//! Handlers hand work that must outlive a request to a [`TaskPool`]. The
//! server stops every pool when it stops (queued jobs still run) and waits
//! for them in `join()`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::PoolConfig;

/// A queued unit of background work.
pub type PoolJob = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Counters reported by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadPoolInfo {
    pub threads: usize,
    pub busy: usize,
    /// Queue capacity.
    pub queue_length: usize,
    /// Jobs waiting right now.
    pub current_queue: usize,
    pub good_tasks: u64,
    pub bad_tasks: u64,
}

impl ThreadPoolInfo {
    pub const fn all_tasks(&self) -> u64 {
        self.good_tasks + self.bad_tasks
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool '{0}' queue is full")]
    QueueFull(String),
    #[error("pool '{0}' is stopped")]
    Stopped(String),
}

/// A pool the server can report on, stop and join.
#[async_trait]
pub trait ThreadPool: Send + Sync {
    fn name(&self) -> &str;
    fn info(&self) -> ThreadPoolInfo;
    /// Queue a boxed job without waiting.
    fn submit_job(&self, job: PoolJob) -> Result<(), PoolError>;
    /// Refuse new work. Queued work still runs.
    fn stop(&self);
    /// Wait until every worker has exited.
    async fn join(&self);
}

#[derive(Default)]
struct Counters {
    busy: AtomicUsize,
    queued: AtomicUsize,
    good: AtomicU64,
    bad: AtomicU64,
}

/// Fixed-size tokio worker pool with a bounded queue.
pub struct TaskPool {
    name: String,
    threads: usize,
    queue_length: usize,
    sender: Mutex<Option<mpsc::Sender<PoolJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl TaskPool {
    /// Spawn the pool's workers. Must be called inside a tokio runtime.
    pub fn start(config: &PoolConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<PoolJob>(config.queue_length.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.threads)
            .map(|_| {
                let rx = Arc::clone(&rx);
                let counters = Arc::clone(&counters);
                let name = config.name.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        counters.queued.fetch_sub(1, Ordering::Relaxed);
                        counters.busy.fetch_add(1, Ordering::Relaxed);
                        // A panicking job must not take the worker down with it.
                        match tokio::spawn(job).await {
                            Ok(Ok(())) => {
                                counters.good.fetch_add(1, Ordering::Relaxed);
                            },
                            Ok(Err(e)) => {
                                counters.bad.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(pool = %name, error = %e, "Pool task failed");
                            },
                            Err(e) => {
                                counters.bad.fetch_add(1, Ordering::Relaxed);
                                tracing::error!(pool = %name, error = %e, "Pool task panicked");
                            },
                        }
                        counters.busy.fetch_sub(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        Arc::new(Self {
            name: config.name.clone(),
            threads: config.threads,
            queue_length: config.queue_length,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
        })
    }

    /// Queue `job` without waiting.
    ///
    /// # Errors
    ///
    /// Fails when the queue is full or the pool was stopped.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit_job(Box::pin(job))
    }
}

impl dyn ThreadPool {
    /// Queue `job` on a pool looked up by name.
    ///
    /// # Errors
    ///
    /// Fails when the queue is full or the pool was stopped.
    pub fn spawn<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit_job(Box::pin(job))
    }
}

#[async_trait]
impl ThreadPool for TaskPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> ThreadPoolInfo {
        ThreadPoolInfo {
            threads: self.threads,
            busy: self.counters.busy.load(Ordering::Relaxed),
            queue_length: self.queue_length,
            current_queue: self.counters.queued.load(Ordering::Relaxed),
            good_tasks: self.counters.good.load(Ordering::Relaxed),
            bad_tasks: self.counters.bad.load(Ordering::Relaxed),
        }
    }

    fn submit_job(&self, job: PoolJob) -> Result<(), PoolError> {
        let guard = self.sender.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(PoolError::Stopped(self.name.clone()));
        };
        // Count before sending so a fast worker never sees the counter underflow.
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        tx.try_send(job).map_err(|e| {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => PoolError::QueueFull(self.name.clone()),
                mpsc::error::TrySendError::Closed(_) => PoolError::Stopped(self.name.clone()),
            }
        })
    }

    fn stop(&self) {
        if self.sender.lock().take().is_some() {
            tracing::debug!(pool = %self.name, "Pool stopped accepting work");
        }
    }

    async fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(pool = %self.name, error = %e, "Pool worker ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(threads: usize, queue_length: usize) -> PoolConfig {
        PoolConfig {
            name: "test".to_string(),
            threads,
            queue_length,
        }
    }

    #[tokio::test]
    async fn test_runs_jobs_and_counts() {
        let pool = TaskPool::start(&config(2, 16));
        for i in 0..5 {
            pool.submit(async move {
                if i == 3 {
                    anyhow::bail!("job {i} failed");
                }
                Ok(())
            })
            .unwrap();
        }
        pool.stop();
        pool.join().await;

        let info = pool.info();
        assert_eq!(info.good_tasks, 4);
        assert_eq!(info.bad_tasks, 1);
        assert_eq!(info.all_tasks(), 5);
        assert_eq!(info.busy, 0);
        assert_eq!(info.current_queue, 0);
        assert_eq!(info.threads, 2);
        assert_eq!(info.queue_length, 16);
    }

    #[tokio::test]
    async fn test_panicking_job_is_counted() {
        let pool = TaskPool::start(&config(1, 4));
        pool.submit(async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();
        pool.submit(async { Ok(()) }).unwrap();
        pool.stop();
        pool.join().await;

        let info = pool.info();
        assert_eq!(info.bad_tasks, 1);
        assert_eq!(info.good_tasks, 1);
    }

    #[tokio::test]
    async fn test_spawn_through_trait_object() {
        let pool: Arc<dyn ThreadPool> = TaskPool::start(&config(1, 4));
        pool.spawn(async { Ok(()) }).unwrap();
        pool.stop();
        pool.join().await;
        assert_eq!(pool.info().good_tasks, 1);
        assert_eq!(pool.name(), "test");
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let pool = TaskPool::start(&config(1, 4));
        pool.stop();
        let err = pool.submit(async { Ok(()) }).unwrap_err();
        assert_eq!(err, PoolError::Stopped("test".to_string()));
        pool.join().await;
    }

    #[tokio::test]
    async fn test_queue_full() {
        let pool = TaskPool::start(&config(1, 1));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit(async move {
            let _ = release_rx.await;
            Ok(())
        })
        .unwrap();

        // Wait until the worker has taken the blocking job off the queue.
        while pool.info().busy == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        pool.submit(async { Ok(()) }).unwrap();
        let err = pool.submit(async { Ok(()) }).unwrap_err();
        assert_eq!(err, PoolError::QueueFull("test".to_string()));

        let _ = release_tx.send(());
        pool.stop();
        pool.join().await;
        assert_eq!(pool.info().good_tasks, 2);
    }
}
