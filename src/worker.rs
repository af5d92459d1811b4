// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Bounded Worker Pool
 * Pre-spawned workers over a bounded queue with blocking submit,
 * panic isolation and atomic statistics
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::error;

use crate::errors::ScannerError;

/// Queue depth multiplier: a pool of N workers queues up to 10N tasks.
const QUEUE_FACTOR: usize = 10;

const SUBMIT_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct PoolStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-size worker pool fed by a bounded queue.
///
/// `submit` applies back-pressure: when the queue is full the caller
/// backs off 1 ms and retries once before reporting a submit failure.
/// A panicking task increments `failed` and never takes down a worker.
pub struct WorkerPool<T: Send + 'static> {
    tx: mpsc::Sender<T>,
    stats: Arc<PoolStats>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    name: &'static str,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F, Fut>(name: &'static str, workers: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<T>(workers * QUEUE_FACTOR);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());
        let handler = Arc::new(handler);

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(task) = task else { break };

                    let outcome = std::panic::AssertUnwindSafe(handler(task))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(()) => {
                            stats.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(panic) => {
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                            error!("{} worker recovered from panic: {:?}", name, panic_message(&panic));
                        }
                    }
                }
            }));
        }

        Self {
            tx,
            stats,
            workers: handles,
            name,
        }
    }

    /// Submit a task, waiting for queue space as long as it takes. Used
    /// by the target feed, which must not drop work under back-pressure.
    pub async fn submit_wait(&self, task: T) -> Result<(), ScannerError> {
        self.tx.send(task).await.map_err(|_| {
            ScannerError::PoolSubmit(format!("{} pool is shut down", self.name))
        })?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Submit a task, blocking briefly on a full queue. One 1 ms backoff
    /// retry; after that the submit fails and the caller decides what the
    /// missing contribution means.
    pub async fn submit(&self, task: T) -> Result<(), ScannerError> {
        match self.tx.try_send(task) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                tokio::time::sleep(SUBMIT_BACKOFF).await;
                match self.tx.try_send(task) {
                    Ok(()) => {
                        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(_) => Err(ScannerError::PoolSubmit(format!(
                        "{} pool queue is full",
                        self.name
                    ))),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ScannerError::PoolSubmit(format!(
                "{} pool is shut down",
                self.name
            ))),
        }
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Close the queue and wait for in-flight tasks to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_processes_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool: WorkerPool<usize> = WorkerPool::new("test", 4, move |n| {
            let c = Arc::clone(&c);
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                c.fetch_add(n, Ordering::SeqCst);
            }
        });
        for i in 0..100 {
            pool.submit(i).await.unwrap();
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), (0..100).sum::<usize>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panic_isolation() {
        let pool: WorkerPool<u32> = WorkerPool::new("test", 2, |n| async move {
            if n == 13 {
                panic!("unlucky");
            }
        });
        for n in [1, 13, 2, 13, 3] {
            pool.submit(n).await.unwrap();
        }
        // Workers stay alive after panics and keep draining.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = pool.stats();
        pool.shutdown().await;
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.completed, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_failure_on_sustained_overload() {
        // One slow worker, queue depth 10: the 12th task cannot fit.
        let pool: WorkerPool<u32> = WorkerPool::new("test", 1, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let mut failed = 0;
        for i in 0..20 {
            if pool.submit(i).await.is_err() {
                failed += 1;
            }
        }
        assert!(failed > 0);
    }
}
