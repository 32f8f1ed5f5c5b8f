//! A bounded worker pool for chunk load/generate and chunk-send jobs.
//! Submissions return a oneshot future; after shutdown they fail with
//! `PoolStopped`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum PoolError {
    #[error("worker pool is stopped")]
    PoolStopped,
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks draining a queue bounded at `queue_depth`.
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth);
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                debug!("worker {worker_id} exited");
            });
        }
        Self {
            sender: Mutex::new(Some(tx)),
        }
    }

    /// Submit a job; the returned receiver resolves with its output. The
    /// receiver erroring (sender dropped) means the job was lost to
    /// shutdown.
    pub async fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = {
            let guard = self.sender.lock().unwrap();
            guard.clone()
        };
        let sender = sender.ok_or(PoolError::PoolStopped)?;
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let _ = tx.send(job.await);
        });
        sender
            .send(wrapped)
            .await
            .map_err(|_| PoolError::PoolStopped)?;
        Ok(rx)
    }

    /// Stop accepting jobs; queued jobs still drain.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_returns_result() {
        let pool = WorkerPool::new(2, 16);
        let rx = pool.submit(async { 21 * 2 }).await.unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_jobs_run_concurrently_with_submitters() {
        let pool = WorkerPool::new(4, 16);
        let mut receivers = Vec::new();
        for i in 0..20 {
            receivers.push(pool.submit(async move { i * i }).await.unwrap());
        }
        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap(), (i * i) as i32);
        }
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(1, 4);
        pool.shutdown();
        let result = pool.submit(async { 1 }).await;
        assert!(matches!(result, Err(PoolError::PoolStopped)));
    }
}
