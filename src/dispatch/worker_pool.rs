//! Bounded worker pool draining dispatched request jobs.
//!
//! A fixed set of workers shares one bounded queue. `submit` waits for queue
//! capacity instead of growing without limit; `shutdown` closes the queue and
//! joins every worker after previously queued work has drained.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// One queued unit of request-handling work.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors raised while queueing work.
#[derive(Debug, Error)]
pub enum WorkerPoolError {
    #[error("worker pool is shut down")]
    PoolShutDown,
}

pub struct WorkerPool {
    job_tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers draining a queue of `queue_capacity`
    /// jobs. Zero values are clamped to one.
    pub fn start(worker_count: usize, queue_capacity: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let job_rx = Arc::clone(&job_rx);
                tokio::spawn(async move {
                    loop {
                        // hold the receiver lock only while waiting, never
                        // while a job runs
                        let job = { job_rx.lock().await.recv().await };
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!("Worker {} exiting", worker_id);
                })
            })
            .collect();

        Self { job_tx, workers }
    }

    /// Queue one job, waiting for capacity when the queue is full.
    pub async fn submit(&self, job: Job) -> Result<(), WorkerPoolError> {
        self.job_tx
            .send(job)
            .await
            .map_err(|_| WorkerPoolError::PoolShutDown)
    }

    /// Number of workers serving the queue.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close the queue and wait for every worker to finish the work already
    /// queued.
    pub async fn shutdown(self) {
        let WorkerPool { job_tx, workers } = self;
        drop(job_tx);
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Worker task failed during shutdown: {}", e);
            }
        }
        debug!("Worker pool drained and stopped");
    }
}
