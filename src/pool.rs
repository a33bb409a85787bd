use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error};

/// WorkerPool runs jobs on a fixed number of tokio tasks fed from a bounded queue
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    queue_depth: usize,
}

/// WorkerPool implementation block
impl WorkerPool {
    /// new is a WorkerPool constructor; both bounds are raised to at least one
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// run feeds every item to `job` and returns once all of them finished.
    /// A panicking job is logged and does not stop its worker
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, job: F)
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if items.is_empty() {
            return;
        }

        // Create the shared job queue
        let (job_tx, job_rx) = mpsc::channel::<T>(self.queue_depth);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let job = Arc::new(job);

        // No point starting more workers than there are jobs
        let workers = self.workers.min(items.len());
        let mut set = JoinSet::new();

        for worker_id in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let job = Arc::clone(&job);

            set.spawn(async move {
                loop {
                    // Hold the receiver lock only while waiting for the next item
                    let next = job_rx.lock().await.recv().await;
                    let Some(item) = next else {
                        break;
                    };

                    // Run the job in its own task so a panic stays contained
                    if let Err(e) = tokio::spawn((*job)(item)).await {
                        error!("worker {worker_id}: job aborted: {e}");
                    }
                }

                // DEBUG
                debug!("worker {worker_id} drained");
            });
        }

        // Feed the queue; a send only fails if every worker is gone
        for item in items {
            if job_tx.send(item).await.is_err() {
                error!("job queue closed before all jobs were dispatched");
                break;
            }
        }

        // Closing the sender lets idle workers exit
        drop(job_tx);

        // Barrier: wait for every worker to drain
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                error!("worker task failed: {e}");
            }
        }
    }
}
