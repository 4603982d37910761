//! Worker runner: main loop that claims jobs and executes them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::time;
use tracing;

use jobgate_concurrency::ClaimedJob;
use jobgate_core::config::WorkerConfig;

use crate::executor::{JobExecutionError, JobExecutor};
use crate::queue::JobQueue;
use crate::retry::RetryDecision;

/// Upper bound on waiting for in-flight jobs at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Result of processing jobs inline with [`WorkerRunner::work_off`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkOffSummary {
    /// Attempts that completed successfully.
    pub succeeded: usize,
    /// Attempts that failed, including capacity failures.
    pub failed: usize,
}

/// Main worker runner that polls queues and executes jobs
#[derive(Debug)]
pub struct WorkerRunner {
    /// Job queue for claiming
    queue: Arc<JobQueue>,
    /// Job executor for dispatching
    executor: Arc<JobExecutor>,
    /// Worker configuration
    config: WorkerConfig,
    /// Worker identifier
    worker_id: String,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(
        queue: Arc<JobQueue>,
        executor: Arc<JobExecutor>,
        config: WorkerConfig,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            executor,
            config,
            worker_id,
        }
    }

    /// Start the worker runner, running until the cancel signal is received
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            "Worker '{}' started with concurrency={}, poll_interval={}s, queues={:?}",
            self.worker_id,
            self.config.concurrency,
            self.config.poll_interval_seconds,
            self.config.queues
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("Worker '{}' received shutdown signal", self.worker_id);
                        break;
                    }
                }
                dispatched = self.poll_and_execute(&semaphore) => {
                    if dispatched {
                        continue;
                    }
                    tokio::select! {
                        changed = cancel.changed() => {
                            if changed.is_err() || *cancel.borrow() {
                                tracing::info!("Worker '{}' shutting down", self.worker_id);
                                break;
                            }
                        }
                        _ = time::sleep(poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!(
            "Worker '{}' waiting for in-flight jobs to complete...",
            self.worker_id
        );

        let max_permits = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        let _ = time::timeout(SHUTDOWN_GRACE, semaphore.acquire_many(max_permits)).await;

        tracing::info!("Worker '{}' shut down complete", self.worker_id);
    }

    /// Process up to `max` jobs on the current task, one at a time
    ///
    /// Stops early when no job is runnable.
    pub async fn work_off(&self, max: usize) -> WorkOffSummary {
        let mut summary = WorkOffSummary::default();

        for _ in 0..max {
            let claimed = match self.queue.dequeue(&self.config.queues).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to dequeue job: {}", e);
                    break;
                }
            };

            if process(&self.queue, &self.executor, claimed).await {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        summary
    }

    /// Claim a job and execute it on a new task if a slot is free
    ///
    /// Returns whether a job was dispatched.
    async fn poll_and_execute(&self, semaphore: &Arc<Semaphore>) -> bool {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::trace!("All worker slots occupied, waiting...");
                return false;
            }
        };

        match self.queue.dequeue(&self.config.queues).await {
            Ok(Some(claimed)) => {
                let queue = Arc::clone(&self.queue);
                let executor = Arc::clone(&self.executor);

                tokio::spawn(async move {
                    let _permit = permit;
                    process(&queue, &executor, claimed).await;
                });
                true
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queues");
                false
            }
            Err(e) => {
                drop(permit);
                tracing::error!("Failed to dequeue job: {}", e);
                false
            }
        }
    }
}

/// Run one attempt of a claimed job and record the outcome
///
/// The claim is released only after the job is finished, rescheduled, or
/// discarded. Returns whether the attempt succeeded.
async fn process(queue: &JobQueue, executor: &JobExecutor, claimed: ClaimedJob) -> bool {
    let ClaimedJob { job, lock } = claimed;
    let job_id = job.id;

    let succeeded = match queue.start(&job).await {
        Err(e) => {
            tracing::error!("Failed to start execution of job {}: {}", job_id, e);
            false
        }
        Ok(execution) => match executor.execute(&job, &execution).await {
            Ok(_) => {
                if let Err(e) = queue.complete(job_id, execution.id).await {
                    tracing::error!("Failed to mark job {} as completed: {}", job_id, e);
                }
                tracing::info!("Job {} completed successfully", job_id);
                true
            }
            Err(err) => {
                match &err {
                    JobExecutionError::CapacityExceeded(reason) => {
                        tracing::info!("Job {} deferred: {}", job_id, reason);
                    }
                    JobExecutionError::Transient(msg) => {
                        tracing::warn!("Job {} failed (transient): {}", job_id, msg);
                    }
                    JobExecutionError::Permanent(msg) => {
                        tracing::error!("Job {} failed permanently: {}", job_id, msg);
                    }
                    JobExecutionError::Internal(e) => {
                        tracing::error!("Job {} internal error: {}", job_id, e);
                    }
                }

                match queue.fail(&execution, &err).await {
                    Ok(RetryDecision::Retry(at)) => {
                        tracing::debug!("Job {} will be retried at {}", job_id, at);
                    }
                    Ok(RetryDecision::Discard) => {
                        tracing::warn!(
                            "Job {} discarded after attempt {}",
                            job_id,
                            execution.attempt
                        );
                    }
                    Err(e) => {
                        tracing::error!("Failed to record failure of job {}: {}", job_id, e);
                    }
                }
                false
            }
        },
    };

    if let Err(e) = lock.release().await {
        tracing::warn!("Failed to release claim on job {}: {}", job_id, e);
    }

    succeeded
}
