//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobResult, JobStatus};

/// Runs one kind of job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job) -> JobResult;
}

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for due jobs when the queue is idle
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to a running executor task.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for the in-flight job to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "job executor task ended abnormally");
        }
    }
}

/// Background job executor.
///
/// Polls a job store for due jobs, runs them with the registered handlers,
/// and records retries and dead-lettering on the job itself.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    pub fn register_handler(&mut self, kind: &JobKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind.type_name(), handler);
    }

    /// Run a claimed job once and persist the outcome.
    ///
    /// Failures are logged here; callers may ignore the returned error.
    pub async fn execute_one(&self, job: &mut Job) -> Result<(), String> {
        let started = Utc::now();

        let outcome = match self.handlers.get(job.kind.type_name()) {
            Some(handler) => handler.run(job).await,
            None => JobResult::Abort(format!("no handler for job kind: {}", job.kind.type_name())),
        };

        let result = match outcome {
            JobResult::Success(value) => {
                job.mark_completed(started, value);
                debug!(job_id = %job.id, "job completed successfully");
                Ok(())
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone(), started, true);
                Err(error)
            }
            JobResult::Abort(error) => {
                job.mark_failed(error.clone(), started, false);
                Err(error)
            }
        };

        if let Err(e) = self.store.update(job) {
            // The claimed job stays `running` in the store until it is repaired.
            error!(job_id = %job.id, attempt = job.attempt, error = %e, "failed to persist job outcome");
            return Err(format!("failed to persist job outcome: {e}"));
        }

        if let Err(error) = &result {
            match &job.status {
                JobStatus::DeadLettered { attempts, .. } => {
                    warn!(job_id = %job.id, attempts, error = %error, "job dead-lettered")
                }
                status if status.is_retriable() => {
                    debug!(job_id = %job.id, attempt = job.attempt, error = %error, "job will be retried")
                }
                _ => {}
            }
        }

        result
    }

    /// Claim and run every job that is currently due. Returns how many ran.
    pub async fn drain(&self) -> Result<usize, JobStoreError> {
        let mut ran = 0;
        while let Some(mut job) = self.store.claim_next()? {
            let _ = self.execute_one(&mut job).await;
            ran += 1;
        }
        Ok(ran)
    }

    /// Spawn the executor loop on the current tokio runtime.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle
    where
        S: Send + Sync,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(executor_loop(self, config, shutdown_rx));

        JobExecutorHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn executor_loop<S: JobStore + 'static>(
    executor: JobExecutor<S>,
    config: JobExecutorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(executor = %config.name, "job executor started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match executor.store.claim_next() {
            Ok(Some(mut job)) => {
                debug!(
                    executor = %config.name,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    attempt = job.attempt,
                    "claimed job"
                );
                let _ = executor.execute_one(&mut job).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    info!(executor = %config.name, "job executor stopped");
}
