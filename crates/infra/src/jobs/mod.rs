//! Background job system with retry, backoff, and dead-letter handling.
//!
//! - Jobs are owner-scoped and typed
//! - Transient failures are retried with exponential backoff
//! - Permanent failures and exhausted retries end dead-lettered, with the
//!   error and attempt history kept on the job for inspection

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, Job, JobAttemptRecord, JobId, JobKind, JobResult, JobStatus, RetryPolicy,
};
