use thiserror::Error;

use crate::scheduler::job::{JobId, JobStatus};
use crate::scheduler::registry::WorkerId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Worker already registered: {0}")]
    DuplicateWorker(WorkerId),

    #[error("Worker not found: {0}")]
    UnknownWorker(WorkerId),

    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Job not found: {0}")]
    UnknownJob(JobId),

    #[error("Invalid job {job}: {reason}")]
    InvalidJob { job: JobId, reason: String },

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Job table at capacity ({0} jobs)")]
    CapacityExceeded(usize),

    #[error("Job {0} is still active")]
    JobActive(JobId),

    #[error("Supervisor service stopped")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
