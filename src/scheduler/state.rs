//! Job status transitions.
//!
//! Every job-level status change goes through [`JobStateMachine`]. The functions
//! here never mutate a job; they compute the next legal status and callers apply
//! it. An illegal request yields [`SupervisorError::IllegalTransition`] and the
//! caller's state is left untouched.
//!
//! Legal transitions:
//!
//! | from        | to                                   |
//! |-------------|--------------------------------------|
//! | Incomplete  | Not_Ready                            |
//! | Not_Ready   | Ready, Not_Ready (further retry)     |
//! | Ready       | Running, Not_Ready (retry)           |
//! | Running     | Running, Completed, Not_Ready (retry)|
//! | non-terminal| Failed, Cancelled                    |

use crate::error::{Result, SupervisorError};
use crate::scheduler::job::{Job, JobStatus, TaskStatus};

/// Result of validating a finalized task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Ready,
    Malformed { index: usize, reason: String },
}

pub struct JobStateMachine;

impl JobStateMachine {
    pub fn is_legal(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;

        if from.is_terminal() {
            return false;
        }
        matches!(
            (from, to),
            (Incomplete, NotReady)
                | (NotReady, Ready)
                | (NotReady, NotReady)
                | (Ready, Running)
                | (Ready, NotReady)
                | (Running, Running)
                | (Running, Completed)
                | (Running, NotReady)
                | (_, Failed)
                | (_, Cancelled)
        )
    }

    pub fn transition(from: JobStatus, to: JobStatus) -> Result<JobStatus> {
        if Self::is_legal(from, to) {
            Ok(to)
        } else {
            Err(SupervisorError::IllegalTransition { from, to })
        }
    }

    /// Closes the task list of an `Incomplete` job.
    pub fn finalize(job: &Job) -> Result<JobStatus> {
        let next = Self::transition(job.status, JobStatus::NotReady)?;
        if job.tasks.is_empty() {
            return Err(SupervisorError::InvalidJob {
                job: job.id,
                reason: "job has no tasks".to_string(),
            });
        }
        Ok(next)
    }

    /// Checks every task descriptor of a `Not_Ready` job.
    pub fn validate(job: &Job) -> Result<Validation> {
        Self::transition(job.status, JobStatus::Ready)?;
        for (index, task) in job.tasks.iter().enumerate() {
            if let Err(reason) = Self::validate_descriptor(&task.description) {
                return Ok(Validation::Malformed { index, reason });
            }
        }
        Ok(Validation::Ready)
    }

    pub fn validate_descriptor(description: &str) -> std::result::Result<(), String> {
        if description.trim().is_empty() {
            return Err("empty task descriptor".to_string());
        }
        if description.chars().any(char::is_control) {
            return Err("task descriptor contains control characters".to_string());
        }
        Ok(())
    }

    /// Status after a task of the job has been bound to a worker.
    pub fn on_assignment(current: JobStatus) -> Result<JobStatus> {
        match current {
            JobStatus::Ready | JobStatus::Running => {
                Self::transition(current, JobStatus::Running)
            }
            _ => Err(SupervisorError::IllegalTransition {
                from: current,
                to: JobStatus::Running,
            }),
        }
    }

    /// Status after one more task completed. `job` is the state before the
    /// completing task is marked, so `completing` names the task that just finished.
    pub fn on_task_completed(job: &Job, completing: usize) -> Result<JobStatus> {
        let all_done = job
            .tasks
            .iter()
            .enumerate()
            .all(|(i, t)| i == completing || t.status == TaskStatus::Completed);
        if all_done {
            Self::transition(job.status, JobStatus::Completed)
        } else {
            Ok(job.status)
        }
    }

    /// Status after a task failure: cycle back to `Not_Ready` while budget
    /// remains, fail terminally otherwise.
    pub fn on_task_failed(current: JobStatus, retries_left: u32) -> Result<JobStatus> {
        if retries_left > 0 {
            Self::transition(current, JobStatus::NotReady)
        } else {
            Self::transition(current, JobStatus::Failed)
        }
    }

    pub fn cancel(current: JobStatus) -> Result<JobStatus> {
        Self::transition(current, JobStatus::Cancelled)
    }
}
