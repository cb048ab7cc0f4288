//! Scheduling core: worker bookkeeping, job lifecycle and task assignment.
//!
//! - [`registry`]: workers in round-robin order with their outstanding tasks
//! - [`job`]: jobs, tasks and their status enumerations
//! - [`state`]: the job status state machine
//! - [`assigner`]: binds ready tasks to idle workers and applies outcomes
//! - [`queue`]: the supervisor's bounded job table
//!
//! Nothing in here performs I/O. Dispatching an [`Assignment`] to a worker is
//! the caller's business; the result comes back through
//! [`AssignmentEngine::report_outcome`].

pub mod assigner;
pub mod job;
pub mod queue;
pub mod registry;
pub mod state;

pub use assigner::{Assignment, AssignmentEngine, AssignmentResult, Outcome};
pub use job::{Job, JobId, JobStatus, Task, TaskRef, TaskStatus};
pub use queue::JobTable;
pub use registry::{Worker, WorkerId, WorkerRegistry, WorkerStatus};
pub use state::{JobStateMachine, Validation};
