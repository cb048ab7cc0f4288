//! Collaborators that sit on the worker side of the supervisor.
//!
//! - [`TaskExecutor`]: runs a task description as a local process and turns
//!   its exit status into an [`Outcome`](crate::scheduler::Outcome)
//! - [`HealthMonitor`]: consecutive-failure policy deciding when a worker is
//!   taken out of rotation and when it is deregistered
//!
//! Neither is part of the scheduling core; the core only sees their results
//! through [`SupervisorHandle`](crate::service::SupervisorHandle).

pub mod executor;
pub mod health;

pub use executor::{ExecutionResult, TaskExecutor};
pub use health::{HealthMonitor, HealthVerdict};
