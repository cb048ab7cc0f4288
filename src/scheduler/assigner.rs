use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};
use crate::scheduler::job::{Job, JobStatus, TaskRef, TaskStatus};
use crate::scheduler::registry::{WorkerId, WorkerRegistry};
use crate::scheduler::state::JobStateMachine;

/// What a worker reported for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
}

/// A task bound to a worker, to be dispatched by an external collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub task: TaskRef,
    pub worker: WorkerId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentResult {
    /// No task of the job is waiting for a worker any more
    Complete(Vec<Assignment>),
    /// Ran out of idle workers with tasks still `Ready`
    Partial(Vec<Assignment>),
}

impl AssignmentResult {
    pub fn assignments(&self) -> &[Assignment] {
        match self {
            AssignmentResult::Complete(a) | AssignmentResult::Partial(a) => a,
        }
    }

    pub fn into_assignments(self) -> Vec<Assignment> {
        match self {
            AssignmentResult::Complete(a) | AssignmentResult::Partial(a) => a,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, AssignmentResult::Complete(_))
    }
}

/// Binds ready tasks to idle workers and folds task outcomes back into job state.
///
/// The engine keeps a round-robin cursor (the last worker it assigned to) so
/// consecutive assignments spread over the registry instead of restarting at
/// its head. It never owns workers or jobs; both are passed in by the caller.
#[derive(Debug, Default)]
pub struct AssignmentEngine {
    cursor: Option<WorkerId>,
}

impl AssignmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker that received the most recent assignment
    pub fn cursor(&self) -> Option<WorkerId> {
        self.cursor
    }

    /// Assign the job's `Ready` tasks in declaration order until either every
    /// task is handed out or no idle worker is left.
    pub fn assign(
        &mut self,
        job: &mut Job,
        registry: &mut WorkerRegistry,
    ) -> Result<AssignmentResult> {
        if !matches!(job.status, JobStatus::Ready | JobStatus::Running) {
            return Err(SupervisorError::IllegalTransition {
                from: job.status,
                to: JobStatus::Running,
            });
        }

        let mut assignments = Vec::new();
        for index in job.ready_tasks() {
            let Some(worker_id) = registry.next_idle(self.cursor).map(|w| w.id) else {
                tracing::debug!(
                    job_id = job.id,
                    assigned = assignments.len(),
                    "No idle worker, assignment partial"
                );
                return Ok(AssignmentResult::Partial(assignments));
            };

            let next_status = JobStateMachine::on_assignment(job.status)?;
            let task_ref = job.task_ref(index);
            registry.attach_task(worker_id, task_ref)?;

            let task = &mut job.tasks[index];
            task.status = TaskStatus::Running;
            task.assigned_worker = Some(worker_id);
            task.attempts += 1;
            job.status = next_status;
            self.cursor = Some(worker_id);

            tracing::info!(
                job_id = job.id,
                task = %task_ref,
                worker_id,
                description = %task.description,
                "Task assigned"
            );
            assignments.push(Assignment {
                task: task_ref,
                worker: worker_id,
                description: task.description.clone(),
            });
        }

        Ok(AssignmentResult::Complete(assignments))
    }

    /// Apply `reporter`'s outcome for a running task and return the job's new
    /// status.
    ///
    /// Only the worker currently holding the task is heard. A report from a
    /// worker the task was taken away from (lost, evicted, marked unreachable)
    /// is stale: it is dropped and the job is left as it is.
    pub fn report_outcome(
        &mut self,
        job: &mut Job,
        index: usize,
        reporter: WorkerId,
        outcome: Outcome,
        registry: &mut WorkerRegistry,
    ) -> Result<JobStatus> {
        let task_ref = job.task_ref(index);
        let task = job.task(index).ok_or_else(|| {
            SupervisorError::InvariantViolation(format!("job {} has no task {}", job.id, index))
        })?;
        if task.attempts > 0 && task.assigned_worker != Some(reporter) {
            tracing::warn!(
                job_id = job.id,
                task = %task_ref,
                worker_id = reporter,
                holder = ?task.assigned_worker,
                outcome = ?outcome,
                "Stale outcome discarded"
            );
            return Ok(job.status);
        }
        let worker_id = Self::running_worker(job, index)?;

        if job.status.is_terminal() {
            registry.release(worker_id, task_ref)?;
            Self::discard(job, index);
            tracing::warn!(
                job_id = job.id,
                task = %task_ref,
                worker_id,
                outcome = ?outcome,
                status = %job.status,
                "Outcome for finished job discarded"
            );
            return Ok(job.status);
        }

        match outcome {
            Outcome::Success => {
                let next = JobStateMachine::on_task_completed(job, index)?;
                registry.release(worker_id, task_ref)?;

                let task = &mut job.tasks[index];
                task.status = TaskStatus::Completed;
                task.assigned_worker = None;
                if next == JobStatus::Completed {
                    job.finish(next);
                    tracing::info!(job_id = job.id, "Job completed");
                } else {
                    job.status = next;
                }
                tracing::info!(job_id = job.id, task = %task_ref, worker_id, "Task completed");
            }
            Outcome::Failure => {
                let next = JobStateMachine::on_task_failed(job.status, job.retries_left)?;
                registry.release(worker_id, task_ref)?;

                let task = &mut job.tasks[index];
                task.assigned_worker = None;
                if next == JobStatus::Failed {
                    task.status = TaskStatus::Failed;
                    job.error = Some(format!(
                        "task {} ({}) failed with no retries left",
                        index, task.description
                    ));
                    job.cancel_pending_tasks();
                    job.finish(next);
                    tracing::warn!(job_id = job.id, task = %task_ref, worker_id, "Job failed");
                } else {
                    task.status = TaskStatus::Ready;
                    job.retries_left -= 1;
                    job.status = next;
                    tracing::warn!(
                        job_id = job.id,
                        task = %task_ref,
                        worker_id,
                        retries_left = job.retries_left,
                        "Task failed, re-queued"
                    );
                }
            }
        }

        Ok(job.status)
    }

    /// Re-queue a task whose worker disappeared. The job's retry budget is left
    /// untouched and its status does not move.
    pub fn handle_worker_lost(
        &mut self,
        job: &mut Job,
        index: usize,
        worker_id: WorkerId,
        registry: &mut WorkerRegistry,
    ) -> Result<()> {
        let task_ref = job.task_ref(index);
        let holder = Self::running_worker(job, index)?;
        if holder != worker_id {
            return Err(SupervisorError::InvariantViolation(format!(
                "task {} runs on worker {}, not {}",
                task_ref, holder, worker_id
            )));
        }
        registry.detach_task(worker_id, task_ref)?;

        if job.status.is_terminal() {
            Self::discard(job, index);
            return Ok(());
        }

        let task = &mut job.tasks[index];
        task.status = TaskStatus::Ready;
        task.assigned_worker = None;
        tracing::warn!(job_id = job.id, task = %task_ref, worker_id, "Worker lost, task re-queued");
        Ok(())
    }

    fn running_worker(job: &Job, index: usize) -> Result<WorkerId> {
        let task = job.task(index).ok_or_else(|| {
            SupervisorError::InvariantViolation(format!("job {} has no task {}", job.id, index))
        })?;
        match (task.status, task.assigned_worker) {
            (TaskStatus::Running, Some(worker)) => Ok(worker),
            (status, _) => Err(SupervisorError::InvariantViolation(format!(
                "task {} is {}, not running",
                job.task_ref(index),
                status
            ))),
        }
    }

    fn discard(job: &mut Job, index: usize) {
        let task = &mut job.tasks[index];
        task.status = TaskStatus::Cancelled;
        task.assigned_worker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ready_job(id: u64, tasks: &[&str], retry_budget: u32) -> Job {
        let mut job = Job::new(id, tasks.iter().map(|t| t.to_string()).collect(), retry_budget);
        job.status = JobStatus::Ready;
        for task in &mut job.tasks {
            task.status = TaskStatus::Ready;
        }
        job
    }

    fn registry_with(ids: &[WorkerId]) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for &id in ids {
            registry.add(id, Ipv4Addr::new(127, 0, 0, id as u8)).unwrap();
        }
        registry
    }

    #[test]
    fn assign_in_task_order_round_robin() {
        let mut registry = registry_with(&[1, 2]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(42, &["task0.py", "task1.py", "task2.py"], 1);

        let result = engine.assign(&mut job, &mut registry).unwrap();
        assert!(!result.is_complete());
        let pairs: Vec<(usize, WorkerId)> = result
            .assignments()
            .iter()
            .map(|a| (a.task.index, a.worker))
            .collect();
        assert_eq!(pairs, vec![(0, 1), (1, 2)]);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.tasks[2].status, TaskStatus::Ready);
        assert_eq!(engine.cursor(), Some(2));
    }

    #[test]
    fn assign_without_workers_is_partial_not_error() {
        let mut registry = WorkerRegistry::new();
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a"], 1);

        let result = engine.assign(&mut job, &mut registry).unwrap();
        assert_eq!(result, AssignmentResult::Partial(vec![]));
        assert_eq!(job.status, JobStatus::Ready);
    }

    #[test]
    fn assign_rejects_not_ready_job() {
        let mut registry = registry_with(&[1]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a"], 1);
        job.status = JobStatus::NotReady;

        assert!(matches!(
            engine.assign(&mut job, &mut registry),
            Err(SupervisorError::IllegalTransition { .. })
        ));
        assert_eq!(registry.get(1).unwrap().status, crate::scheduler::WorkerStatus::Idle);
    }

    #[test]
    fn success_frees_worker_and_completes_job() {
        let mut registry = registry_with(&[1]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a"], 1);
        engine.assign(&mut job, &mut registry).unwrap();

        let status = engine
            .report_outcome(&mut job, 0, 1, Outcome::Success, &mut registry)
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert!(job.finished_at.is_some());
        assert_eq!(job.tasks[0].assigned_worker, None);
        assert_eq!(registry.get(1).unwrap().status, crate::scheduler::WorkerStatus::Idle);
    }

    #[test]
    fn failure_within_budget_requeues() {
        let mut registry = registry_with(&[1]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a"], 1);
        engine.assign(&mut job, &mut registry).unwrap();

        let status = engine
            .report_outcome(&mut job, 0, 1, Outcome::Failure, &mut registry)
            .unwrap();
        assert_eq!(status, JobStatus::NotReady);
        assert_eq!(job.retries_left, 0);
        assert_eq!(job.tasks[0].status, TaskStatus::Ready);
    }

    #[test]
    fn failure_with_budget_exhausted_fails_job() {
        let mut registry = registry_with(&[1, 2]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a", "b", "c"], 0);
        engine.assign(&mut job, &mut registry).unwrap();

        let status = engine
            .report_outcome(&mut job, 0, 1, Outcome::Failure, &mut registry)
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(job.tasks[0].status, TaskStatus::Failed);
        assert_eq!(job.tasks[1].status, TaskStatus::Running);
        assert_eq!(job.tasks[2].status, TaskStatus::Cancelled);
        assert!(job.error.is_some());

        // the straggler is discarded once it reports
        let status = engine
            .report_outcome(&mut job, 1, 2, Outcome::Success, &mut registry)
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(job.tasks[1].status, TaskStatus::Cancelled);
        assert!(job.is_drained());
        assert!(registry.outstanding(2).unwrap().is_empty());
    }

    #[test]
    fn outcome_for_idle_task_is_violation() {
        let mut registry = registry_with(&[1]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a"], 1);

        let err = engine
            .report_outcome(&mut job, 0, 1, Outcome::Success, &mut registry)
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvariantViolation(_)));
        assert_eq!(job.tasks[0].status, TaskStatus::Ready);
    }

    #[test]
    fn worker_lost_preserves_budget() {
        let mut registry = registry_with(&[1]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a"], 1);
        engine.assign(&mut job, &mut registry).unwrap();

        engine.handle_worker_lost(&mut job, 0, 1, &mut registry).unwrap();
        assert_eq!(job.tasks[0].status, TaskStatus::Ready);
        assert_eq!(job.tasks[0].assigned_worker, None);
        assert_eq!(job.retries_left, 1);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn report_from_former_holder_is_dropped() {
        let mut registry = registry_with(&[1, 2]);
        let mut engine = AssignmentEngine::new();
        let mut job = ready_job(1, &["a"], 1);
        engine.assign(&mut job, &mut registry).unwrap();
        engine.handle_worker_lost(&mut job, 0, 1, &mut registry).unwrap();

        // still waiting for a new worker
        let status = engine
            .report_outcome(&mut job, 0, 1, Outcome::Failure, &mut registry)
            .unwrap();
        assert_eq!(status, JobStatus::Running);
        assert_eq!(job.tasks[0].status, TaskStatus::Ready);
        assert_eq!(job.retries_left, 1);

        // reassigned to worker 2
        engine.assign(&mut job, &mut registry).unwrap();
        assert_eq!(job.tasks[0].assigned_worker, Some(2));
        engine
            .report_outcome(&mut job, 0, 1, Outcome::Failure, &mut registry)
            .unwrap();
        assert_eq!(job.tasks[0].status, TaskStatus::Running);
        assert_eq!(job.retries_left, 1);
        assert_eq!(registry.get(2).unwrap().status, crate::scheduler::WorkerStatus::Busy);

        let status = engine
            .report_outcome(&mut job, 0, 2, Outcome::Success, &mut registry)
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
    }
}
