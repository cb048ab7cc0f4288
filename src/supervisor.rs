use std::net::Ipv4Addr;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::scheduler::{
    Assignment, AssignmentEngine, AssignmentResult, Job, JobId, JobStateMachine, JobStatus,
    JobTable, Outcome, TaskRef, TaskStatus, Validation, Worker, WorkerId, WorkerRegistry,
    WorkerStatus,
};

/// What one scheduling pass did, per job it looked at
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub results: Vec<(JobId, AssignmentResult)>,
}

impl TickReport {
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.results.iter().flat_map(|(_, r)| r.assignments())
    }

    pub fn into_assignments(self) -> Vec<Assignment> {
        self.results
            .into_iter()
            .flat_map(|(_, r)| r.into_assignments())
            .collect()
    }

    pub fn result_for(&self, job_id: JobId) -> Option<&AssignmentResult> {
        self.results
            .iter()
            .find(|(id, _)| *id == job_id)
            .map(|(_, r)| r)
    }
}

/// Composition root of the scheduling core.
///
/// Owns the worker registry, the job table and the assignment engine, and
/// exposes the operations the manager and the workers invoke. All methods are
/// synchronous in-memory transitions; callers serialize access (see
/// [`crate::service`]).
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    registry: WorkerRegistry,
    jobs: JobTable,
    engine: AssignmentEngine,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            registry: WorkerRegistry::with_id_grace(config.worker_id_grace()),
            jobs: JobTable::with_capacity(config.max_jobs),
            engine: AssignmentEngine::new(),
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Create a job from its task descriptors and run it through finalization
    /// and validation. A job with a malformed descriptor is kept, as `Failed`.
    pub fn submit_job(&mut self, id: JobId, descriptions: Vec<String>) -> Result<&Job> {
        self.jobs.check_insert(id)?;

        let mut job = Job::new(id, descriptions, self.config.retry_budget);
        job.status = JobStateMachine::finalize(&job)?;
        Self::prepare(&mut job)?;

        tracing::info!(job_id = id, tasks = job.tasks.len(), status = %job.status, "Job submitted");
        self.jobs.add_job(job)
    }

    /// Stop handing out the job's remaining tasks. Tasks already running are
    /// left to finish and their outcomes are discarded.
    pub fn cancel_job(&mut self, id: JobId) -> Result<JobStatus> {
        let job = self.jobs.get_job_mut(id)?;
        let next = JobStateMachine::cancel(job.status)?;
        job.cancel_pending_tasks();
        job.finish(next);
        tracing::info!(
            job_id = id,
            still_running = job.running_tasks().len(),
            "Job cancelled"
        );
        Ok(next)
    }

    pub fn status_of(&self, id: JobId) -> Result<JobStatus> {
        self.jobs.get_job(id).map(|job| job.status)
    }

    pub fn job(&self, id: JobId) -> Result<&Job> {
        self.jobs.get_job(id)
    }

    pub fn jobs(&self) -> Vec<&Job> {
        self.jobs.all_jobs()
    }

    /// Hand a finished job to the manager and forget it
    pub fn acknowledge(&mut self, id: JobId) -> Result<Job> {
        let job = self.jobs.remove_job(id)?;
        tracing::debug!(job_id = id, status = %job.status, "Job acknowledged");
        Ok(job)
    }

    /// Drop every finished job with no task still out on a worker
    pub fn collect_finished(&mut self) -> usize {
        let removed = self.jobs.cleanup_finished_jobs();
        if removed > 0 {
            tracing::debug!(removed, "Collected finished jobs");
        }
        removed
    }

    // =========================================================================
    // Workers
    // =========================================================================

    pub fn register_worker(&mut self, id: WorkerId, address: Ipv4Addr) -> Result<&Worker> {
        self.registry.add(id, address)
    }

    /// Register a worker under a registry-assigned id
    pub fn register(&mut self, address: Ipv4Addr) -> Result<WorkerId> {
        self.registry.register(address)
    }

    /// Remove a worker. Tasks it was running go back to `Ready` first.
    pub fn deregister_worker(&mut self, id: WorkerId) -> Result<Worker> {
        self.requeue_tasks_of(id)?;
        let (worker, _) = self.registry.remove(id)?;
        Ok(worker)
    }

    /// Take a worker out of rotation without forgetting it. Tasks it was
    /// running are re-queued as if the worker had been lost.
    pub fn mark_worker_unreachable(&mut self, id: WorkerId) -> Result<()> {
        self.requeue_tasks_of(id)?;
        self.registry.mark_unreachable(id)
    }

    pub fn mark_worker_reachable(&mut self, id: WorkerId) -> Result<()> {
        if self.worker(id)?.status == WorkerStatus::Unreachable {
            self.registry.mark_idle(id)?;
            tracing::info!(worker_id = id, "Worker reachable again");
        }
        Ok(())
    }

    pub fn worker(&self, id: WorkerId) -> Result<&Worker> {
        self.registry
            .get(id)
            .ok_or(SupervisorError::UnknownWorker(id))
    }

    pub fn workers(&self) -> Vec<Worker> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Sole ingress for task outcomes. `worker` is the worker reporting; its
    /// report is dropped unless it still holds `task`.
    pub fn report_outcome(
        &mut self,
        task: TaskRef,
        worker: WorkerId,
        outcome: Outcome,
    ) -> Result<JobStatus> {
        let job = self.jobs.get_job_mut(task.job)?;
        self.engine
            .report_outcome(job, task.index, worker, outcome, &mut self.registry)
            .inspect_err(log_violation)
    }

    /// One scheduling pass over every job that still has tasks to hand out,
    /// in submission order.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for id in self.jobs.ids() {
            let Ok(job) = self.jobs.get_job_mut(id) else {
                continue;
            };

            if job.status == JobStatus::NotReady {
                if let Err(e) = Self::prepare(job) {
                    log_violation(&e);
                    continue;
                }
            }
            if !matches!(job.status, JobStatus::Ready | JobStatus::Running) || !job.has_ready_tasks()
            {
                continue;
            }

            match self.engine.assign(job, &mut self.registry) {
                Ok(result) => report.results.push((id, result)),
                Err(e) => {
                    log_violation(&e);
                    tracing::error!(job_id = id, error = %e, "Assignment aborted");
                }
            }
        }

        let assigned = report.assignments().count();
        if assigned > 0 {
            tracing::debug!(assigned, "Scheduling tick");
        }
        report
    }

    /// Verify that worker status agrees with task bookkeeping: a worker is busy
    /// exactly when some running task names it, and a task names a worker
    /// exactly when it is running.
    pub fn check_invariants(&self) -> Result<()> {
        let jobs = self.jobs.all_jobs();

        for job in &jobs {
            for (index, task) in job.tasks.iter().enumerate() {
                let running = task.status == TaskStatus::Running;
                if running != task.assigned_worker.is_some() {
                    return Err(SupervisorError::InvariantViolation(format!(
                        "task {} is {} with worker {:?}",
                        job.task_ref(index),
                        task.status,
                        task.assigned_worker
                    )));
                }
            }
        }

        for worker in self.registry.snapshot() {
            let held = jobs
                .iter()
                .flat_map(|job| job.tasks.iter())
                .filter(|t| t.status == TaskStatus::Running && t.assigned_worker == Some(worker.id))
                .count();
            let outstanding = self.registry.outstanding(worker.id)?.len();
            if held != outstanding || (worker.status == WorkerStatus::Busy) != (held > 0) {
                return Err(SupervisorError::InvariantViolation(format!(
                    "worker {} is {} holding {} running task(s), {} recorded",
                    worker.id, worker.status, held, outstanding
                )));
            }
        }
        Ok(())
    }

    /// Move a `Not_Ready` job to `Ready`, or to `Failed` when a descriptor is
    /// permanently malformed.
    fn prepare(job: &mut Job) -> Result<()> {
        match JobStateMachine::validate(job)? {
            Validation::Ready => {
                for task in &mut job.tasks {
                    if task.status == TaskStatus::NotReady {
                        task.status = TaskStatus::Ready;
                    }
                }
                job.status = JobStatus::Ready;
            }
            Validation::Malformed { index, reason } => {
                let next = JobStateMachine::transition(job.status, JobStatus::Failed)?;
                job.error = Some(format!("task {}: {}", index, reason));
                job.cancel_pending_tasks();
                job.finish(next);
                tracing::warn!(job_id = job.id, task = index, reason = %reason, "Job rejected");
            }
        }
        Ok(())
    }

    fn requeue_tasks_of(&mut self, id: WorkerId) -> Result<()> {
        for task in self.registry.outstanding(id)? {
            let job = self.jobs.get_job_mut(task.job)?;
            self.engine
                .handle_worker_lost(job, task.index, id, &mut self.registry)
                .inspect_err(log_violation)?;
        }
        Ok(())
    }
}

fn log_violation(error: &SupervisorError) {
    if let SupervisorError::InvariantViolation(msg) = error {
        tracing::error!(violation = %msg, "Supervisor invariant violated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn submit_runs_job_to_ready() {
        let mut sup = Supervisor::default();
        let job = sup.submit_job(42, tasks(&["task0.py", "task1.py"])).unwrap();
        assert_eq!(job.status, JobStatus::Ready);
        assert!(job.tasks.iter().all(|t| t.status == TaskStatus::Ready));
    }

    #[test]
    fn submit_duplicate_job_fails() {
        let mut sup = Supervisor::default();
        sup.submit_job(1, tasks(&["a"])).unwrap();
        assert_eq!(
            sup.submit_job(1, tasks(&["b"])).unwrap_err(),
            SupervisorError::DuplicateJob(1)
        );
        assert_eq!(sup.job(1).unwrap().tasks[0].description, "a");
    }

    #[test]
    fn submit_empty_job_fails_closed() {
        let mut sup = Supervisor::default();
        assert!(matches!(
            sup.submit_job(1, vec![]),
            Err(SupervisorError::InvalidJob { job: 1, .. })
        ));
        assert_eq!(sup.status_of(1).unwrap_err(), SupervisorError::UnknownJob(1));
    }

    #[test]
    fn malformed_descriptor_fails_job() {
        let mut sup = Supervisor::default();
        sup.register_worker(1, Ipv4Addr::LOCALHOST).unwrap();
        let job = sup.submit_job(1, tasks(&["ok.py", ""])).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().starts_with("task 1"));
        assert!(sup.tick().results.is_empty());
    }

    #[test]
    fn submit_respects_capacity() {
        let mut sup = Supervisor::new(SupervisorConfig::default().with_max_jobs(1));
        sup.submit_job(1, tasks(&["a"])).unwrap();
        assert_eq!(
            sup.submit_job(2, tasks(&["a"])).unwrap_err(),
            SupervisorError::CapacityExceeded(1)
        );
    }

    #[test]
    fn cancel_stops_assignment() {
        let mut sup = Supervisor::default();
        sup.submit_job(1, tasks(&["a", "b"])).unwrap();
        assert_eq!(sup.cancel_job(1).unwrap(), JobStatus::Cancelled);

        sup.register_worker(1, Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(sup.tick().assignments().count(), 0);
        assert!(matches!(
            sup.cancel_job(1),
            Err(SupervisorError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn acknowledge_removes_finished_job() {
        let mut sup = Supervisor::default();
        sup.register_worker(1, Ipv4Addr::LOCALHOST).unwrap();
        sup.submit_job(1, tasks(&["a"])).unwrap();
        assert_eq!(sup.acknowledge(1).unwrap_err(), SupervisorError::JobActive(1));

        sup.tick();
        sup.report_outcome(TaskRef::new(1, 0), 1, Outcome::Success).unwrap();
        let job = sup.acknowledge(1).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(sup.status_of(1).unwrap_err(), SupervisorError::UnknownJob(1));
    }

    #[test]
    fn unreachable_worker_gives_up_its_task() {
        let mut sup = Supervisor::default();
        sup.register_worker(1, Ipv4Addr::LOCALHOST).unwrap();
        sup.register_worker(2, Ipv4Addr::LOCALHOST).unwrap();
        sup.submit_job(1, tasks(&["a"])).unwrap();
        sup.tick();

        sup.mark_worker_unreachable(1).unwrap();
        assert_eq!(sup.worker(1).unwrap().status, WorkerStatus::Unreachable);
        assert_eq!(sup.job(1).unwrap().tasks[0].status, TaskStatus::Ready);
        sup.check_invariants().unwrap();

        let report = sup.tick();
        assert_eq!(report.assignments().next().map(|a| a.worker), Some(2));

        sup.mark_worker_reachable(1).unwrap();
        assert_eq!(sup.worker(1).unwrap().status, WorkerStatus::Idle);
    }
}
