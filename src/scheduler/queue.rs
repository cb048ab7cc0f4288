use std::collections::{HashMap, VecDeque};

use crate::config::DEFAULT_MAX_JOBS;
use crate::error::{Result, SupervisorError};
use crate::scheduler::job::{Job, JobId};

/// Holds the supervisor's jobs in submission order
#[derive(Debug)]
pub struct JobTable {
    jobs: HashMap<JobId, Job>,
    order: VecDeque<JobId>,
    max_jobs: usize,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            order: VecDeque::new(),
            max_jobs,
        }
    }

    /// Checks that a job with `id` could be inserted right now
    pub fn check_insert(&self, id: JobId) -> Result<()> {
        if self.jobs.contains_key(&id) {
            return Err(SupervisorError::DuplicateJob(id));
        }
        if self.is_full() {
            return Err(SupervisorError::CapacityExceeded(self.max_jobs));
        }
        Ok(())
    }

    pub fn add_job(&mut self, job: Job) -> Result<&Job> {
        let id = job.id;
        self.check_insert(id)?;
        self.order.push_back(id);
        Ok(self.jobs.entry(id).or_insert(job))
    }

    pub fn get_job(&self, id: JobId) -> Result<&Job> {
        self.jobs.get(&id).ok_or(SupervisorError::UnknownJob(id))
    }

    pub fn get_job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs.get_mut(&id).ok_or(SupervisorError::UnknownJob(id))
    }

    /// Job ids in submission order
    pub fn ids(&self) -> Vec<JobId> {
        self.order.iter().copied().collect()
    }

    /// All jobs in submission order
    pub fn all_jobs(&self) -> Vec<&Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id)).collect()
    }

    /// Remove a drained job. Jobs that are live or still have tasks out on
    /// workers stay put.
    pub fn remove_job(&mut self, id: JobId) -> Result<Job> {
        let job = self.get_job(id)?;
        if !job.is_drained() {
            return Err(SupervisorError::JobActive(id));
        }
        self.order.retain(|&j| j != id);
        self.jobs.remove(&id).ok_or(SupervisorError::UnknownJob(id))
    }

    /// Remove every drained job. Returns the number of jobs removed.
    pub fn cleanup_finished_jobs(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.is_drained());
        let jobs = &self.jobs;
        self.order.retain(|id| jobs.contains_key(id));
        before - self.jobs.len()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
