use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::registry::WorkerId;

pub type JobId = u64;

/// Lifecycle of a job.
///
/// The first five variants carry the numeric ranks `-2..=2` and are ordered by
/// them. `Failed` and `Cancelled` are terminal sinks outside that scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Incomplete,
    NotReady,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Numeric rank on the ordered scale, `None` for the terminal sinks.
    pub fn rank(self) -> Option<i8> {
        match self {
            JobStatus::Incomplete => Some(-2),
            JobStatus::NotReady => Some(-1),
            JobStatus::Ready => Some(0),
            JobStatus::Running => Some(1),
            JobStatus::Completed => Some(2),
            JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Incomplete => write!(f, "Incomplete"),
            JobStatus::NotReady => write!(f, "Not_Ready"),
            JobStatus::Ready => write!(f, "Ready"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    NotReady,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::NotReady => write!(f, "Not_Ready"),
            TaskStatus::Ready => write!(f, "Ready"),
            TaskStatus::Running => write!(f, "Running"),
            TaskStatus::Completed => write!(f, "Completed"),
            TaskStatus::Failed => write!(f, "Failed"),
            TaskStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Addresses one task: the owning job plus its position in the job's task list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskRef {
    pub job: JobId,
    pub index: usize,
}

impl TaskRef {
    pub fn new(job: JobId, index: usize) -> Self {
        Self { job, index }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub status: TaskStatus,
    /// Set exactly while the task is `Running`
    pub assigned_worker: Option<WorkerId>,
    /// Number of times the task has been handed to a worker
    pub attempts: u32,
}

impl Task {
    pub fn new(description: String) -> Self {
        Self {
            description,
            status: TaskStatus::NotReady,
            assigned_worker: None,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub tasks: Vec<Task>,
    /// Task failures the job can still absorb before failing terminally
    pub retries_left: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, descriptions: Vec<String>, retry_budget: u32) -> Self {
        Self {
            id,
            status: JobStatus::Incomplete,
            tasks: descriptions.into_iter().map(Task::new).collect(),
            retries_left: retry_budget,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn task_ref(&self, index: usize) -> TaskRef {
        TaskRef::new(self.id, index)
    }

    pub fn task(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    /// Indices of tasks waiting for a worker, in declaration order
    pub fn ready_tasks(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Ready)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_ready_tasks(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Ready)
    }

    pub fn running_tasks(&self) -> Vec<TaskRef> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Running)
            .map(|(i, _)| self.task_ref(i))
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// Terminal with no task still out on a worker. Only drained jobs may be
    /// garbage-collected.
    pub fn is_drained(&self) -> bool {
        self.status.is_terminal() && self.tasks.iter().all(|t| t.status != TaskStatus::Running)
    }

    /// Cancels every task that has not been handed out yet.
    pub(crate) fn cancel_pending_tasks(&mut self) {
        for task in &mut self.tasks {
            if matches!(task.status, TaskStatus::NotReady | TaskStatus::Ready) {
                task.status = TaskStatus::Cancelled;
            }
        }
    }

    pub(crate) fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id: {} Status: {} Tasks:", self.id, self.status)?;
        for task in &self.tasks {
            write!(f, " {}", task.description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        let tasks = (0..3).map(|i| format!("task{}.py", i)).collect();
        Job::new(42, tasks, 1)
    }

    #[test]
    fn new_job_is_incomplete() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Incomplete);
        assert_eq!(job.tasks.len(), 3);
        assert!(job
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::NotReady && t.assigned_worker.is_none()));
        assert_eq!(job.retries_left, 1);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn job_display_matches_report_format() {
        let job = sample_job();
        assert_eq!(
            job.to_string(),
            "Id: 42 Status: Incomplete Tasks: task0.py task1.py task2.py"
        );
    }

    #[test]
    fn status_ranks_follow_lifecycle_order() {
        let ranks: Vec<i8> = [
            JobStatus::Incomplete,
            JobStatus::NotReady,
            JobStatus::Ready,
            JobStatus::Running,
            JobStatus::Completed,
        ]
        .iter()
        .filter_map(|s| s.rank())
        .collect();
        assert_eq!(ranks, vec![-2, -1, 0, 1, 2]);
        assert_eq!(JobStatus::Failed.rank(), None);
        assert_eq!(JobStatus::Cancelled.rank(), None);
        assert_eq!(JobStatus::NotReady.to_string(), "Not_Ready");
    }

    #[test]
    fn cancel_pending_leaves_running_tasks() {
        let mut job = sample_job();
        job.tasks[0].status = TaskStatus::Running;
        job.tasks[0].assigned_worker = Some(7);
        job.tasks[1].status = TaskStatus::Ready;
        job.cancel_pending_tasks();
        assert_eq!(job.tasks[0].status, TaskStatus::Running);
        assert_eq!(job.tasks[1].status, TaskStatus::Cancelled);
        assert_eq!(job.tasks[2].status, TaskStatus::Cancelled);
    }

    #[test]
    fn drained_requires_terminal_and_no_running() {
        let mut job = sample_job();
        job.tasks[0].status = TaskStatus::Running;
        job.finish(JobStatus::Cancelled);
        assert!(!job.is_drained());
        job.tasks[0].status = TaskStatus::Cancelled;
        assert!(job.is_drained());
        assert!(job.finished_at.is_some());
    }
}
