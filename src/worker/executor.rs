use std::process::Stdio;
use tokio::process::Command;

use crate::scheduler::{Assignment, Outcome, TaskRef, WorkerId};

/// Result of running one task
#[derive(Debug)]
pub struct ExecutionResult {
    pub task: TaskRef,
    pub worker: WorkerId,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Runs task descriptions as local shell commands.
///
/// Stands in for a remote worker: the binary uses it to carry out the
/// assignments the supervisor hands out and feeds the result back as an
/// [`Outcome`].
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    shell: String,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl TaskExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run the assignment's description via `<shell> -c`
    pub async fn execute(&self, assignment: &Assignment) -> ExecutionResult {
        tracing::info!(
            task = %assignment.task,
            worker_id = assignment.worker,
            description = %assignment.description,
            "Executing task"
        );

        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(&assignment.description)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(assignment, result)
    }

    fn process_output(
        assignment: &Assignment,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                let (outcome, error) = if output.status.success() {
                    (Outcome::Success, None)
                } else {
                    (
                        Outcome::Failure,
                        Some(if stderr.is_empty() {
                            format!("Exit code: {:?}", exit_code)
                        } else {
                            stderr
                        }),
                    )
                };

                tracing::info!(
                    task = %assignment.task,
                    outcome = ?outcome,
                    exit_code = ?exit_code,
                    "Task finished"
                );

                ExecutionResult {
                    task: assignment.task,
                    worker: assignment.worker,
                    outcome,
                    exit_code,
                    output: if stdout.is_empty() {
                        None
                    } else {
                        Some(stdout)
                    },
                    error,
                }
            }
            Err(e) => {
                tracing::error!(task = %assignment.task, error = %e, "Task execution failed");
                ExecutionResult {
                    task: assignment.task,
                    worker: assignment.worker,
                    outcome: Outcome::Failure,
                    exit_code: None,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
