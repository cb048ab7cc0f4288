use job_supervisor::scheduler::{Assignment, Outcome, TaskRef};
use job_supervisor::worker::TaskExecutor;

fn assignment(description: &str) -> Assignment {
    Assignment {
        task: TaskRef::new(42, 0),
        worker: 1,
        description: description.to_string(),
    }
}

#[tokio::test]
async fn test_execute_simple_command() {
    let executor = TaskExecutor::default();

    let result = executor.execute(&assignment("echo hello")).await;

    assert_eq!(result.task, TaskRef::new(42, 0));
    assert_eq!(result.worker, 1);
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, Some("hello\n".to_string()));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_execute_empty_output() {
    let executor = TaskExecutor::default();

    let result = executor.execute(&assignment("true")).await;

    assert_eq!(result.outcome, Outcome::Success);
    assert!(result.output.is_none()); // Empty output should be None
}

#[tokio::test]
async fn test_execute_command_failure() {
    let executor = TaskExecutor::default();

    let result = executor.execute(&assignment("exit 3")).await;

    assert_eq!(result.outcome, Outcome::Failure);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.error, Some("Exit code: Some(3)".to_string()));
}

#[tokio::test]
async fn test_execute_command_with_stderr() {
    let executor = TaskExecutor::default();

    let result = executor
        .execute(&assignment("echo 'error message' >&2 && exit 1"))
        .await;

    assert_eq!(result.outcome, Outcome::Failure);
    assert!(result.error.unwrap().contains("error message"));
}

#[tokio::test]
async fn test_execute_invalid_command() {
    let executor = TaskExecutor::default();

    let result = executor
        .execute(&assignment("nonexistent_command_12345"))
        .await;

    assert_eq!(result.outcome, Outcome::Failure);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_missing_shell_is_failure() {
    let executor = TaskExecutor::new("/nonexistent/shell");

    let result = executor.execute(&assignment("echo hi")).await;

    assert_eq!(result.outcome, Outcome::Failure);
    assert!(result.exit_code.is_none());
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_execute_piped_commands() {
    let executor = TaskExecutor::default();

    let result = executor
        .execute(&assignment("echo 'hello world' | wc -w"))
        .await;

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.output.unwrap().trim(), "2");
}
