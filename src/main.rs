use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use job_supervisor::scheduler::{Assignment, Job, JobStatus, Worker};
use job_supervisor::shutdown::install_shutdown_handler;
use job_supervisor::worker::{ExecutionResult, TaskExecutor};
use job_supervisor::{SupervisorConfig, SupervisorHandle, SupervisorService};

#[derive(Parser, Debug)]
#[command(name = "job-supervisor")]
#[command(version)]
#[command(about = "Supervises jobs split into tasks across a pool of workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run one job to completion on a pool of local workers
    Run(RunArgs),
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job ID
    #[arg(long, default_value = "1")]
    job_id: u64,

    /// Number of local workers (ids 1..=N, address 127.0.0.1)
    #[arg(long, short = 'w', default_value = "2")]
    workers: u64,

    /// Task to run, in order (repeat for several tasks)
    /// Example: -t "echo one" -t "echo two"
    #[arg(long = "task", short = 't', required = true)]
    tasks: Vec<String>,

    /// Task failures the job may absorb before it fails
    #[arg(long, default_value = "1")]
    retry_budget: u32,

    /// Scheduling tick interval in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Shell used to execute task descriptions
    #[arg(long, default_value = "sh")]
    shell: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct TaskResultOutput {
    task: usize,
    worker: u64,
    exit_code: Option<i32>,
    output: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct RunOutput {
    job: Job,
    workers: Vec<Worker>,
    results: Vec<TaskResultOutput>,
}

type ResultLog = Arc<Mutex<Vec<ExecutionResult>>>;

// =============================================================================
// Dispatcher
// =============================================================================

/// Executes every assignment on its own task and reports the outcome back.
async fn dispatch_loop(
    handle: SupervisorHandle,
    mut assignments: mpsc::UnboundedReceiver<Assignment>,
    executor: TaskExecutor,
    results: ResultLog,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            assignment = assignments.recv() => {
                let Some(assignment) = assignment else {
                    break;
                };
                let handle = handle.clone();
                let executor = executor.clone();
                let results = results.clone();
                tokio::spawn(async move {
                    let result = executor.execute(&assignment).await;
                    let (task, worker, outcome) = (result.task, result.worker, result.outcome);
                    // Results are logged before the job can reach a terminal status
                    results.lock().await.push(result);
                    if let Err(e) = handle.report_outcome(task, worker, outcome).await {
                        tracing::warn!(task = %task, error = %e, "Failed to report outcome");
                    }
                });
            }
        }
    }
}

// =============================================================================
// Run Implementation
// =============================================================================

async fn run(args: RunArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let config = SupervisorConfig::new()
        .with_retry_budget(args.retry_budget)
        .with_tick_interval_ms(args.tick_ms);

    let shutdown = install_shutdown_handler()?;
    let (service, handle, assignments) = SupervisorService::new(config);
    let service_task = tokio::spawn(service.run(shutdown.clone()));

    let results: ResultLog = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(dispatch_loop(
        handle.clone(),
        assignments,
        TaskExecutor::new(args.shell.clone()),
        results.clone(),
        shutdown.clone(),
    ));

    for id in 1..=args.workers {
        handle.register_worker(id, Ipv4Addr::LOCALHOST).await?;
    }

    let status = handle.submit_job(args.job_id, args.tasks.clone()).await?;
    tracing::info!(
        job_id = args.job_id,
        status = %status,
        workers = args.workers,
        "Job submitted"
    );

    let mut poll = tokio::time::interval(Duration::from_millis(args.tick_ms.max(10)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                handle.cancel_job(args.job_id).await.ok();
                break;
            }
            _ = poll.tick() => {
                if handle.status_of(args.job_id).await?.is_terminal() {
                    break;
                }
            }
        }
    }

    let job = handle.job(args.job_id).await?;
    let workers = handle.workers().await?;
    let mut results: Vec<ExecutionResult> = std::mem::take(&mut *results.lock().await);
    results.sort_by_key(|r| r.task.index);

    match args.output {
        OutputFormat::Json => print_json(&job, workers, results)?,
        OutputFormat::Table => print_table(&job, &workers, &results),
    }

    if job.is_drained() {
        handle.acknowledge(args.job_id).await?;
    }
    shutdown.cancel();
    service_task.await?;

    Ok(job.status == JobStatus::Completed)
}

fn print_json(
    job: &Job,
    workers: Vec<Worker>,
    results: Vec<ExecutionResult>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = RunOutput {
        job: job.clone(),
        workers,
        results: results
            .into_iter()
            .map(|r| TaskResultOutput {
                task: r.task.index,
                worker: r.worker,
                exit_code: r.exit_code,
                output: r.output,
                error: r.error,
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_table(job: &Job, workers: &[Worker], results: &[ExecutionResult]) {
    println!("{}", job);
    if let Some(error) = &job.error {
        println!("Error: {}", error);
    }
    println!();
    println!("{:<6} {:<10} {:<9} {:<8} TASK", "INDEX", "STATUS", "ATTEMPTS", "WORKER");
    println!("{}", "-".repeat(60));
    for (index, task) in job.tasks.iter().enumerate() {
        let worker = task
            .assigned_worker
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<10} {:<9} {:<8} {}",
            index,
            task.status.to_string(),
            task.attempts,
            worker,
            task.description
        );
    }

    println!();
    println!("Workers:");
    for worker in workers {
        println!("  {} [{}]", worker, worker.status);
    }

    for result in results {
        if let Some(output) = &result.output {
            println!();
            println!("Output of task {} (worker {}):", result.task.index, result.worker);
            for line in output.lines() {
                println!("  {}", line);
            }
        }
        if let Some(error) = &result.error {
            println!();
            println!("Error of task {} (worker {}):", result.task.index, result.worker);
            for line in error.lines() {
                println!("  {}", line);
            }
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(run_args) => {
            if !run(run_args).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
