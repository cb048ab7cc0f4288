use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::scheduler::{Assignment, Job, JobId, JobStatus, Outcome, TaskRef, Worker, WorkerId};
use crate::supervisor::Supervisor;
use crate::worker::{HealthMonitor, HealthVerdict};

/// Requests funnelled into the coordination loop. Each carries the channel its
/// answer goes back on.
#[derive(Debug)]
enum Event {
    SubmitJob {
        id: JobId,
        tasks: Vec<String>,
        reply: oneshot::Sender<Result<JobStatus>>,
    },
    RegisterWorker {
        id: Option<WorkerId>,
        address: Ipv4Addr,
        reply: oneshot::Sender<Result<WorkerId>>,
    },
    DeregisterWorker {
        id: WorkerId,
        reply: oneshot::Sender<Result<Worker>>,
    },
    ReportOutcome {
        task: TaskRef,
        worker: WorkerId,
        outcome: Outcome,
        reply: oneshot::Sender<Result<JobStatus>>,
    },
    CancelJob {
        id: JobId,
        reply: oneshot::Sender<Result<JobStatus>>,
    },
    HealthProbe {
        id: WorkerId,
        healthy: bool,
        reply: oneshot::Sender<Result<HealthVerdict>>,
    },
    StatusOf {
        id: JobId,
        reply: oneshot::Sender<Result<JobStatus>>,
    },
    GetJob {
        id: JobId,
        reply: oneshot::Sender<Result<Job>>,
    },
    Workers {
        reply: oneshot::Sender<Vec<Worker>>,
    },
    Acknowledge {
        id: JobId,
        reply: oneshot::Sender<Result<Job>>,
    },
    Tick {
        reply: oneshot::Sender<usize>,
    },
}

/// Single-writer coordination loop around a [`Supervisor`].
///
/// Registration events, task outcomes and the periodic scheduling tick all
/// arrive on one queue and are applied one at a time, so the supervisor never
/// needs a lock. Assignments produced by a tick are pushed onto an unbounded
/// channel for an external dispatcher; the loop never waits on dispatch.
pub struct SupervisorService {
    supervisor: Supervisor,
    health: HealthMonitor,
    events_rx: mpsc::Receiver<Event>,
    assignments_tx: mpsc::UnboundedSender<Assignment>,
    tick_interval: Duration,
}

impl SupervisorService {
    pub fn new(
        config: SupervisorConfig,
    ) -> (Self, SupervisorHandle, mpsc::UnboundedReceiver<Assignment>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (assignments_tx, assignments_rx) = mpsc::unbounded_channel();

        let service = Self {
            health: HealthMonitor::new(config.max_failed_health_checks),
            tick_interval: config.tick_interval(),
            supervisor: Supervisor::new(config),
            events_rx,
            assignments_tx,
        };

        (service, SupervisorHandle { tx: events_tx }, assignments_rx)
    }

    /// Run until `shutdown` is cancelled or every handle is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            retry_budget = self.supervisor.config().retry_budget,
            "Supervisor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping supervisor");
                    break;
                }

                event = self.events_rx.recv() => {
                    let Some(event) = event else {
                        // All handles dropped
                        break;
                    };
                    if self.handle_event(event) {
                        self.schedule();
                    }
                }

                _ = interval.tick() => {
                    self.schedule();
                }
            }
        }

        let running: usize = self
            .supervisor
            .jobs()
            .iter()
            .map(|job| job.running_tasks().len())
            .sum();
        tracing::info!(
            jobs = self.supervisor.jobs().len(),
            running_tasks = running,
            "Supervisor stopped"
        );
    }

    /// Apply one event. Returns true when the event may have made new
    /// assignments possible.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::SubmitJob { id, tasks, reply } => {
                let result = self.supervisor.submit_job(id, tasks).map(|job| job.status);
                let changed = result.is_ok();
                let _ = reply.send(result);
                changed
            }
            Event::RegisterWorker { id, address, reply } => {
                let result = match id {
                    Some(id) => self.supervisor.register_worker(id, address).map(|w| w.id),
                    None => self.supervisor.register(address),
                };
                let changed = result.is_ok();
                let _ = reply.send(result);
                changed
            }
            Event::DeregisterWorker { id, reply } => {
                let result = self.supervisor.deregister_worker(id);
                if result.is_ok() {
                    self.health.forget(id);
                }
                let changed = result.is_ok();
                let _ = reply.send(result);
                changed
            }
            Event::ReportOutcome {
                task,
                worker,
                outcome,
                reply,
            } => {
                let result = self.supervisor.report_outcome(task, worker, outcome);
                let changed = result.is_ok();
                let _ = reply.send(result);
                changed
            }
            Event::CancelJob { id, reply } => {
                let _ = reply.send(self.supervisor.cancel_job(id));
                false
            }
            Event::HealthProbe { id, healthy, reply } => {
                let result = self.health_probe(id, healthy);
                let changed = result.is_ok();
                let _ = reply.send(result);
                changed
            }
            Event::StatusOf { id, reply } => {
                let _ = reply.send(self.supervisor.status_of(id));
                false
            }
            Event::GetJob { id, reply } => {
                let _ = reply.send(self.supervisor.job(id).cloned());
                false
            }
            Event::Workers { reply } => {
                let _ = reply.send(self.supervisor.workers());
                false
            }
            Event::Acknowledge { id, reply } => {
                let _ = reply.send(self.supervisor.acknowledge(id));
                false
            }
            Event::Tick { reply } => {
                let _ = reply.send(self.schedule());
                false
            }
        }
    }

    fn health_probe(&mut self, id: WorkerId, healthy: bool) -> Result<HealthVerdict> {
        self.supervisor.worker(id)?;

        let verdict = self.health.record(id, healthy);
        match verdict {
            HealthVerdict::Healthy => self.supervisor.mark_worker_reachable(id)?,
            HealthVerdict::Unreachable {
                consecutive_failures,
            } => {
                tracing::warn!(worker_id = id, consecutive_failures, "Health probe failed");
                self.supervisor.mark_worker_unreachable(id)?;
            }
            HealthVerdict::Evict => {
                tracing::warn!(worker_id = id, "Worker failed too many health probes, evicting");
                self.supervisor.deregister_worker(id)?;
            }
        }
        Ok(verdict)
    }

    /// Run a scheduling tick and hand its assignments to the dispatcher
    fn schedule(&mut self) -> usize {
        let assignments = self.supervisor.tick().into_assignments();
        let count = assignments.len();
        for assignment in assignments {
            if let Err(e) = self.assignments_tx.send(assignment) {
                tracing::warn!(task = %e.0.task, "No dispatcher listening, assignment dropped");
            }
        }
        count
    }
}

/// Cloneable client side of a running [`SupervisorService`]
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Event>,
}

impl SupervisorHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SupervisorError::ServiceStopped)?;
        reply_rx.await.map_err(|_| SupervisorError::ServiceStopped)
    }

    pub async fn submit_job(&self, id: JobId, tasks: Vec<String>) -> Result<JobStatus> {
        self.request(|reply| Event::SubmitJob { id, tasks, reply })
            .await?
    }

    pub async fn register_worker(&self, id: WorkerId, address: Ipv4Addr) -> Result<WorkerId> {
        self.request(|reply| Event::RegisterWorker {
            id: Some(id),
            address,
            reply,
        })
        .await?
    }

    /// Register a worker under a supervisor-assigned id
    pub async fn register(&self, address: Ipv4Addr) -> Result<WorkerId> {
        self.request(|reply| Event::RegisterWorker {
            id: None,
            address,
            reply,
        })
        .await?
    }

    pub async fn deregister_worker(&self, id: WorkerId) -> Result<Worker> {
        self.request(|reply| Event::DeregisterWorker { id, reply })
            .await?
    }

    pub async fn report_outcome(
        &self,
        task: TaskRef,
        worker: WorkerId,
        outcome: Outcome,
    ) -> Result<JobStatus> {
        self.request(|reply| Event::ReportOutcome {
            task,
            worker,
            outcome,
            reply,
        })
        .await?
    }

    pub async fn cancel_job(&self, id: JobId) -> Result<JobStatus> {
        self.request(|reply| Event::CancelJob { id, reply }).await?
    }

    pub async fn health_probe(&self, id: WorkerId, healthy: bool) -> Result<HealthVerdict> {
        self.request(|reply| Event::HealthProbe { id, healthy, reply })
            .await?
    }

    pub async fn status_of(&self, id: JobId) -> Result<JobStatus> {
        self.request(|reply| Event::StatusOf { id, reply }).await?
    }

    pub async fn job(&self, id: JobId) -> Result<Job> {
        self.request(|reply| Event::GetJob { id, reply }).await?
    }

    pub async fn workers(&self) -> Result<Vec<Worker>> {
        self.request(|reply| Event::Workers { reply }).await
    }

    pub async fn acknowledge(&self, id: JobId) -> Result<Job> {
        self.request(|reply| Event::Acknowledge { id, reply }).await?
    }

    /// Force a scheduling tick now. Returns the number of tasks assigned.
    pub async fn tick_now(&self) -> Result<usize> {
        self.request(|reply| Event::Tick { reply }).await
    }
}
