use std::time::Duration;

pub(crate) const DEFAULT_MAX_JOBS: usize = 10_000;

/// Tunables for the supervisor core and its coordination loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Number of task failures a job may absorb before it fails terminally.
    /// Worker loss is not charged against this budget.
    pub retry_budget: u32,
    /// Interval between scheduling ticks of the coordination loop
    pub tick_interval_ms: u64,
    /// Upper bound on jobs held by the supervisor, finished ones included
    pub max_jobs: usize,
    /// How long a removed worker id stays reserved before `add` accepts it again
    pub worker_id_grace_ms: u64,
    /// Capacity of the event queue feeding the coordination loop
    pub event_queue_capacity: usize,
    /// Consecutive failed health probes after which a worker is deregistered
    pub max_failed_health_checks: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_budget: 1,
            tick_interval_ms: 100,
            max_jobs: DEFAULT_MAX_JOBS,
            worker_id_grace_ms: 0,
            event_queue_capacity: 256,
            max_failed_health_checks: 3,
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn with_worker_id_grace_ms(mut self, grace_ms: u64) -> Self {
        self.worker_id_grace_ms = grace_ms;
        self
    }

    pub fn with_max_failed_health_checks(mut self, max: u32) -> Self {
        self.max_failed_health_checks = max;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn worker_id_grace(&self) -> Duration {
        Duration::from_millis(self.worker_id_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_config_default() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.retry_budget, 1);
        assert_eq!(cfg.tick_interval_ms, 100);
        assert_eq!(cfg.max_jobs, 10_000);
        assert_eq!(cfg.worker_id_grace_ms, 0);
        assert_eq!(cfg.event_queue_capacity, 256);
        assert_eq!(cfg.max_failed_health_checks, 3);
    }

    #[test]
    fn supervisor_config_builders() {
        let cfg = SupervisorConfig::new()
            .with_retry_budget(3)
            .with_tick_interval_ms(20)
            .with_max_jobs(5)
            .with_worker_id_grace_ms(1_500)
            .with_max_failed_health_checks(2);
        assert_eq!(cfg.retry_budget, 3);
        assert_eq!(cfg.tick_interval(), Duration::from_millis(20));
        assert_eq!(cfg.max_jobs, 5);
        assert_eq!(cfg.worker_id_grace(), Duration::from_millis(1_500));
        assert_eq!(cfg.max_failed_health_checks, 2);
    }
}
