use std::collections::HashMap;

use crate::scheduler::WorkerId;

/// What the supervisor should do with a worker after a health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Probe failed; take the worker out of rotation
    Unreachable { consecutive_failures: u32 },
    /// Too many consecutive failures; deregister the worker
    Evict,
}

/// Counts consecutive failed health probes per worker.
#[derive(Debug)]
pub struct HealthMonitor {
    max_failures: u32,
    failures: HashMap<WorkerId, u32>,
}

impl HealthMonitor {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            failures: HashMap::new(),
        }
    }

    pub fn record(&mut self, worker_id: WorkerId, healthy: bool) -> HealthVerdict {
        if healthy {
            self.failures.remove(&worker_id);
            return HealthVerdict::Healthy;
        }

        let count = self.failures.entry(worker_id).or_insert(0);
        *count += 1;
        if *count >= self.max_failures {
            self.failures.remove(&worker_id);
            HealthVerdict::Evict
        } else {
            HealthVerdict::Unreachable {
                consecutive_failures: *count,
            }
        }
    }

    pub fn forget(&mut self, worker_id: WorkerId) {
        self.failures.remove(&worker_id);
    }

    pub fn failures(&self, worker_id: WorkerId) -> u32 {
        self.failures.get(&worker_id).copied().unwrap_or(0)
    }
}
