use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};
use crate::scheduler::job::TaskRef;

pub type WorkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerStatus {
    Idle,
    Busy,
    Unreachable,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub address: Ipv4Addr,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.address.octets();
        write!(f, "Id: {} Addr: {}.{}.{}.{}", self.id, a, b, c, d)
    }
}

#[derive(Debug)]
struct Slot {
    worker: Worker,
    outstanding: BTreeSet<TaskRef>,
}

/// Set of known workers in registration order.
///
/// Workers live in an arena of slots addressed through an id index, so add and
/// remove are O(1). Removal leaves a tombstone that keeps the positions of the
/// other workers stable; tombstones are compacted once they outnumber live
/// entries. Round-robin traversal walks the slots from the position after a
/// given worker and wraps at most once.
#[derive(Debug)]
pub struct WorkerRegistry {
    slots: Vec<Option<Slot>>,
    index: HashMap<WorkerId, usize>,
    retired: HashMap<WorkerId, Instant>,
    id_grace: Duration,
    next_id: WorkerId,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::with_id_grace(Duration::ZERO)
    }

    /// Registry that keeps removed ids reserved for `id_grace`.
    pub fn with_id_grace(id_grace: Duration) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            retired: HashMap::new(),
            id_grace,
            next_id: 1,
        }
    }

    /// Register a worker under a caller-supplied id. New workers start idle at
    /// the tail of the round-robin cycle.
    pub fn add(&mut self, id: WorkerId, address: Ipv4Addr) -> Result<&Worker> {
        if self.index.contains_key(&id) || self.in_grace(id) {
            return Err(SupervisorError::DuplicateWorker(id));
        }
        self.retired.remove(&id);

        let position = self.slots.len();
        self.slots.push(Some(Slot {
            worker: Worker {
                id,
                address,
                status: WorkerStatus::Idle,
                registered_at: Utc::now(),
            },
            outstanding: BTreeSet::new(),
        }));
        self.index.insert(id, position);
        self.next_id = self.next_id.max(id.saturating_add(1));
        tracing::info!(worker_id = id, address = %address, "Worker registered");

        self.slot(id).map(|s| &s.worker)
    }

    /// Register a worker under the next free registry-assigned id
    pub fn register(&mut self, address: Ipv4Addr) -> Result<WorkerId> {
        let mut id = self.next_id;
        while self.index.contains_key(&id) || self.in_grace(id) {
            id = id.saturating_add(1);
        }
        self.add(id, address)?;
        Ok(id)
    }

    /// Remove a worker, returning its entry and the tasks it still held.
    /// Callers re-queue those tasks before the entry disappears.
    pub fn remove(&mut self, id: WorkerId) -> Result<(Worker, Vec<TaskRef>)> {
        let position = self
            .index
            .remove(&id)
            .ok_or(SupervisorError::UnknownWorker(id))?;
        let slot = self.slots[position].take().ok_or_else(|| {
            SupervisorError::InvariantViolation(format!("worker {} indexed to an empty slot", id))
        })?;

        if !self.id_grace.is_zero() {
            self.retired.insert(id, Instant::now());
        }
        self.compact_if_sparse();
        tracing::info!(worker_id = id, "Worker removed");

        Ok((slot.worker, slot.outstanding.into_iter().collect()))
    }

    /// First idle worker after `start_after` in cycle order (from the head when
    /// `start_after` is absent or unknown), wrapping at most once.
    pub fn next_idle(&self, start_after: Option<WorkerId>) -> Option<&Worker> {
        let len = self.slots.len();
        if len == 0 {
            return None;
        }
        let start = start_after
            .and_then(|id| self.index.get(&id))
            .map(|&pos| pos + 1)
            .unwrap_or(0);

        (0..len)
            .map(|step| (start + step) % len)
            .filter_map(|pos| self.slots[pos].as_ref())
            .map(|slot| &slot.worker)
            .find(|w| w.status == WorkerStatus::Idle)
    }

    pub fn mark_busy(&mut self, id: WorkerId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.worker.status == WorkerStatus::Unreachable {
            return Err(SupervisorError::InvariantViolation(format!(
                "worker {} is unreachable and cannot take work",
                id
            )));
        }
        slot.worker.status = WorkerStatus::Busy;
        Ok(())
    }

    pub fn mark_idle(&mut self, id: WorkerId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if !slot.outstanding.is_empty() {
            return Err(SupervisorError::InvariantViolation(format!(
                "worker {} still holds {} task(s)",
                id,
                slot.outstanding.len()
            )));
        }
        slot.worker.status = WorkerStatus::Idle;
        Ok(())
    }

    pub fn mark_unreachable(&mut self, id: WorkerId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if !slot.outstanding.is_empty() {
            return Err(SupervisorError::InvariantViolation(format!(
                "worker {} still holds {} task(s)",
                id,
                slot.outstanding.len()
            )));
        }
        slot.worker.status = WorkerStatus::Unreachable;
        tracing::warn!(worker_id = id, "Worker unreachable");
        Ok(())
    }

    /// Record that `task` now runs on worker `id` and mark the worker busy
    pub fn attach_task(&mut self, id: WorkerId, task: TaskRef) -> Result<()> {
        self.mark_busy(id)?;
        self.slot_mut(id)?.outstanding.insert(task);
        Ok(())
    }

    /// Forget `task` on worker `id` without touching the worker status
    pub fn detach_task(&mut self, id: WorkerId, task: TaskRef) -> Result<()> {
        if !self.slot_mut(id)?.outstanding.remove(&task) {
            return Err(SupervisorError::InvariantViolation(format!(
                "task {} is not held by worker {}",
                task, id
            )));
        }
        Ok(())
    }

    /// Detach `task` and return the worker to idle once it holds nothing else
    pub fn release(&mut self, id: WorkerId, task: TaskRef) -> Result<()> {
        self.detach_task(id, task)?;
        let slot = self.slot_mut(id)?;
        if slot.outstanding.is_empty() && slot.worker.status == WorkerStatus::Busy {
            slot.worker.status = WorkerStatus::Idle;
        }
        Ok(())
    }

    pub fn outstanding(&self, id: WorkerId) -> Result<Vec<TaskRef>> {
        self.slot(id).map(|s| s.outstanding.iter().copied().collect())
    }

    pub fn get(&self, id: WorkerId) -> Option<&Worker> {
        self.slot(id).ok().map(|s| &s.worker)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Workers in round-robin order
    pub fn snapshot(&self) -> Vec<Worker> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.worker.clone())
            .collect()
    }

    fn in_grace(&self, id: WorkerId) -> bool {
        self.retired
            .get(&id)
            .is_some_and(|removed_at| removed_at.elapsed() < self.id_grace)
    }

    fn slot(&self, id: WorkerId) -> Result<&Slot> {
        self.index
            .get(&id)
            .and_then(|&pos| self.slots[pos].as_ref())
            .ok_or(SupervisorError::UnknownWorker(id))
    }

    fn slot_mut(&mut self, id: WorkerId) -> Result<&mut Slot> {
        match self.index.get(&id) {
            Some(&pos) => self.slots[pos]
                .as_mut()
                .ok_or(SupervisorError::UnknownWorker(id)),
            None => Err(SupervisorError::UnknownWorker(id)),
        }
    }

    fn compact_if_sparse(&mut self) {
        let live = self.index.len();
        if self.slots.len() <= 2 * live.max(4) {
            return;
        }
        self.slots.retain(Option::is_some);
        self.index = self
            .slots
            .iter()
            .flatten()
            .enumerate()
            .map(|(pos, slot)| (slot.worker.id, pos))
            .collect();
        tracing::debug!(workers = live, "Compacted worker registry");
    }
}
