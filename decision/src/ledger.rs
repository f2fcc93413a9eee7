use std::{collections::HashMap, fmt};

use comms::specs::{Partition, PerPartition};
use log::warn;

use crate::{DecisionErr, Result};

/// Identifies a worker session for as long as its connection lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tracks which minibatches are still in flight on the master side.
///
/// A partition is drained once the loader is exhausted for it and no worker holds one of
/// its minibatches anymore.
#[derive(Debug, Default)]
pub struct WorkLedger {
    outstanding: PerPartition<usize>,
    assigned: HashMap<WorkerId, Partition>,
}

impl WorkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `worker` now holds a minibatch of `partition`.
    ///
    /// # Errors
    /// `DuplicateAssignment` if the worker still holds a previous minibatch.
    pub fn assign(&mut self, worker: WorkerId, partition: Partition) -> Result<()> {
        if self.assigned.contains_key(&worker) {
            return Err(DecisionErr::DuplicateAssignment { worker, partition });
        }

        self.assigned.insert(worker, partition);
        self.outstanding[partition] += 1;
        Ok(())
    }

    /// The partition of the minibatch `worker` currently holds, if any.
    pub fn assigned(&self, worker: WorkerId) -> Option<Partition> {
        self.assigned.get(&worker).copied()
    }

    /// Releases the job held by `worker`, a no-op if it holds none.
    ///
    /// # Returns
    /// The partition of the released job.
    pub fn finalize(&mut self, worker: WorkerId) -> Option<Partition> {
        let partition = self.assigned.remove(&worker)?;
        let outstanding = &mut self.outstanding[partition];

        // Unreachable while `assign` and `finalize` pair up, the map and the counts
        // move together.
        match outstanding.checked_sub(1) {
            Some(left) => *outstanding = left,
            None => warn!(
                worker = worker.0, partition = partition.name();
                "worker resulted in a negative minibatch balance"
            ),
        }

        Some(partition)
    }

    pub fn outstanding(&self, partition: Partition) -> usize {
        self.outstanding[partition]
    }

    /// Whether every served minibatch of `partition` has been accounted for.
    pub fn drained(&self, partition: Partition, exhausted: &PerPartition<bool>) -> bool {
        exhausted[partition] && self.outstanding[partition] == 0
    }

    /// Whether no worker holds a minibatch of any partition.
    pub fn is_idle(&self) -> bool {
        self.outstanding.values().all(|&n| n == 0)
    }

    /// Amount of workers currently holding a minibatch.
    pub fn busy_workers(&self) -> usize {
        self.assigned.len()
    }
}
