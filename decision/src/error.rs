use std::{error::Error, fmt};

use comms::specs::Partition;

use crate::WorkerId;

/// The decision module's result type.
pub type Result<T> = std::result::Result<T, DecisionErr>;

/// Protocol violations detected while accounting worker results.
///
/// Every variant is fatal for the run that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionErr {
    PartitionMismatch {
        worker: WorkerId,
        assigned: Partition,
        reported: Partition,
    },
    UnknownWorker(WorkerId),
    DuplicateAssignment {
        worker: WorkerId,
        partition: Partition,
    },
    SizeMismatch {
        field: &'static str,
        got: usize,
        expected: usize,
    },
}

impl fmt::Display for DecisionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionErr::PartitionMismatch {
                worker,
                assigned,
                reported,
            } => write!(
                f,
                "worker {worker} reported a {reported} minibatch but was assigned {assigned}"
            ),
            DecisionErr::UnknownWorker(worker) => {
                write!(f, "worker {worker} reported without an assignment")
            }
            DecisionErr::DuplicateAssignment { worker, partition } => write!(
                f,
                "worker {worker} was assigned {partition} while still holding a minibatch"
            ),
            DecisionErr::SizeMismatch {
                field,
                got,
                expected,
            } => write!(f, "{field} size mismatch: got {got}, expected {expected}"),
        }
    }
}

impl Error for DecisionErr {}
