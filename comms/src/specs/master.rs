use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::{DecisionSpec, PerPartition, RollbackSpec};

/// Everything the master needs to coordinate a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterSpec {
    /// The amount of samples in the `eval`, `validation` and `train` partitions.
    pub class_lengths: PerPartition<usize>,
    pub minibatch_size: NonZeroUsize,
    #[serde(default)]
    pub decision: DecisionSpec,
    #[serde(default)]
    pub rollback: RollbackSpec,
}
