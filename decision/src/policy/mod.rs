//! Partition specific behavior plugged into the epoch coordinator.

mod dynamic_alpha;
mod gradient;

pub use dynamic_alpha::DynamicAlpha;
pub use gradient::GradientDecision;

use comms::specs::{Minibatch, MinibatchMetrics, Partition, PerPartition};

use crate::{BestRecord, Result, Role};

/// What the coordinator knows about the minibatch a hook runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochContext {
    pub role: Role,
    pub epoch_number: usize,
    pub minibatch: Minibatch,
    pub class_lengths: PerPartition<usize>,
}

impl EpochContext {
    pub fn partition(&self) -> Partition {
        self.minibatch.partition
    }

    /// The amount of samples in the current minibatch's partition.
    pub fn class_length(&self) -> usize {
        self.class_lengths[self.minibatch.partition]
    }
}

/// The hooks the coordinator calls through an epoch.
///
/// Every hook has a default that does nothing, so a policy only overrides what it
/// cares about.
pub trait Decision {
    /// Runs on every local tick with the minibatch's metrics.
    ///
    /// # Returns
    /// Whether the gradient step must be skipped for this minibatch.
    fn on_run(
        &mut self,
        ctx: &EpochContext,
        _metrics: &MinibatchMetrics,
        _sample_losses: &[f32],
    ) -> Result<bool> {
        Ok(ctx.partition() != Partition::Train)
    }

    /// Runs once the last minibatch of a partition has been accounted for.
    fn on_last_minibatch(&mut self, _ctx: &EpochContext) {}

    /// Compares the validation pass that just finished with the best record.
    ///
    /// # Returns
    /// Whether it improved.
    fn on_validation_processed(&mut self, _ctx: &EpochContext) -> bool {
        false
    }

    fn on_training_finished(&mut self, _ctx: &EpochContext) {}

    fn on_epoch_ended(&mut self, _ctx: &EpochContext) {}

    /// Produces the metric deltas a worker reports upstream.
    fn on_produce_report(&mut self, _ctx: &EpochContext) -> MinibatchMetrics {
        MinibatchMetrics::default()
    }

    /// Runs on a worker when the master hands it a new minibatch.
    fn on_apply_assignment(&mut self, _ctx: &EpochContext) {}

    /// Merges a worker's reported metrics on the master.
    fn on_apply_worker_result(
        &mut self,
        _ctx: &EpochContext,
        _metrics: &MinibatchMetrics,
        _sample_losses: &[f32],
    ) -> Result<()> {
        Ok(())
    }

    /// Clears the accumulated values of `partition` for its next pass.
    fn reset_statistics(&mut self, _partition: Partition) {}

    /// Appends the statistics of the pass that just finished.
    fn fill_statistics(&self, _ctx: &EpochContext, _stats: &mut Vec<String>) {}

    /// Appends the pieces of the snapshot name for an improved epoch.
    fn fill_snapshot_suffixes(&self, _ctx: &EpochContext, _suffixes: &mut Vec<String>) {}

    /// Lets a policy stop training on its own terms.
    fn stop_condition(&self, _ctx: &EpochContext) -> bool {
        false
    }

    /// The best so far record, for policies that keep one.
    fn best_record(&self) -> Option<&BestRecord> {
        None
    }
}
