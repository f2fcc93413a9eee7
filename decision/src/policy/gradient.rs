use std::{mem, ops::Range};

use comms::specs::{DecisionSpec, MinibatchMetrics, Partition, PerPartition, SampleSnapshot};

use super::{Decision, DynamicAlpha, EpochContext};
use crate::{
    BestRecord, DecisionErr, Result, UNSET,
    metrics::{EpochMetrics, MetricAccumulator},
    rollback::SharedLearnable,
};

/// Rules gradient descent training: skips the gradient step outside the train
/// partition, tracks validation loss and error count against the best record and
/// stops once both stall.
pub struct GradientDecision {
    spec: DecisionSpec,
    accumulators: PerPartition<MetricAccumulator>,
    epoch_metrics: PerPartition<Option<EpochMetrics>>,
    epoch_min_loss: PerPartition<f64>,
    record: BestRecord,
    samples_loss: PerPartition<Vec<f32>>,
    epoch_samples_loss: PerPartition<Vec<f32>>,
    samples: Option<SampleSnapshot>,
    alpha: DynamicAlpha,
}

impl GradientDecision {
    /// Creates a new `GradientDecision`.
    ///
    /// # Arguments
    /// * `spec` - The decision policy.
    /// * `class_lengths` - The amount of samples in every partition, sizes the per
    ///                     sample loss buffers.
    pub fn new(spec: DecisionSpec, class_lengths: PerPartition<usize>) -> Self {
        let samples_loss = PerPartition::from_fn(|p| {
            if spec.store_samples_loss {
                vec![0.; class_lengths[p]]
            } else {
                Vec::new()
            }
        });

        Self {
            record: BestRecord::new(spec.tie_break),
            accumulators: PerPartition::default(),
            epoch_metrics: PerPartition::default(),
            epoch_min_loss: PerPartition::new(UNSET, UNSET, UNSET),
            epoch_samples_loss: samples_loss.clone(),
            samples_loss,
            samples: None,
            alpha: DynamicAlpha::new(),
            spec,
        }
    }

    /// Registers a component whose learning rate the dynamic alpha adapts.
    pub fn add_component(&mut self, learnable: SharedLearnable) {
        self.alpha.add_component(learnable);
    }

    pub fn spec(&self) -> &DecisionSpec {
        &self.spec
    }

    /// The metrics of the last finished pass over `partition`.
    pub fn epoch_metrics(&self, partition: Partition) -> Option<&EpochMetrics> {
        self.epoch_metrics[partition].as_ref()
    }

    /// The lowest average loss `partition` ever had.
    pub fn epoch_min_loss(&self, partition: Partition) -> f64 {
        self.epoch_min_loss[partition]
    }

    pub fn record(&self) -> &BestRecord {
        &self.record
    }

    /// The per sample losses of the last finished pass over `partition`.
    pub fn epoch_samples_loss(&self, partition: Partition) -> &[f32] {
        &self.epoch_samples_loss[partition]
    }

    /// The last captured sample.
    pub fn samples(&self) -> Option<&SampleSnapshot> {
        self.samples.as_ref()
    }

    /// Merges a minibatch, nothing is applied when either the metrics or the sample
    /// losses don't fit.
    fn accumulate(
        &mut self,
        ctx: &EpochContext,
        metrics: &MinibatchMetrics,
        sample_losses: &[f32],
    ) -> Result<()> {
        let range = self.sample_loss_range(ctx, sample_losses)?;
        self.accumulators[ctx.partition()].merge(metrics)?;

        if let Some(samples) = &metrics.samples {
            self.samples = Some(samples.clone());
        }

        if let Some(range) = range {
            let len = range.len();
            self.samples_loss[ctx.partition()][range].copy_from_slice(&sample_losses[..len]);
        }

        Ok(())
    }

    /// Where the minibatch's sample losses go in its partition buffer, if they are kept.
    ///
    /// # Errors
    /// `SizeMismatch` if the minibatch lands past the end of the buffer.
    fn sample_loss_range(
        &self,
        ctx: &EpochContext,
        sample_losses: &[f32],
    ) -> Result<Option<Range<usize>>> {
        if !self.spec.store_samples_loss || sample_losses.is_empty() {
            return Ok(None);
        }

        let start = ctx.minibatch.offset_in_partition(&ctx.class_lengths);
        let len = ctx.minibatch.size.min(sample_losses.len());
        let buf_len = self.samples_loss[ctx.partition()].len();

        if start + len > buf_len {
            return Err(DecisionErr::SizeMismatch {
                field: "sample_losses",
                got: start + len,
                expected: buf_len,
            });
        }

        Ok(Some(start..start + len))
    }

    fn this_train_err(&self) -> Option<f64> {
        let train = self.epoch_metrics[Partition::Train].as_ref()?;

        match (train.loss, train.n_err) {
            (Some(loss), _) if self.spec.track_loss => Some(loss.avg),
            (_, Some(n_err)) => Some(n_err as f64),
            _ => None,
        }
    }
}

impl Decision for GradientDecision {
    fn on_run(
        &mut self,
        ctx: &EpochContext,
        metrics: &MinibatchMetrics,
        sample_losses: &[f32],
    ) -> Result<bool> {
        self.accumulate(ctx, metrics, sample_losses)?;
        Ok(ctx.partition() != Partition::Train)
    }

    fn on_last_minibatch(&mut self, ctx: &EpochContext) {
        let partition = ctx.partition();
        let frozen = self.accumulators[partition].freeze(ctx.class_length());

        if let Some(loss) = frozen.loss {
            let min = &mut self.epoch_min_loss[partition];
            *min = min.min(loss.avg);
        }

        self.epoch_metrics[partition] = Some(frozen);
    }

    fn on_validation_processed(&mut self, ctx: &EpochContext) -> bool {
        let Some(current) = self.epoch_metrics[ctx.partition()].as_ref() else {
            return false;
        };
        let train = self.epoch_metrics[Partition::Train].as_ref();
        let epoch = ctx.epoch_number;

        let loss_improved = match current.loss {
            Some(loss) if self.spec.track_loss => {
                let train_loss = train.and_then(|m| m.loss).map_or(UNSET, |l| l.avg);
                self.record.loss.offer(loss.avg, train_loss, epoch)
            }
            _ => false,
        };

        let errors_improved = match current.n_err {
            Some(n_err) if self.spec.track_errors => {
                let train_err = train.and_then(|m| m.n_err).map_or(UNSET, |n| n as f64);
                self.record.errors.offer(n_err as f64, train_err, epoch)
            }
            _ => false,
        };

        loss_improved || errors_improved
    }

    fn on_training_finished(&mut self, _ctx: &EpochContext) {
        if self.spec.use_dynamic_alpha {
            let this_train_err = self.this_train_err();
            self.alpha.step(this_train_err);
        }
    }

    fn on_produce_report(&mut self, ctx: &EpochContext) -> MinibatchMetrics {
        MinibatchMetrics {
            samples: self.samples.clone(),
            ..self.accumulators[ctx.partition()].to_metrics()
        }
    }

    fn on_apply_assignment(&mut self, ctx: &EpochContext) {
        self.reset_statistics(ctx.partition());
        self.samples = None;
    }

    fn on_apply_worker_result(
        &mut self,
        ctx: &EpochContext,
        metrics: &MinibatchMetrics,
        sample_losses: &[f32],
    ) -> Result<()> {
        self.accumulate(ctx, metrics, sample_losses)
    }

    fn reset_statistics(&mut self, partition: Partition) {
        self.accumulators[partition].reset();

        if self.spec.store_samples_loss {
            let fresh = vec![0.; self.samples_loss[partition].len()];
            self.epoch_samples_loss[partition] =
                mem::replace(&mut self.samples_loss[partition], fresh);
        }
    }

    fn fill_statistics(&self, ctx: &EpochContext, stats: &mut Vec<String>) {
        if let Some(metrics) = &self.epoch_metrics[ctx.partition()] {
            stats.extend(metrics.describe());
        }
    }

    fn fill_snapshot_suffixes(&self, ctx: &EpochContext, suffixes: &mut Vec<String>) {
        let Some(metrics) = &self.epoch_metrics[ctx.partition()] else {
            return;
        };

        if let Some(loss) = metrics.loss.filter(|_| self.spec.track_loss) {
            suffixes.push(format!("{:.6}", loss.avg));
        }

        if let Some(pct) = metrics.n_err_pct.filter(|_| self.spec.track_errors) {
            suffixes.push(format!("{pct:.2}pt"));
        }
    }

    fn stop_condition(&self, ctx: &EpochContext) -> bool {
        self.record.stalled(ctx.epoch_number, self.spec.fail_iterations)
            || self.record.errors.reached_zero()
            || self.record.loss.reached_zero()
    }

    fn best_record(&self) -> Option<&BestRecord> {
        Some(&self.record)
    }
}
