use std::time::Instant;

use comms::specs::{
    Assignment, Minibatch, MinibatchMetrics, Partition, PerPartition, WorkerReport,
};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::{
    BestRecord, DecisionErr, Result, WorkLedger, WorkerId,
    policy::{Decision, EpochContext},
    signals::{Event, EventBus, Signals},
};

/// Which side of the distributed protocol a coordinator runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the ledger, advances epochs and decides improvement and completion.
    Master,
    /// Processes single minibatches handed out by the master.
    Worker,
}

/// The result of a local tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub skip_gradient: bool,
    pub signals: Signals,
}

/// What a finished run achieved.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Amount of completed epochs.
    pub epochs: usize,
    pub complete: bool,
    /// The suffix of the last improved epoch's snapshot.
    pub snapshot_suffix: String,
    pub best: Option<BestRecord>,
}

/// Keeps track of epochs over the three partitions while minibatches are processed
/// locally or by an asynchronous pool of workers.
///
/// Once the last minibatch of a partition is accounted for the decision policy
/// freezes its metrics, after validation it evaluates improvement and the stop
/// condition, and once every partition is done the epoch closes.
pub struct EpochCoordinator<D: Decision> {
    role: Role,
    decision: D,
    class_lengths: PerPartition<usize>,
    max_epochs: Option<usize>,
    epoch_number: usize,
    minibatch: Minibatch,
    exhausted: PerPartition<bool>,
    ledger: WorkLedger,
    reissued: Vec<Minibatch>,
    signals: Signals,
    has_data_for_worker: bool,
    snapshot_suffix: String,
    timestamps: PerPartition<Instant>,
    events: EventBus,
}

impl<D: Decision> EpochCoordinator<D> {
    /// Creates a new `EpochCoordinator`.
    ///
    /// # Arguments
    /// * `role` - The side of the protocol this coordinator runs on.
    /// * `decision` - The policy to run the hooks of.
    /// * `class_lengths` - The amount of samples in every partition.
    /// * `max_epochs` - Training completes once this many epochs have run.
    pub fn new(
        role: Role,
        decision: D,
        class_lengths: PerPartition<usize>,
        max_epochs: Option<usize>,
    ) -> Self {
        let now = Instant::now();

        // A master with neither validation nor train samples has nothing to decide on.
        let idle = role == Role::Master
            && class_lengths[Partition::Validation] == 0
            && class_lengths[Partition::Train] == 0;
        if idle {
            warn!("no validation nor train samples, training completes right away");
        }

        Self {
            role,
            decision,
            class_lengths,
            max_epochs,
            epoch_number: 0,
            minibatch: Minibatch {
                partition: Partition::Eval,
                size: 0,
                offset: 0,
                last: false,
            },
            exhausted: Self::fresh_exhaustion(&class_lengths),
            ledger: WorkLedger::new(),
            reissued: Vec::new(),
            signals: Signals {
                complete: idle,
                ..Default::default()
            },
            has_data_for_worker: true,
            snapshot_suffix: String::new(),
            timestamps: PerPartition::new(now, now, now),
            events: EventBus::default(),
        }
    }

    /// Empty partitions have nothing to serve, they start every epoch exhausted.
    fn fresh_exhaustion(class_lengths: &PerPartition<usize>) -> PerPartition<bool> {
        PerPartition::from_fn(|p| class_lengths[p] == 0)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn epoch_number(&self) -> usize {
        self.epoch_number
    }

    pub fn signals(&self) -> Signals {
        self.signals
    }

    pub fn improved(&self) -> bool {
        self.signals.improved
    }

    pub fn is_complete(&self) -> bool {
        self.signals.complete
    }

    /// Whether a worker may be handed more work in the current epoch.
    pub fn has_data_for_worker(&self) -> bool {
        self.has_data_for_worker
    }

    pub fn exhausted(&self) -> PerPartition<bool> {
        self.exhausted
    }

    pub fn class_lengths(&self) -> PerPartition<usize> {
        self.class_lengths
    }

    pub fn minibatch(&self) -> Minibatch {
        self.minibatch
    }

    pub fn ledger(&self) -> &WorkLedger {
        &self.ledger
    }

    /// The suffix computed for the last improved epoch.
    pub fn snapshot_suffix(&self) -> &str {
        &self.snapshot_suffix
    }

    pub fn decision(&self) -> &D {
        &self.decision
    }

    pub fn decision_mut(&mut self) -> &mut D {
        &mut self.decision
    }

    /// Subscribes to the coordinator's edge events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        self.events.subscribe()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            epochs: self.epoch_number,
            complete: self.signals.complete,
            snapshot_suffix: self.snapshot_suffix.clone(),
            best: self.decision.best_record().copied(),
        }
    }

    fn context(&self) -> EpochContext {
        EpochContext {
            role: self.role,
            epoch_number: self.epoch_number,
            minibatch: self.minibatch,
            class_lengths: self.class_lengths,
        }
    }

    /// Makes `minibatch` the current one, as served by the loader.
    ///
    /// Serving the last minibatch of a partition marks it exhausted.
    pub fn observe(&mut self, minibatch: Minibatch) {
        self.minibatch = minibatch;
        if minibatch.last {
            self.exhausted[minibatch.partition] = true;
        }
    }

    /// Accounts the current minibatch after it was processed locally.
    ///
    /// # Arguments
    /// * `metrics` - The minibatch's metric deltas.
    /// * `sample_losses` - The loss of every sample in the minibatch.
    ///
    /// # Returns
    /// Whether to skip the gradient step along with the updated signals.
    pub fn run(
        &mut self,
        metrics: &MinibatchMetrics,
        sample_losses: &[f32],
    ) -> Result<Tick> {
        self.signals.epoch_ended = false;

        let ctx = self.context();
        let skip_gradient = self.decision.on_run(&ctx, metrics, sample_losses)?;

        if self.exhausted[self.minibatch.partition] {
            self.on_last_minibatch();
        }

        Ok(Tick {
            skip_gradient,
            signals: self.signals,
        })
    }

    /// Builds the report a worker sends upstream for its current minibatch.
    ///
    /// Never touches the ledger.
    pub fn produce_work_for_master(&mut self) -> WorkerReport {
        let ctx = self.context();

        WorkerReport {
            minibatch: self.minibatch,
            metrics: self.decision.on_produce_report(&ctx),
        }
    }

    /// Adopts the minibatch and epoch state handed out by the master.
    pub fn apply_master_assignment(&mut self, assignment: &Assignment) {
        self.minibatch = assignment.minibatch;
        self.exhausted = assignment.exhausted;
        self.epoch_number = assignment.epoch_number;
        self.signals.complete = false;

        let ctx = self.context();
        self.decision.on_apply_assignment(&ctx);
    }

    /// Hands the current minibatch to `worker`.
    ///
    /// # Errors
    /// `DuplicateAssignment` if the worker still holds a minibatch.
    pub fn assign_work_to_worker(&mut self, worker: WorkerId) -> Result<Assignment> {
        let partition = self.minibatch.partition;
        self.ledger.assign(worker, partition)?;

        if let Some(i) = self.reissued.iter().position(|mb| *mb == self.minibatch) {
            self.reissued.swap_remove(i);
        }

        if self.exhausted.all() {
            self.has_data_for_worker = false;
        }

        debug!(
            worker = worker.0, partition = partition.name(), offset = self.minibatch.offset;
            "assigned minibatch"
        );

        Ok(Assignment {
            epoch_number: self.epoch_number,
            minibatch: self.minibatch,
            exhausted: self.exhausted,
        })
    }

    /// Accounts a worker's result on the master.
    ///
    /// # Arguments
    /// * `worker` - The reporting worker.
    /// * `report` - The worker's minibatch and metric deltas.
    /// * `sample_losses` - The loss of every sample in the reported minibatch.
    ///
    /// # Errors
    /// `UnknownWorker` if the worker holds no assignment, `PartitionMismatch` if it
    /// reports a partition other than the assigned one, `SizeMismatch` if its metrics
    /// don't fit the accumulated ones.
    pub fn apply_worker_result(
        &mut self,
        worker: WorkerId,
        report: &WorkerReport,
        sample_losses: &[f32],
    ) -> Result<Signals> {
        let assigned = self
            .ledger
            .assigned(worker)
            .ok_or(DecisionErr::UnknownWorker(worker))?;

        let reported = report.minibatch.partition;
        if reported != assigned {
            return Err(DecisionErr::PartitionMismatch {
                worker,
                assigned,
                reported,
            });
        }

        self.minibatch = report.minibatch;

        let ctx = self.context();
        self.decision
            .on_apply_worker_result(&ctx, &report.metrics, sample_losses)?;

        self.signals.epoch_ended = false;
        self.finalize_job(worker);

        // Closing the epoch resets the exhaustion flags, so this is decided first.
        let has_data_for_worker = self.exhausted.all()
            && self.ledger.is_idle()
            && self.reissued.is_empty()
            && !self.signals.complete;

        let pending = self.reissued.iter().any(|mb| mb.partition == reported);
        if !pending && self.ledger.drained(reported, &self.exhausted) {
            self.on_last_minibatch();
        }

        if has_data_for_worker {
            self.has_data_for_worker = true;
        }

        debug!(worker = worker.0, partition = reported.name(); "applied worker result");
        Ok(self.signals)
    }

    /// Forgets the job of a worker that went away without reporting.
    ///
    /// Its minibatch is not merged, the caller decides whether to `reissue` it.
    pub fn drop_worker(&mut self, worker: WorkerId) -> Option<Partition> {
        let partition = self.finalize_job(worker);

        if let Some(partition) = partition {
            debug!(worker = worker.0, partition = partition.name(); "dropped worker job");
        }

        partition
    }

    /// Keeps the partition of a dropped worker's `minibatch` open until the minibatch
    /// is assigned again.
    pub fn reissue(&mut self, minibatch: Minibatch) {
        debug!(
            partition = minibatch.partition.name(), offset = minibatch.offset;
            "reissuing minibatch"
        );
        self.reissued.push(minibatch);
    }

    /// Releases the ledger entry of `worker`, a no-op if it holds none.
    pub fn finalize_job(&mut self, worker: WorkerId) -> Option<Partition> {
        self.ledger.finalize(worker)
    }

    fn on_last_minibatch(&mut self) {
        let ctx = self.context();
        let partition = ctx.partition();

        self.decision.on_last_minibatch(&ctx);

        let validation_done = match self.class_lengths[Partition::Validation] {
            0 => partition >= Partition::Validation,
            _ => partition == Partition::Validation,
        };

        if validation_done && self.role == Role::Master {
            self.on_validation_processed(&ctx);
        }

        if partition == Partition::Train {
            self.decision.on_training_finished(&ctx);
        }

        self.print_statistics(&ctx);

        if self.role == Role::Master {
            self.decision.reset_statistics(partition);
        }

        // Whichever partition drains last closes the epoch.
        if self.exhausted.all() && self.ledger.is_idle() && self.reissued.is_empty() {
            self.end_epoch(&ctx);
        }
    }

    fn on_validation_processed(&mut self, ctx: &EpochContext) {
        self.signals.improved = false;
        self.signals.improved = self.decision.on_validation_processed(ctx);

        if self.signals.improved {
            let mut suffixes = Vec::new();
            self.decision.fill_snapshot_suffixes(ctx, &mut suffixes);
            self.snapshot_suffix = suffixes.join("_");

            info!(epoch = self.epoch_number; "improved, snapshot suffix {}", self.snapshot_suffix);
            self.events.publish(Event::Improved {
                epoch: self.epoch_number,
                suffix: self.snapshot_suffix.clone(),
            });
        }

        self.signals.complete = self.stop_condition(ctx);

        if self.signals.complete {
            info!(epoch = self.epoch_number; "training complete");
            self.events.publish(Event::Complete {
                epoch: self.epoch_number,
            });
        }
    }

    fn stop_condition(&self, ctx: &EpochContext) -> bool {
        self.decision.stop_condition(ctx)
            || self
                .max_epochs
                .is_some_and(|max_epochs| self.epoch_number >= max_epochs)
    }

    fn print_statistics(&mut self, ctx: &EpochContext) {
        let partition = ctx.partition();
        let mut stats = Vec::new();
        self.decision.fill_statistics(ctx, &mut stats);

        let now = Instant::now();
        let elapsed = now.duration_since(self.timestamps[partition]).as_secs_f64();
        self.timestamps[partition] = now;

        info!(
            "Epoch {} class {} {} in {elapsed:.2} sec",
            self.epoch_number,
            partition,
            stats.join(" ")
        );
    }

    fn end_epoch(&mut self, ctx: &EpochContext) {
        match self.role {
            Role::Master => {
                self.exhausted = Self::fresh_exhaustion(&self.class_lengths);
                self.decision.on_epoch_ended(ctx);
                self.signals.epoch_ended = true;
                self.events.publish(Event::EpochEnded {
                    epoch: self.epoch_number,
                });
                self.epoch_number += 1;
            }
            Role::Worker => self.signals.complete = true,
        }
    }
}
