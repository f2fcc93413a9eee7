use std::collections::HashSet;

use comms::specs::RollbackSpec;
use log::{debug, info, warn};

use super::{BufferKind, History, SharedLearnable, count_nans};
use crate::WorkerId;

/// What a single rollback tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The consecutive tick counter has not reached its step count yet.
    Dwell,
    /// The very first evaluation was not an improvement and is ignored.
    FirstRun,
    /// Learning rates were increased and a checkpoint was taken.
    Increased,
    /// Learning rates were decreased and state restored from a checkpoint.
    RolledBack { forced: bool },
}

struct Component {
    learnable: SharedLearnable,
    lr_plus: Option<f32>,
    lr_minus: Option<f32>,
    history: History,
}

/// Adapts learning rates once per epoch and restores learnable state when training
/// stops improving or diverges.
pub struct RollbackController {
    spec: RollbackSpec,
    components: Vec<Component>,
    plus_ticks: usize,
    minus_ticks: usize,
    first_run: bool,
    outstanding: HashSet<WorkerId>,
}

impl RollbackController {
    /// Creates a new `RollbackController` with no registered components.
    ///
    /// Both tick counters start at their step count, so the first qualifying tick in
    /// either direction acts right away.
    pub fn new(spec: RollbackSpec) -> Self {
        info!(
            "rollback with lr_plus={:.2} lr_minus={:.2}",
            spec.lr_plus, spec.lr_minus
        );

        Self {
            plus_ticks: spec.plus_steps,
            minus_ticks: spec.minus_steps,
            first_run: true,
            components: Vec::new(),
            outstanding: HashSet::new(),
            spec,
        }
    }

    /// Registers a component.
    ///
    /// # Arguments
    /// * `learnable` - The component to manage.
    /// * `lr_plus` - Overrides the improvement factor for this component.
    /// * `lr_minus` - Overrides the decay factor for this component.
    pub fn add_component(
        &mut self,
        learnable: SharedLearnable,
        lr_plus: Option<f32>,
        lr_minus: Option<f32>,
    ) {
        self.components.push(Component {
            learnable,
            lr_plus,
            lr_minus,
            history: History::new(self.spec.history_limit),
        });
    }

    /// Drops every registered component along with its history.
    pub fn reset(&mut self) {
        self.components.clear();
    }

    pub fn components(&self) -> usize {
        self.components.len()
    }

    /// Records that `worker` was handed a job and must report before the next tick.
    pub fn begin_job(&mut self, worker: WorkerId) {
        self.outstanding.insert(worker);
    }

    /// Records that `worker` reported or disconnected.
    ///
    /// # Arguments
    /// * `worker` - The worker whose job ended.
    /// * `gate` - Whether the tick may run, an epoch must have just ended without
    ///            completing training.
    /// * `improved` - The coordinator's improved signal.
    ///
    /// # Returns
    /// The outcome of the tick if it ran, a worker without a job never runs it.
    pub fn end_job(
        &mut self,
        worker: WorkerId,
        gate: bool,
        improved: bool,
    ) -> Option<RollbackOutcome> {
        if !self.outstanding.remove(&worker) {
            return None;
        }

        if !self.outstanding.is_empty() {
            debug!(
                worker = worker.0, waiting = self.outstanding.len();
                "rollback waits for workers"
            );
            return None;
        }

        gate.then(|| self.run(improved))
    }

    /// Runs a single tick.
    ///
    /// # Arguments
    /// * `improved` - Whether the epoch that just ended improved on the best record.
    pub fn run(&mut self, improved: bool) -> RollbackOutcome {
        if improved {
            self.plus_ticks += 1;
            if self.plus_ticks < self.spec.plus_steps {
                return RollbackOutcome::Dwell;
            }

            self.increase();
            self.first_run = false;
            return RollbackOutcome::Increased;
        }

        if self.first_run {
            self.first_run = false;
            return RollbackOutcome::FirstRun;
        }

        let forced = self.scan_nans();
        if forced {
            self.minus_ticks = self.spec.minus_steps;
        }

        self.minus_ticks += 1;
        if self.minus_ticks < self.spec.minus_steps {
            return RollbackOutcome::Dwell;
        }

        self.roll_back();
        RollbackOutcome::RolledBack { forced }
    }

    fn scan_nans(&self) -> bool {
        for component in &self.components {
            let learnable = component.learnable.lock();
            let nans = count_nans(&*learnable);

            if nans > 0 {
                warn!(
                    nans = nans;
                    "NaNs encountered in {}, rolling back right away",
                    learnable.name()
                );
                return true;
            }
        }

        false
    }

    fn increase(&mut self) {
        self.plus_ticks = 0;
        self.minus_ticks = 0;

        for component in &mut self.components {
            let k = component.lr_plus.unwrap_or(self.spec.lr_plus);
            let mut learnable = component.learnable.lock();

            let lr = learnable.learning_rate() * k;
            learnable.set_learning_rate(lr);
            let lr_bias = learnable.learning_rate_bias() * k;
            learnable.set_learning_rate_bias(lr_bias);
            info!("increased lr of {} by {k:.2}, new lr {lr:.2e}", learnable.name());

            for kind in BufferKind::ALL {
                if let Some(buf) = learnable.buffer(kind) {
                    component.history.push(kind, buf);
                }
            }
        }
    }

    fn roll_back(&mut self) {
        self.plus_ticks = 0;
        self.minus_ticks = 0;

        let point = self.spec.rollback_point;

        for component in &mut self.components {
            let k = component.lr_minus.unwrap_or(self.spec.lr_minus);
            let mut learnable = component.learnable.lock();

            let lr = learnable.learning_rate() * k;
            learnable.set_learning_rate(lr);
            let lr_bias = learnable.learning_rate_bias() * k;
            learnable.set_learning_rate_bias(lr_bias);
            info!("decreased lr of {} by {k:.2}, new lr {lr:.2e}", learnable.name());

            for kind in BufferKind::ALL {
                let Some(buf) = learnable.buffer_mut(kind) else {
                    continue;
                };

                match component.history.restore(kind, point) {
                    Some(snapshot) if snapshot.len() == buf.len() => {
                        info!("rolling back to stored {}", kind.name());
                        buf.copy_from_slice(snapshot);
                    }
                    Some(snapshot) => warn!(
                        got = snapshot.len(), expected = buf.len();
                        "stored {} has a different shape, not restored",
                        kind.name()
                    ),
                    None => warn!("no rollback for {}", kind.name()),
                }
            }
        }
    }
}
