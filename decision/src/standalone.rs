use log::info;

use crate::{
    EpochCoordinator, MinibatchSource, Result, Summary, Trainable,
    policy::Decision,
    rollback::{RollbackController, RollbackOutcome},
};

/// Trains with a single implicit worker colocated with the coordinator.
pub struct Standalone<D, L, T>
where
    D: Decision,
    L: MinibatchSource,
    T: Trainable,
{
    coordinator: EpochCoordinator<D>,
    rollback: RollbackController,
    loader: L,
    trainable: T,
}

impl<D, L, T> Standalone<D, L, T>
where
    D: Decision,
    L: MinibatchSource,
    T: Trainable,
{
    pub fn new(
        coordinator: EpochCoordinator<D>,
        rollback: RollbackController,
        loader: L,
        trainable: T,
    ) -> Self {
        Self {
            coordinator,
            rollback,
            loader,
            trainable,
        }
    }

    pub fn coordinator(&self) -> &EpochCoordinator<D> {
        &self.coordinator
    }

    pub fn trainable(&self) -> &T {
        &self.trainable
    }

    /// Trains until the coordinator completes.
    ///
    /// Every served minibatch is evaluated and accounted, the gradient step runs
    /// unless the decision skips it and the rollback ticks whenever an epoch closes.
    ///
    /// # Errors
    /// Whatever the coordinator rejects while accounting a minibatch.
    pub fn run(&mut self) -> Result<Summary> {
        while !self.coordinator.is_complete() {
            let Some(minibatch) = self.loader.next_minibatch() else {
                info!("nothing left to serve");
                break;
            };

            self.coordinator.observe(minibatch);
            let evaluation = self.trainable.evaluate(&minibatch);
            let tick = self
                .coordinator
                .run(&evaluation.metrics, &evaluation.sample_losses)?;

            if !tick.skip_gradient {
                self.trainable.learn(&minibatch);
            }

            if tick.signals.epoch_ended {
                if !tick.signals.complete {
                    let outcome = self.rollback.run(tick.signals.improved);
                    if let RollbackOutcome::RolledBack { forced } = outcome {
                        info!(
                            forced = forced;
                            "rolled back after epoch {}",
                            self.coordinator.epoch_number()
                        );
                    }
                }

                self.loader.rewind();
            }
        }

        Ok(self.coordinator.summary())
    }
}
