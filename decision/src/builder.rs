//! Turns specs into live components.

use comms::specs::{DecisionSpec, MasterSpec, PerPartition, RollbackSpec};

use crate::{
    EpochCoordinator, Role, SequentialLoader, Standalone, Trainable,
    policy::GradientDecision,
    rollback::{RollbackController, SharedLearnable},
};

/// The components a master runs a training session with.
pub struct MasterParts {
    pub coordinator: EpochCoordinator<GradientDecision>,
    pub rollback: RollbackController,
    pub loader: SequentialLoader,
}

/// Builds coordinators, rollback controllers and loaders given a specification.
#[derive(Debug, Default)]
pub struct DecisionBuilder;

impl DecisionBuilder {
    /// Creates a new `DecisionBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds the decision policy.
    ///
    /// # Arguments
    /// * `spec` - The decision policy specification.
    /// * `class_lengths` - The amount of samples in every partition.
    /// * `components` - The learnable components whose learning rate the dynamic alpha
    ///                  adapts.
    pub fn build_decision(
        &self,
        spec: &DecisionSpec,
        class_lengths: PerPartition<usize>,
        components: &[SharedLearnable],
    ) -> GradientDecision {
        let mut decision = GradientDecision::new(spec.clone(), class_lengths);

        if spec.use_dynamic_alpha {
            components
                .iter()
                .for_each(|component| decision.add_component(component.clone()));
        }

        decision
    }

    /// Builds a rollback controller managing every one of `components` with the
    /// default factors.
    pub fn build_rollback(
        &self,
        spec: &RollbackSpec,
        components: &[SharedLearnable],
    ) -> RollbackController {
        let mut rollback = RollbackController::new(spec.clone());

        for component in components {
            rollback.add_component(component.clone(), None, None);
        }

        rollback
    }

    /// Builds everything a master needs.
    pub fn build_master(
        &self,
        spec: &MasterSpec,
        components: &[SharedLearnable],
    ) -> MasterParts {
        let decision = self.build_decision(&spec.decision, spec.class_lengths, components);

        MasterParts {
            coordinator: EpochCoordinator::new(
                Role::Master,
                decision,
                spec.class_lengths,
                spec.decision.max_epochs,
            ),
            rollback: self.build_rollback(&spec.rollback, components),
            loader: SequentialLoader::new(spec.class_lengths, spec.minibatch_size),
        }
    }

    /// Builds the coordinator a worker accounts its minibatches with.
    pub fn build_worker(
        &self,
        spec: &DecisionSpec,
        class_lengths: PerPartition<usize>,
    ) -> EpochCoordinator<GradientDecision> {
        let decision = self.build_decision(spec, class_lengths, &[]);
        EpochCoordinator::new(Role::Worker, decision, class_lengths, spec.max_epochs)
    }

    /// Builds a standalone run over `trainable`.
    pub fn build_standalone<T: Trainable>(
        &self,
        spec: &MasterSpec,
        components: &[SharedLearnable],
        trainable: T,
    ) -> Standalone<GradientDecision, SequentialLoader, T> {
        let MasterParts {
            coordinator,
            rollback,
            loader,
        } = self.build_master(spec, components);

        Standalone::new(coordinator, rollback, loader, trainable)
    }
}
