use std::num::NonZeroUsize;

use comms::specs::{
    DecisionSpec, LossSummary, MasterSpec, Minibatch, MinibatchMetrics, Partition, PerPartition,
    RollbackSpec, WorkerReport,
};
use decision::{
    Evaluation, Event, MinibatchSource, Role, Trainable, WorkerId,
    builder::{DecisionBuilder, MasterParts},
    rollback::{BufferKind, ParamBlock, SharedLearnable, count_nans, shared},
};

const LENGTHS: PerPartition<usize> = PerPartition::new(10, 10, 100);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn spec(decision: DecisionSpec, rollback: RollbackSpec) -> MasterSpec {
    MasterSpec {
        class_lengths: LENGTHS,
        minibatch_size: NonZeroUsize::new(10).unwrap(),
        decision,
        rollback,
    }
}

/// Reports a scripted validation result per epoch and moves the weights on every
/// gradient step.
struct Scripted {
    params: SharedLearnable,
    validation_loss: Vec<f64>,
    validation_errors: Vec<u64>,
    nan_at_epoch: Option<usize>,
    epoch: usize,
}

impl Scripted {
    fn new(
        params: SharedLearnable,
        validation_loss: Vec<f64>,
        validation_errors: Vec<u64>,
    ) -> Self {
        Self {
            params,
            validation_loss,
            validation_errors,
            nan_at_epoch: None,
            epoch: 0,
        }
    }

    fn pick<T: Copy>(values: &[T], epoch: usize) -> Option<T> {
        values.get(epoch).or(values.last()).copied()
    }
}

impl Trainable for Scripted {
    fn evaluate(&mut self, minibatch: &Minibatch) -> Evaluation {
        let (loss, n_err) = match minibatch.partition {
            Partition::Validation => (
                Self::pick(&self.validation_loss, self.epoch).unwrap_or(1.),
                Self::pick(&self.validation_errors, self.epoch),
            ),
            _ => (0.25, None),
        };
        let size = minibatch.size;

        Evaluation {
            metrics: MinibatchMetrics {
                n_err,
                loss: Some(LossSummary {
                    sum: loss * size as f64,
                    max: loss,
                    min: loss,
                }),
                ..Default::default()
            },
            sample_losses: vec![loss as f32; size],
        }
    }

    fn learn(&mut self, minibatch: &Minibatch) {
        let mut params = self.params.lock();

        if let Some(weights) = params.buffer_mut(BufferKind::Weights) {
            weights[0] += 1.;
        }

        if self.nan_at_epoch == Some(self.epoch) {
            if let Some(grad) = params.buffer_mut(BufferKind::GradientWeights) {
                grad[0] = f32::NAN;
            }
        }

        if minibatch.last {
            self.epoch += 1;
        }
    }
}

fn params() -> SharedLearnable {
    shared(ParamBlock::new("fc", 0.1, vec![1., 1.], vec![0.]))
}

#[test]
fn regression_rolls_back_to_the_improved_epoch() {
    init_logs();

    let params = params();
    let spec = spec(
        DecisionSpec {
            fail_iterations: 2,
            max_epochs: Some(2),
            ..Default::default()
        },
        RollbackSpec {
            minus_steps: 1,
            ..Default::default()
        },
    );

    let trainable = Scripted::new(params.clone(), vec![0.5, 0.6], Vec::new());
    let mut standalone =
        DecisionBuilder::new().build_standalone(&spec, &[params.clone()], trainable);

    let summary = standalone.run().unwrap();

    assert!(summary.complete);
    assert_eq!(summary.epochs, 2);
    assert_eq!(summary.snapshot_suffix, "0.500000");

    let best = summary.best.unwrap();
    assert_eq!(best.loss.min_validation, 0.5);
    assert_eq!(best.loss.min_validation_epoch, Some(0));

    // Ten train steps per epoch, the first epoch's weights were checkpointed.
    let params = params.lock();
    assert_eq!(params.buffer(BufferKind::Weights), Some(&[11., 1.][..]));
    assert!((params.learning_rate() - 0.1 * 1.1 * 0.5).abs() < 1e-6);
}

#[test]
fn nan_gradient_forces_rollback_during_dwell() {
    init_logs();

    let params = params();
    let spec = spec(
        DecisionSpec {
            max_epochs: Some(2),
            ..Default::default()
        },
        RollbackSpec::default(),
    );

    let mut trainable = Scripted::new(params.clone(), vec![0.5, 0.6], Vec::new());
    trainable.nan_at_epoch = Some(1);

    let mut standalone =
        DecisionBuilder::new().build_standalone(&spec, &[params.clone()], trainable);
    standalone.run().unwrap();

    let params = params.lock();
    assert_eq!(count_nans(&*params), 0);
    assert!((params.learning_rate() - 0.1 * 1.1 * 0.5).abs() < 1e-6);
}

#[test]
fn stalled_tracks_stop_after_patience() {
    init_logs();

    let spec = spec(
        DecisionSpec {
            fail_iterations: 2,
            ..Default::default()
        },
        RollbackSpec::default(),
    );

    let trainable = Scripted::new(params(), vec![0.5, 0.6], vec![2, 3]);
    let mut standalone = DecisionBuilder::new().build_standalone(&spec, &[], trainable);

    let summary = standalone.run().unwrap();

    assert!(summary.complete);
    assert_eq!(summary.epochs, 3);
}

#[test]
fn one_improving_track_keeps_training() {
    init_logs();

    let spec = spec(
        DecisionSpec {
            fail_iterations: 2,
            max_epochs: Some(6),
            ..Default::default()
        },
        RollbackSpec::default(),
    );

    let trainable = Scripted::new(params(), vec![0.5, 0.6], vec![9, 8, 7, 6, 5, 4, 3]);
    let mut standalone = DecisionBuilder::new().build_standalone(&spec, &[], trainable);

    let summary = standalone.run().unwrap();
    let best = summary.best.unwrap();

    assert_eq!(summary.epochs, 6);
    assert_eq!(best.loss.min_validation_epoch, Some(0));
    assert_eq!(best.errors.min_validation_epoch, Some(6));
    assert_eq!(best.errors.min_validation, 3.);
}

#[test]
fn distributed_epoch_matches_standalone_metrics() {
    init_logs();

    let spec = spec(
        DecisionSpec {
            store_samples_loss: true,
            ..Default::default()
        },
        RollbackSpec::default(),
    );
    let builder = DecisionBuilder::new();
    let MasterParts {
        mut coordinator,
        mut loader,
        ..
    } = builder.build_master(&spec, &[]);
    let mut events = coordinator.subscribe();

    let ids = [WorkerId(1), WorkerId(2), WorkerId(3)];
    let mut workers: Vec<_> = ids
        .iter()
        .map(|_| builder.build_worker(&spec.decision, spec.class_lengths))
        .collect();
    let mut trainables: Vec<_> = ids
        .iter()
        .map(|_| Scripted::new(params(), vec![0.5], vec![1]))
        .collect();

    let mut closed = false;
    while !closed {
        // Hand a minibatch to every worker before collecting, results arrive in reverse.
        let mut in_flight = Vec::new();
        for (i, &id) in ids.iter().enumerate() {
            let Some(minibatch) = loader.next_minibatch() else {
                break;
            };

            coordinator.observe(minibatch);
            let assignment = coordinator.assign_work_to_worker(id).unwrap();
            workers[i].apply_master_assignment(&assignment);
            in_flight.push(i);
        }

        for i in in_flight.into_iter().rev() {
            let minibatch = workers[i].minibatch();
            let evaluation = trainables[i].evaluate(&minibatch);
            let tick = workers[i]
                .run(&evaluation.metrics, &evaluation.sample_losses)
                .unwrap();
            assert_eq!(workers[i].role(), Role::Worker);
            assert_eq!(tick.skip_gradient, minibatch.partition != Partition::Train);

            let report = workers[i].produce_work_for_master();
            let signals = coordinator
                .apply_worker_result(ids[i], &report, &evaluation.sample_losses)
                .unwrap();
            closed |= signals.epoch_ended;
        }
    }

    assert_eq!(coordinator.epoch_number(), 1);
    assert!(loader.next_minibatch().is_none());
    assert!(coordinator.has_data_for_worker());

    let decision = coordinator.decision();
    let validation = decision.epoch_metrics(Partition::Validation).unwrap();
    assert_eq!(validation.loss.unwrap().avg, 0.5);
    assert_eq!(validation.n_err, Some(1));

    let train = decision.epoch_metrics(Partition::Train).unwrap();
    assert_eq!(train.loss.unwrap().avg, 0.25);
    assert!(decision.epoch_samples_loss(Partition::Train).iter().all(|&l| l == 0.25));

    assert_eq!(
        events.try_recv().unwrap(),
        Event::Improved {
            epoch: 0,
            suffix: "0.500000_10.00pt".into()
        }
    );
    assert_eq!(events.try_recv().unwrap(), Event::EpochEnded { epoch: 0 });
}

#[test]
fn dropped_train_job_is_served_again() {
    init_logs();

    let spec = spec(DecisionSpec::default(), RollbackSpec::default());
    let MasterParts {
        mut coordinator,
        mut loader,
        ..
    } = DecisionBuilder::new().build_master(&spec, &[]);
    let (a, b) = (WorkerId(1), WorkerId(2));
    let mut trainable = Scripted::new(params(), vec![0.5], Vec::new());

    let mut evaluate = |minibatch: Minibatch| {
        let evaluation = trainable.evaluate(&minibatch);
        (
            WorkerReport {
                minibatch,
                metrics: evaluation.metrics,
            },
            evaluation.sample_losses,
        )
    };

    while let Some(minibatch) = loader.next_minibatch() {
        coordinator.observe(minibatch);
        coordinator.assign_work_to_worker(a).unwrap();

        if minibatch.partition == Partition::Train && minibatch.last {
            let before = coordinator.ledger().outstanding(Partition::Train) - 1;
            assert_eq!(coordinator.drop_worker(a), Some(Partition::Train));
            assert_eq!(coordinator.ledger().outstanding(Partition::Train), before);
            coordinator.reissue(minibatch);
            loader.requeue(minibatch);
            break;
        }

        let (report, losses) = evaluate(minibatch);
        coordinator.apply_worker_result(a, &report, &losses).unwrap();
    }

    assert_eq!(coordinator.epoch_number(), 0);

    let minibatch = loader.next_minibatch().unwrap();
    coordinator.observe(minibatch);
    coordinator.assign_work_to_worker(b).unwrap();

    let (report, losses) = evaluate(minibatch);
    let signals = coordinator.apply_worker_result(b, &report, &losses).unwrap();

    assert!(signals.epoch_ended);
    assert_eq!(coordinator.epoch_number(), 1);
}

#[test]
fn eval_only_session_completes_right_away() {
    init_logs();

    let spec = MasterSpec {
        class_lengths: PerPartition::new(10, 0, 0),
        ..spec(DecisionSpec::default(), RollbackSpec::default())
    };
    let trainable = Scripted::new(params(), vec![0.5], Vec::new());
    let mut standalone = DecisionBuilder::new().build_standalone(&spec, &[], trainable);

    let summary = standalone.run().unwrap();

    assert!(summary.complete);
    assert_eq!(summary.epochs, 0);
    assert!(summary.snapshot_suffix.is_empty());
    assert_eq!(standalone.trainable().epoch, 0);
}
