use std::num::NonZeroUsize;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::{
        DecisionSpec, LossSummary, MasterSpec, Minibatch, MinibatchMetrics, Partition,
        PerPartition, RollbackSpec, WorkerReport,
    },
};
use decision::{DecisionErr, Evaluation, Trainable, WorkerId};
use master::{MasterErr, MasterService};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    sync::oneshot,
};
use worker::Worker;

type Channel = (
    OnoReceiver<ReadHalf<DuplexStream>>,
    OnoSender<WriteHalf<DuplexStream>>,
);

/// Every sample costs the same.
#[derive(Default)]
struct Flat {
    steps: usize,
}

impl Trainable for Flat {
    fn evaluate(&mut self, minibatch: &Minibatch) -> Evaluation {
        let size = minibatch.size;

        Evaluation {
            metrics: MinibatchMetrics {
                n_err: Some(1),
                loss: Some(LossSummary {
                    sum: 0.5 * size as f64,
                    max: 0.5,
                    min: 0.5,
                }),
                ..Default::default()
            },
            sample_losses: vec![0.5; size],
        }
    }

    fn learn(&mut self, _minibatch: &Minibatch) {
        self.steps += 1;
    }
}

fn channel_pair() -> (Channel, Channel) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    let chan1 = comms::channel(rx1, tx1);
    let chan2 = comms::channel(rx2, tx2);
    (chan1, chan2)
}

fn spec(max_epochs: usize) -> MasterSpec {
    let _ = env_logger::builder().is_test(true).try_init();

    MasterSpec {
        class_lengths: PerPartition::new(4, 4, 8),
        minibatch_size: NonZeroUsize::new(2).unwrap(),
        decision: DecisionSpec {
            max_epochs: Some(max_epochs),
            ..Default::default()
        },
        rollback: RollbackSpec::default(),
    }
}

fn worker(spec: &MasterSpec) -> Worker<Flat> {
    Worker::from_spec(&spec.decision, spec.class_lengths, Flat::default())
}

/// Connects a new worker to `service`, returning the worker's side of the channel.
fn connect<D, L>(service: &mut MasterService<D, L>) -> Channel
where
    D: decision::policy::Decision,
    L: decision::MinibatchSource,
{
    let ((ms_rx, ms_tx), worker_side) = channel_pair();
    service.spawn(ms_rx, ms_tx);
    worker_side
}

#[tokio::test(flavor = "multi_thread")]
async fn workers_train_until_the_epoch_budget() -> io::Result<()> {
    let spec = spec(2);
    let mut service = MasterService::from_spec(&spec, &[]);

    let (rx1, tx1) = connect(&mut service);
    let (rx2, tx2) = connect(&mut service);
    let (mut worker1, mut worker2) = (worker(&spec), worker(&spec));

    let service_fut = async { Ok::<_, io::Error>(service.run().await?) };
    let worker1_fut = async { Ok::<_, io::Error>(worker1.run(rx1, tx1).await?) };
    let worker2_fut = async { Ok::<_, io::Error>(worker2.run(rx2, tx2).await?) };

    let (summary, processed1, processed2) =
        tokio::try_join!(service_fut, worker1_fut, worker2_fut)?;

    // The budget is hit validating the third epoch, which still closes if its train
    // minibatches were already accounted by then.
    assert!(summary.complete);
    assert!((2..=3).contains(&summary.epochs));
    assert_eq!(summary.snapshot_suffix, "0.500000_50.00pt");

    // Two full epochs of 8 minibatches, then the third one's eval and validation.
    assert!(processed1 + processed2 >= 20);

    let best = summary.best.unwrap();
    assert_eq!(best.loss.min_validation, 0.5);
    assert_eq!(best.loss.min_validation_epoch, Some(0));

    let decision = service.coordinator().decision();
    let validation = decision.epoch_metrics(Partition::Validation).unwrap();
    assert_eq!(validation.n_err, Some(2));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_worker_minibatch_is_served_again() -> io::Result<()> {
    let spec = spec(1);
    let mut service = MasterService::from_spec(&spec, &[]);

    let (mut dropper_rx, mut dropper_tx) = connect(&mut service);
    let (rx, tx) = connect(&mut service);
    let mut worker = worker(&spec);
    let (dropped_tx, dropped_rx) = oneshot::channel();

    let service_fut = async { Ok::<_, io::Error>(service.run().await?) };
    let dropper_fut = async move {
        let mut buf = Vec::new();
        dropper_tx.send(&Msg::Control(Command::RequestWork)).await?;

        let msg: Msg = dropper_rx.recv_into(&mut buf).await?;
        assert!(matches!(msg, Msg::Control(Command::Assign(_))), "got {msg:?}");

        drop((dropper_rx, dropper_tx));
        let _ = dropped_tx.send(());
        Ok::<_, io::Error>(())
    };
    let worker_fut = async {
        let _ = dropped_rx.await;
        Ok::<_, io::Error>(worker.run(rx, tx).await?)
    };

    let (summary, (), processed) = tokio::try_join!(service_fut, dropper_fut, worker_fut)?;

    assert!(summary.complete);
    assert_eq!(summary.epochs, 1);

    // The whole first epoch including the dropped minibatch, then eval and validation.
    assert_eq!(processed, 12);
    assert_eq!(worker.trainable().steps, 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_report_stops_the_service() -> io::Result<()> {
    let spec = spec(1);
    let mut service = MasterService::from_spec(&spec, &[]);
    let (mut rx, mut tx) = connect(&mut service);

    let worker_fut = async move {
        let mut buf = Vec::new();
        tx.send(&Msg::Control(Command::RequestWork)).await?;

        let msg: Msg = rx.recv_into(&mut buf).await?;
        let Msg::Control(Command::Assign(assignment)) = msg else {
            panic!("unexpected message {msg:?}");
        };
        assert_eq!(assignment.minibatch.partition, Partition::Eval);

        let report = WorkerReport {
            minibatch: Minibatch {
                partition: Partition::Train,
                ..assignment.minibatch
            },
            metrics: MinibatchMetrics::default(),
        };
        let msg = Msg::Data(Payload::Report {
            report,
            sample_losses: &[],
        });
        tx.send(&msg).await?;

        Ok::<_, io::Error>((rx, tx))
    };

    let (res, channel) = tokio::join!(service.run(), worker_fut);
    channel?;

    let Err(MasterErr::Decision(err)) = res else {
        panic!("expected a decision error, got {res:?}");
    };
    assert_eq!(
        err,
        DecisionErr::PartitionMismatch {
            worker: WorkerId(0),
            assigned: Partition::Eval,
            reported: Partition::Train,
        }
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_joins_mid_epoch() -> io::Result<()> {
    let spec = spec(1);
    let mut service = MasterService::from_spec(&spec, &[]);
    let handle = service.handle();

    let (mut first_rx, mut first_tx) = connect(&mut service);
    let ((joined_ms_rx, joined_ms_tx), (rx, tx)) = channel_pair();
    let mut worker = worker(&spec);
    let (joined_tx, joined_rx) = oneshot::channel();

    let service_fut = async { Ok::<_, io::Error>(service.run().await?) };
    let first_fut = async move {
        let mut buf = Vec::new();
        first_tx.send(&Msg::Control(Command::RequestWork)).await?;

        let msg: Msg = first_rx.recv_into(&mut buf).await?;
        let Msg::Control(Command::Assign(assignment)) = msg else {
            panic!("unexpected message {msg:?}");
        };
        assert_eq!(assignment.minibatch.partition, Partition::Eval);

        let joined = handle.spawn(joined_ms_rx, joined_ms_tx).await?;
        assert_eq!(joined, WorkerId(1));

        let report = WorkerReport {
            minibatch: assignment.minibatch,
            metrics: MinibatchMetrics::default(),
        };
        let msg = Msg::Data(Payload::Report {
            report,
            sample_losses: &[],
        });
        first_tx.send(&msg).await?;
        first_tx.send(&Msg::Control(Command::Disconnect)).await?;

        let _ = joined_tx.send(());
        Ok::<_, io::Error>(())
    };
    let worker_fut = async {
        let _ = joined_rx.await;
        Ok::<_, io::Error>(worker.run(rx, tx).await?)
    };

    let (summary, (), processed) = tokio::try_join!(service_fut, first_fut, worker_fut)?;

    assert!(summary.complete);
    assert_eq!(summary.epochs, 1);

    // Everything but the first eval minibatch of the first epoch.
    assert_eq!(processed, 11);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_session_stops_workers_right_away() -> io::Result<()> {
    let spec = MasterSpec {
        class_lengths: PerPartition::new(0, 0, 0),
        ..spec(1)
    };
    let mut service = MasterService::from_spec(&spec, &[]);
    let (rx, tx) = connect(&mut service);
    let mut worker = worker(&spec);

    let service_fut = async { Ok::<_, io::Error>(service.run().await?) };
    let worker_fut = async { Ok::<_, io::Error>(worker.run(rx, tx).await?) };

    let (summary, processed) = tokio::try_join!(service_fut, worker_fut)?;

    assert!(summary.complete);
    assert_eq!(summary.epochs, 0);
    assert_eq!(processed, 0);
    Ok(())
}
