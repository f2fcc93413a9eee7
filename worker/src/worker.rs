use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::{Assignment, DecisionSpec, PerPartition, WorkerReport},
};
use decision::{
    EpochCoordinator, Trainable,
    builder::DecisionBuilder,
    policy::{Decision, GradientDecision},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task,
};

use crate::{Result, WorkerErr};

/// Infrastructure worker runtime.
///
/// Asks the master for minibatches one at a time, evaluates them, takes the gradient
/// step unless its coordinator skips it and reports the accounted metrics back.
pub struct Worker<T: Trainable, D: Decision = GradientDecision> {
    coordinator: EpochCoordinator<D>,
    trainable: T,
    processed: usize,
}

impl<T: Trainable> Worker<T> {
    /// Builds a worker for the given decision specification.
    ///
    /// # Arguments
    /// * `spec` - The same decision specification the master runs.
    /// * `class_lengths` - The amount of samples in every partition.
    /// * `trainable` - The model to evaluate and train.
    pub fn from_spec(spec: &DecisionSpec, class_lengths: PerPartition<usize>, trainable: T) -> Self {
        let coordinator = DecisionBuilder::new().build_worker(spec, class_lengths);
        Self::new(coordinator, trainable)
    }
}

impl<T: Trainable, D: Decision> Worker<T, D> {
    /// Creates a new `Worker`.
    ///
    /// # Arguments
    /// * `coordinator` - A worker role coordinator.
    /// * `trainable` - The model to evaluate and train.
    pub fn new(coordinator: EpochCoordinator<D>, trainable: T) -> Self {
        Self {
            coordinator,
            trainable,
            processed: 0,
        }
    }

    pub fn trainable(&self) -> &T {
        &self.trainable
    }

    pub fn coordinator(&self) -> &EpochCoordinator<D> {
        &self.coordinator
    }

    /// Amount of minibatches this worker has reported.
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Runs the work loop against the master until it says stop.
    ///
    /// # Arguments
    /// * `rx` - Receiving end of the master channel.
    /// * `tx` - Sending end of the master channel.
    ///
    /// # Returns
    /// The amount of minibatches processed in this run.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures or protocol violations.
    pub async fn run<R, W>(&mut self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<usize>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut buf = Vec::new();
        let start = self.processed;

        loop {
            tx.send(&Msg::Control(Command::RequestWork)).await?;

            match rx.recv_into(&mut buf).await? {
                Msg::Control(Command::Assign(assignment)) => {
                    let (report, sample_losses) = self.process(&assignment)?;
                    let msg = Msg::Data(Payload::Report {
                        report,
                        sample_losses: &sample_losses,
                    });

                    tx.send(&msg).await?;
                }
                Msg::Control(Command::Stop) => break,
                other => {
                    let epoch = self.coordinator.epoch_number();
                    warn!(epoch = epoch; "unexpected message {}", other.kind());

                    return Err(WorkerErr::UnexpectedMessage {
                        epoch,
                        got: other.kind(),
                    });
                }
            }
        }

        let processed = self.processed - start;
        info!(processed = processed; "worker finished");
        tx.send(&Msg::Control(Command::Disconnect)).await?;
        tx.shutdown().await?;

        Ok(processed)
    }

    /// Evaluates the assigned minibatch, learns from it if due and builds the report.
    fn process(&mut self, assignment: &Assignment) -> Result<(WorkerReport, Vec<f32>)> {
        self.coordinator.apply_master_assignment(assignment);
        let minibatch = assignment.minibatch;

        debug!(
            epoch = assignment.epoch_number, partition = minibatch.partition.name(), offset = minibatch.offset;
            "processing minibatch"
        );

        let evaluation = task::block_in_place(|| self.trainable.evaluate(&minibatch));
        let tick = self
            .coordinator
            .run(&evaluation.metrics, &evaluation.sample_losses)?;

        if !tick.skip_gradient {
            task::block_in_place(|| self.trainable.learn(&minibatch));
        }

        self.processed += 1;
        Ok((self.coordinator.produce_work_for_master(), evaluation.sample_losses))
    }
}
