use std::{
    collections::{HashMap, VecDeque},
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::{Assignment, MasterSpec, Minibatch, WorkerReport},
};
use decision::{
    EpochCoordinator, MinibatchSource, SequentialLoader, Summary, WorkerId,
    builder::{DecisionBuilder, MasterParts},
    policy::{Decision, GradientDecision},
    rollback::{RollbackController, RollbackOutcome, SharedLearnable},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
    task::JoinSet,
};

use crate::{MasterErr, Result};

const INBOUND_CAPACITY: usize = 64;

/// A worker connection task that has yet to be started.
type Connection = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// What handles and connection tasks forward to the service loop.
enum Inbound {
    Joined {
        worker: WorkerId,
        connection: Connection,
    },
    Request {
        worker: WorkerId,
        reply: oneshot::Sender<Reply>,
    },
    Report {
        worker: WorkerId,
        report: WorkerReport,
        sample_losses: Vec<f32>,
    },
    Left {
        worker: WorkerId,
    },
}

/// The answer to a parked work request.
enum Reply {
    Assign(Assignment),
    Stop,
}

/// Serves minibatches to a pool of workers and accounts their results.
///
/// Every connection runs in its own task, but all of them funnel their messages into
/// a single loop that owns the coordinator, the rollback controller and the loader,
/// so accounting happens one message at a time.
pub struct MasterService<D: Decision, L: MinibatchSource> {
    coordinator: EpochCoordinator<D>,
    rollback: RollbackController,
    loader: L,
    tasks: JoinSet<Result<()>>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    next_id: Arc<AtomicU64>,
    connected: usize,
    parked: VecDeque<(WorkerId, oneshot::Sender<Reply>)>,
    in_flight: HashMap<WorkerId, Minibatch>,
}

impl MasterService<GradientDecision, SequentialLoader> {
    /// Builds a service for the given specification.
    ///
    /// # Arguments
    /// * `spec` - The session specification.
    /// * `components` - The learnable components to roll back and adapt.
    pub fn from_spec(spec: &MasterSpec, components: &[SharedLearnable]) -> Self {
        let MasterParts {
            coordinator,
            rollback,
            loader,
        } = DecisionBuilder::new().build_master(spec, components);

        Self::new(coordinator, rollback, loader)
    }
}

impl<D: Decision, L: MinibatchSource> MasterService<D, L> {
    /// Creates a new `MasterService`.
    ///
    /// # Arguments
    /// * `coordinator` - A master role coordinator.
    /// * `rollback` - The controller to tick at every epoch close.
    /// * `loader` - The source of the minibatches to serve.
    pub fn new(coordinator: EpochCoordinator<D>, rollback: RollbackController, loader: L) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        Self {
            coordinator,
            rollback,
            loader,
            tasks: JoinSet::new(),
            inbound_tx,
            inbound_rx,
            next_id: Arc::new(AtomicU64::new(0)),
            connected: 0,
            parked: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn coordinator(&self) -> &EpochCoordinator<D> {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut EpochCoordinator<D> {
        &mut self.coordinator
    }

    /// Creates a handle workers can join through while the service runs.
    pub fn handle(&self) -> MasterHandle {
        MasterHandle {
            inbound: self.inbound_tx.clone(),
            next_id: self.next_id.clone(),
        }
    }

    /// Binds a new worker to this service and spawns its connection task.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    ///
    /// # Returns
    /// The id the worker is accounted under.
    pub fn spawn<R, W>(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>) -> WorkerId
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let worker = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Box::pin(serve_connection(worker, rx, tx, self.inbound_tx.clone()));

        self.accept(worker, connection);
        worker
    }

    fn accept(&mut self, worker: WorkerId, connection: Connection) {
        self.connected += 1;
        self.tasks.spawn(connection);
        debug!(worker = worker.0, connected = self.connected; "worker connected");
    }

    /// Serves workers until training completes and every one of them left.
    ///
    /// Workers may join through a `MasterHandle` at any time, a session started
    /// before any worker arrived waits for them.
    ///
    /// # Returns
    /// What the session achieved.
    ///
    /// # Errors
    /// A `Decision` error if a worker breaks the protocol the coordinator enforces.
    pub async fn run(&mut self) -> Result<Summary> {
        while !(self.coordinator.is_complete() && self.connected == 0) {
            let Some(inbound) = self.inbound_rx.recv().await else {
                break;
            };

            match inbound {
                Inbound::Joined { worker, connection } => self.accept(worker, connection),
                Inbound::Request { worker, reply } => {
                    debug!(worker = worker.0; "work requested");
                    self.parked.push_back((worker, reply));
                }
                Inbound::Report {
                    worker,
                    report,
                    sample_losses,
                } => self.apply_report(worker, &report, &sample_losses)?,
                Inbound::Left { worker } => self.drop_worker(worker),
            }

            self.dispatch()?;
        }

        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(Err(e)) => warn!("worker connection failed: {e}"),
                Err(e) => warn!("worker connection task failed: {e}"),
                Ok(Ok(())) => {}
            }
        }

        let summary = self.coordinator.summary();
        info!(
            epochs = summary.epochs, complete = summary.complete;
            "every worker left"
        );

        Ok(summary)
    }

    fn apply_report(
        &mut self,
        worker: WorkerId,
        report: &WorkerReport,
        sample_losses: &[f32],
    ) -> Result<()> {
        self.in_flight.remove(&worker);

        let signals = self
            .coordinator
            .apply_worker_result(worker, report, sample_losses)?;

        self.end_rollback_job(worker, signals.epoch_ended && !signals.complete, signals.improved);

        if signals.epoch_ended && self.coordinator.has_data_for_worker() {
            self.loader.rewind();
        }

        Ok(())
    }

    /// Forgets a worker that left, its minibatch is served again if it held one.
    fn drop_worker(&mut self, worker: WorkerId) {
        self.connected = self.connected.saturating_sub(1);
        self.parked.retain(|(id, _)| *id != worker);

        if let Some(minibatch) = self.in_flight.remove(&worker) {
            self.coordinator.drop_worker(worker);
            self.coordinator.reissue(minibatch);
            self.loader.requeue(minibatch);
        }

        // The departed worker counts as having reported.
        self.end_rollback_job(worker, false, self.coordinator.improved());
        debug!(worker = worker.0, left = self.connected; "worker left");
    }

    fn end_rollback_job(&mut self, worker: WorkerId, gate: bool, improved: bool) {
        match self.rollback.end_job(worker, gate, improved) {
            Some(RollbackOutcome::RolledBack { forced }) => info!(
                forced = forced;
                "rolled back after epoch {}",
                self.coordinator.epoch_number()
            ),
            Some(outcome) => debug!("rollback tick: {outcome:?}"),
            None => {}
        }
    }

    /// Answers parked requests while there is something to answer with.
    fn dispatch(&mut self) -> Result<()> {
        while let Some((worker, reply)) = self.parked.pop_front() {
            if self.coordinator.is_complete() {
                debug!(worker = worker.0; "stopping worker");
                let _ = reply.send(Reply::Stop);
                continue;
            }

            let Some(minibatch) = self.loader.next_minibatch() else {
                self.parked.push_front((worker, reply));
                break;
            };

            self.coordinator.observe(minibatch);
            let assignment = self.coordinator.assign_work_to_worker(worker)?;
            self.rollback.begin_job(worker);
            self.in_flight.insert(worker, minibatch);

            // A closed reply means the connection is gone, its `Left` requeues the work.
            let _ = reply.send(Reply::Assign(assignment));
        }

        Ok(())
    }
}

/// Lets workers join a running `MasterService`.
#[derive(Clone)]
pub struct MasterHandle {
    inbound: mpsc::Sender<Inbound>,
    next_id: Arc<AtomicU64>,
}

impl MasterHandle {
    /// Binds a new worker to the service, its connection task starts once the
    /// service loop accounts the join.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    ///
    /// # Returns
    /// The id the worker is accounted under.
    ///
    /// # Errors
    /// A `NotConnected` io error if the service is gone.
    pub async fn spawn<R, W>(&self, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Result<WorkerId>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let worker = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Box::pin(serve_connection(worker, rx, tx, self.inbound.clone()));

        self.inbound
            .send(Inbound::Joined { worker, connection })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "master service is gone"))?;

        Ok(worker)
    }
}

/// Relays one worker's messages to the service loop and always reports it left.
async fn serve_connection<R, W>(
    worker: WorkerId,
    mut rx: OnoReceiver<R>,
    mut tx: OnoSender<W>,
    inbound: mpsc::Sender<Inbound>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let res = relay(worker, &mut rx, &mut tx, &inbound).await;
    let _ = inbound.send(Inbound::Left { worker }).await;

    if let Err(e) = &res {
        warn!(worker = worker.0; "dropping worker: {e}");
    }

    res
}

async fn relay<R, W>(
    worker: WorkerId,
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    inbound: &mpsc::Sender<Inbound>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        let msg: Msg = rx.recv_into(&mut buf).await?;

        match msg {
            Msg::Control(Command::RequestWork) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let request = Inbound::Request {
                    worker,
                    reply: reply_tx,
                };

                // The service is gone once either side of the exchange closes.
                if inbound.send(request).await.is_err() {
                    return Ok(());
                }
                let Ok(reply) = reply_rx.await else {
                    return Ok(());
                };

                match reply {
                    Reply::Assign(assignment) => {
                        tx.send(&Msg::Control(Command::Assign(assignment))).await?
                    }
                    Reply::Stop => tx.send(&Msg::Control(Command::Stop)).await?,
                }
            }
            Msg::Data(Payload::Report {
                report,
                sample_losses,
            }) => {
                let report = Inbound::Report {
                    worker,
                    report,
                    sample_losses: sample_losses.to_vec(),
                };

                if inbound.send(report).await.is_err() {
                    return Ok(());
                }
            }
            Msg::Control(Command::Disconnect) => {
                debug!(worker = worker.0; "worker disconnected");
                return Ok(());
            }
            Msg::Err(detail) => {
                warn!(worker = worker.0; "worker failed: {detail}");
                return Ok(());
            }
            other => {
                return Err(MasterErr::UnexpectedMessage {
                    worker,
                    got: other.kind(),
                });
            }
        }
    }
}
