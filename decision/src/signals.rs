use tokio::sync::mpsc;

/// The coordinator's edge signals as of the last call that changed them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    /// The call that produced this snapshot closed an epoch.
    pub epoch_ended: bool,
    /// Training should stop, no more work will be served.
    pub complete: bool,
    /// The last validation pass improved on the best record.
    pub improved: bool,
}

/// Edges published to subscribers as they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Improved { epoch: usize, suffix: String },
    EpochEnded { epoch: usize },
    Complete { epoch: usize },
}

/// Fans events out to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
}

impl EventBus {
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Sends `event` to every subscriber, dropping those whose receiver is gone.
    pub fn publish(&mut self, event: Event) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
