//! Epoch accounting, improvement tracking and learning rate rollback for a pool of
//! asynchronous workers training a single model.

pub mod builder;
mod coordinator;
mod error;
mod ledger;
mod loader;
pub mod metrics;
pub mod policy;
mod record;
pub mod rollback;
mod signals;
mod standalone;
mod trainable;

pub use coordinator::{EpochCoordinator, Role, Summary, Tick};
pub use error::{DecisionErr, Result};
pub use ledger::{WorkLedger, WorkerId};
pub use loader::{MinibatchSource, SequentialLoader};
pub use record::{BestRecord, Track, UNSET};
pub use signals::{Event, Signals};
pub use standalone::Standalone;
pub use trainable::{Evaluation, Trainable};
