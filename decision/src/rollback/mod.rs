//! Learning rate adaptation with checkpoint and restore of learnable state.

mod controller;
mod history;
mod learnable;

pub use controller::{RollbackController, RollbackOutcome};
pub use history::History;
pub use learnable::{BufferKind, Learnable, ParamBlock, SharedLearnable, count_nans, shared};
