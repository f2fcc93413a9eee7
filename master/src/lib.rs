//! The coordinating side of a training session: hands minibatches to connected
//! workers and accounts their reports into epochs.

mod error;
mod service;

pub use error::{MasterErr, Result};
pub use service::{MasterHandle, MasterService};
