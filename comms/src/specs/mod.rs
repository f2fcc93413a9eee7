pub mod decision;
pub mod master;
pub mod partition;
pub mod rollback;
pub mod work;

pub use decision::{DecisionSpec, TieBreak, TieBreakSpec};
pub use master::MasterSpec;
pub use partition::{Partition, PerPartition};
pub use rollback::{RollbackPoint, RollbackSpec};
pub use work::{Assignment, LossSummary, Minibatch, MinibatchMetrics, SampleSnapshot, WorkerReport};
