use serde::{Deserialize, Serialize};

use super::{Partition, PerPartition};

/// A contiguous run of samples drawn from one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Minibatch {
    pub partition: Partition,
    pub size: usize,
    /// The offset past the last sample of this minibatch, measured in the concatenated
    /// `eval | validation | train` sample space.
    pub offset: usize,
    /// Whether this is the last minibatch the loader serves from its partition this epoch.
    pub last: bool,
}

impl Minibatch {
    /// Returns the offset of the first sample of this minibatch relative to the start of
    /// its partition.
    ///
    /// # Arguments
    /// * `class_lengths` - The amount of samples in every partition.
    pub fn offset_in_partition(&self, class_lengths: &PerPartition<usize>) -> usize {
        let preceding: usize = self
            .partition
            .preceding()
            .iter()
            .map(|&p| class_lengths[p])
            .sum();

        self.offset.saturating_sub(self.size + preceding)
    }
}

/// The work a master hands to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub epoch_number: usize,
    pub minibatch: Minibatch,
    /// The loader's exhaustion flags right after serving `minibatch`.
    pub exhausted: PerPartition<bool>,
}

/// Loss aggregated over a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossSummary {
    pub sum: f64,
    pub max: f64,
    pub min: f64,
}

/// A single sample captured for inspection alongside a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSnapshot {
    pub input: Vec<f32>,
    pub output: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<i32>,
}

/// The metric deltas a single minibatch contributes to its partition's accumulators.
///
/// Every field is optional, a model without labels never reports `n_err` and one without
/// a regression target never reports `loss`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinibatchMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_err: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<LossSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_err_y_sum: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confusion_matrix: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<SampleSnapshot>,
}

/// What a worker sends back upstream after processing an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub minibatch: Minibatch,
    pub metrics: MinibatchMetrics,
}
