//! Per partition metric accumulation.

use comms::specs::{LossSummary, MinibatchMetrics};

use crate::{DecisionErr, Result, UNSET};

/// Sums up the metric deltas of every minibatch of a partition during an epoch.
///
/// Merging is commutative and associative, so worker results can be applied in any
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricAccumulator {
    n_err: Option<u64>,
    loss: Option<LossSummary>,
    max_err_y_sum: Option<Vec<f32>>,
    confusion_matrix: Option<Vec<u64>>,
    minibatches: usize,
}

fn check_len<T>(
    field: &'static str,
    current: &Option<Vec<T>>,
    incoming: &Option<Vec<T>>,
) -> Result<()> {
    match (current, incoming) {
        (Some(current), Some(incoming)) if current.len() != incoming.len() => {
            Err(DecisionErr::SizeMismatch {
                field,
                got: incoming.len(),
                expected: current.len(),
            })
        }
        _ => Ok(()),
    }
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a minibatch's metrics into the accumulator.
    ///
    /// # Errors
    /// `SizeMismatch` if a vector metric's shape differs from the one accumulated so
    /// far, in which case nothing is merged.
    pub fn merge(&mut self, metrics: &MinibatchMetrics) -> Result<()> {
        check_len("max_err_y_sum", &self.max_err_y_sum, &metrics.max_err_y_sum)?;
        check_len("confusion_matrix", &self.confusion_matrix, &metrics.confusion_matrix)?;

        if let Some(n_err) = metrics.n_err {
            *self.n_err.get_or_insert(0) += n_err;
        }

        if let Some(loss) = metrics.loss {
            let acc = self.loss.get_or_insert(LossSummary {
                sum: 0.,
                max: 0.,
                min: UNSET,
            });

            acc.sum += loss.sum;
            acc.max = acc.max.max(loss.max);
            acc.min = acc.min.min(loss.min);
        }

        if let Some(incoming) = &metrics.max_err_y_sum {
            match &mut self.max_err_y_sum {
                Some(acc) => acc
                    .iter_mut()
                    .zip(incoming)
                    .for_each(|(a, &b)| *a = a.max(b)),
                None => self.max_err_y_sum = Some(incoming.clone()),
            }
        }

        if let Some(incoming) = &metrics.confusion_matrix {
            match &mut self.confusion_matrix {
                Some(acc) => acc.iter_mut().zip(incoming).for_each(|(a, b)| *a += b),
                None => self.confusion_matrix = Some(incoming.clone()),
            }
        }

        self.minibatches += 1;
        Ok(())
    }

    /// Clears every accumulated value, the next merge starts a new cycle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Amount of minibatches merged since the last reset.
    pub fn minibatches(&self) -> usize {
        self.minibatches
    }

    /// The accumulated values in wire form.
    pub fn to_metrics(&self) -> MinibatchMetrics {
        MinibatchMetrics {
            n_err: self.n_err,
            loss: self.loss,
            max_err_y_sum: self.max_err_y_sum.clone(),
            confusion_matrix: self.confusion_matrix.clone(),
            samples: None,
        }
    }

    /// Freezes the accumulated values into the metrics of a finished partition pass.
    ///
    /// # Arguments
    /// * `class_length` - The amount of samples in the partition.
    pub fn freeze(&self, class_length: usize) -> EpochMetrics {
        let samples = class_length.max(1) as f64;

        EpochMetrics {
            n_err: self.n_err,
            n_err_pct: self.n_err.map(|n| 100. * n as f64 / samples),
            loss: self.loss.map(|loss| EpochLoss {
                avg: loss.sum / samples,
                max: loss.max,
                min: loss.min,
            }),
            max_err_y_sum: self.max_err_y_sum.clone(),
            confusion_matrix: self.confusion_matrix.clone(),
        }
    }
}

/// Loss statistics over a whole partition pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLoss {
    pub avg: f64,
    pub max: f64,
    pub min: f64,
}

/// The frozen metrics of a partition for the last epoch it was fully processed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochMetrics {
    pub n_err: Option<u64>,
    pub n_err_pct: Option<f64>,
    pub loss: Option<EpochLoss>,
    pub max_err_y_sum: Option<Vec<f32>>,
    pub confusion_matrix: Option<Vec<u64>>,
}

impl EpochMetrics {
    /// The human readable statistics of this pass.
    pub fn describe(&self) -> Vec<String> {
        let mut stats = Vec::new();

        if let Some(loss) = self.loss {
            stats.push(format!(
                "AvgMSE {:.6} MaxMSE {:.6} MinMSE {:.3e}",
                loss.avg, loss.max, loss.min
            ));
        }

        if let Some(n_err) = self.n_err {
            stats.push(format!(
                "n_err {n_err} ({:.2}%)",
                self.n_err_pct.unwrap_or_default()
            ));
        }

        stats
    }
}
