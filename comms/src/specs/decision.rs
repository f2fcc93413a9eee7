use serde::{Deserialize, Serialize};

/// How a validation result that ties the best one so far is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The tie counts as an improvement when the train metric went down.
    #[default]
    LowerTrain,
    /// The tie counts as an improvement when the train metric went up.
    HigherTrain,
    /// Ties never count as an improvement.
    Disabled,
}

/// Tie break policy for each of the tracked validation metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieBreakSpec {
    pub loss: TieBreak,
    pub errors: TieBreak,
}

/// Improvement and stop policy of the epoch coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionSpec {
    /// Stop once this many epochs have been completed.
    pub max_epochs: Option<usize>,
    /// How many epochs both validation tracks may go without improving.
    pub fail_iterations: usize,
    pub store_samples_loss: bool,
    pub use_dynamic_alpha: bool,
    pub track_loss: bool,
    pub track_errors: bool,
    pub tie_break: TieBreakSpec,
}

impl Default for DecisionSpec {
    fn default() -> Self {
        Self {
            max_epochs: None,
            fail_iterations: 100,
            store_samples_loss: false,
            use_dynamic_alpha: false,
            track_loss: true,
            track_errors: true,
            tie_break: TieBreakSpec::default(),
        }
    }
}
