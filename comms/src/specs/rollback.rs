use serde::{Deserialize, Serialize};

/// Which checkpoint a rollback restores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPoint {
    /// The most recent checkpoint, which is kept in the history.
    #[default]
    Latest,
    /// The oldest checkpoint, every newer one is discarded.
    Oldest,
}

/// Learning rate adaptation and checkpoint policy of the rollback controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSpec {
    pub lr_plus: f32,
    pub lr_minus: f32,
    pub plus_steps: usize,
    pub minus_steps: usize,
    pub history_limit: usize,
    pub rollback_point: RollbackPoint,
}

impl Default for RollbackSpec {
    fn default() -> Self {
        Self {
            lr_plus: 1.1,
            lr_minus: 0.5,
            plus_steps: 1,
            minus_steps: 3,
            history_limit: 2,
            rollback_point: RollbackPoint::Latest,
        }
    }
}
