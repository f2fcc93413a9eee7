use log::info;

use crate::{UNSET, rollback::SharedLearnable};

const MIN_LEARNING_RATE: f64 = 1e-5;
const MAX_LEARNING_RATE: f64 = 0.75;

/// Speeds learning up while the train error keeps going down and slows it down
/// once it goes up.
pub struct DynamicAlpha {
    prev_train_err: f64,
    components: Vec<SharedLearnable>,
}

impl DynamicAlpha {
    pub fn new() -> Self {
        Self {
            prev_train_err: UNSET,
            components: Vec::new(),
        }
    }

    pub fn add_component(&mut self, learnable: SharedLearnable) {
        self.components.push(learnable);
    }

    /// The factor to apply given this and the previous train error.
    pub fn factor(this_train_err: f64, prev_train_err: f64) -> f64 {
        let k = if prev_train_err != 0. {
            this_train_err / prev_train_err
        } else {
            1.
        };

        if k < 1.04 { 1.05 } else { 0.7 }
    }

    /// Adapts every component's learning rate after a train pass.
    ///
    /// # Arguments
    /// * `this_train_err` - The train pass error, `None` keeps the previous one.
    ///
    /// # Returns
    /// The first component's new learning rate.
    pub fn step(&mut self, this_train_err: Option<f64>) -> Option<f32> {
        let this_train_err = this_train_err.unwrap_or(self.prev_train_err);
        let ak = Self::factor(this_train_err, self.prev_train_err);
        self.prev_train_err = this_train_err;

        let mut first = None;
        for component in &self.components {
            let mut learnable = component.lock();
            let lr = (ak * learnable.learning_rate() as f64)
                .clamp(MIN_LEARNING_RATE, MAX_LEARNING_RATE);
            learnable.set_learning_rate(lr as f32);
            first.get_or_insert(lr as f32);
        }

        if let Some(lr) = first {
            info!("new learning_rate: {lr:.6}");
        }

        first
    }
}

impl Default for DynamicAlpha {
    fn default() -> Self {
        Self::new()
    }
}
