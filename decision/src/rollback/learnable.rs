use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

/// The state buffers a learnable component may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Weights,
    Bias,
    GradientWeights,
    GradientBias,
}

impl BufferKind {
    pub const ALL: [BufferKind; 4] = [
        BufferKind::Weights,
        BufferKind::Bias,
        BufferKind::GradientWeights,
        BufferKind::GradientBias,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BufferKind::Weights => "weights",
            BufferKind::Bias => "bias",
            BufferKind::GradientWeights => "gradient_weights",
            BufferKind::GradientBias => "gradient_bias",
        }
    }
}

/// A component whose learning rates and state the rollback controller manages.
pub trait Learnable {
    fn name(&self) -> &str;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);

    fn learning_rate_bias(&self) -> f32;

    fn set_learning_rate_bias(&mut self, learning_rate: f32);

    /// The buffer of the given kind, `None` if the component has no such buffer.
    fn buffer(&self, kind: BufferKind) -> Option<&[f32]>;

    fn buffer_mut(&mut self, kind: BufferKind) -> Option<&mut [f32]>;
}

/// A learnable component shared between the numeric side and its controllers.
pub type SharedLearnable = Arc<Mutex<dyn Learnable + Send>>;

/// Wraps `learnable` so it can be registered with controllers.
pub fn shared<L: Learnable + Send + 'static>(learnable: L) -> SharedLearnable {
    Arc::new(Mutex::new(learnable))
}

/// Counts the `NaN` values across every buffer of `learnable`.
pub fn count_nans(learnable: &dyn Learnable) -> usize {
    BufferKind::ALL
        .into_iter()
        .filter_map(|kind| learnable.buffer(kind))
        .map(|buf| buf.par_iter().filter(|v| v.is_nan()).count())
        .sum()
}

/// A plain set of dense parameters with their gradients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBlock {
    pub name: String,
    pub learning_rate: f32,
    pub learning_rate_bias: f32,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub gradient_weights: Vec<f32>,
    pub gradient_bias: Vec<f32>,
}

impl ParamBlock {
    /// Creates a new `ParamBlock` with zeroed gradients.
    ///
    /// # Arguments
    /// * `name` - Used in logs.
    /// * `learning_rate` - The starting learning rate for both weights and bias.
    /// * `weights` - The initial weights.
    /// * `bias` - The initial bias.
    pub fn new(
        name: impl Into<String>,
        learning_rate: f32,
        weights: Vec<f32>,
        bias: Vec<f32>,
    ) -> Self {
        Self {
            name: name.into(),
            learning_rate,
            learning_rate_bias: learning_rate,
            gradient_weights: vec![0.; weights.len()],
            gradient_bias: vec![0.; bias.len()],
            weights,
            bias,
        }
    }

    fn slot(&self, kind: BufferKind) -> &Vec<f32> {
        match kind {
            BufferKind::Weights => &self.weights,
            BufferKind::Bias => &self.bias,
            BufferKind::GradientWeights => &self.gradient_weights,
            BufferKind::GradientBias => &self.gradient_bias,
        }
    }
}

impl Learnable for ParamBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn learning_rate_bias(&self) -> f32 {
        self.learning_rate_bias
    }

    fn set_learning_rate_bias(&mut self, learning_rate: f32) {
        self.learning_rate_bias = learning_rate;
    }

    fn buffer(&self, kind: BufferKind) -> Option<&[f32]> {
        let buf = self.slot(kind);
        (!buf.is_empty()).then_some(buf.as_slice())
    }

    fn buffer_mut(&mut self, kind: BufferKind) -> Option<&mut [f32]> {
        let buf = match kind {
            BufferKind::Weights => &mut self.weights,
            BufferKind::Bias => &mut self.bias,
            BufferKind::GradientWeights => &mut self.gradient_weights,
            BufferKind::GradientBias => &mut self.gradient_bias,
        };

        (!buf.is_empty()).then_some(buf.as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffers_are_absent() {
        let block = ParamBlock::new("fc", 0.1, vec![1., 2.], Vec::new());

        assert_eq!(block.buffer(BufferKind::Weights), Some(&[1., 2.][..]));
        assert_eq!(block.buffer(BufferKind::GradientWeights), Some(&[0., 0.][..]));
        assert!(block.buffer(BufferKind::Bias).is_none());
        assert!(block.buffer(BufferKind::GradientBias).is_none());
    }

    #[test]
    fn test_count_nans() {
        let mut block = ParamBlock::new("fc", 0.1, vec![1., f32::NAN], vec![0.]);
        assert_eq!(count_nans(&block), 1);

        block.gradient_bias[0] = f32::NAN;
        assert_eq!(count_nans(&block), 2);
    }

    #[test]
    fn test_shared_coerces_to_trait_object() {
        let component = shared(ParamBlock::new("fc", 0.25, vec![1.], vec![1.]));
        component.lock().set_learning_rate(0.5);

        assert_eq!(component.lock().learning_rate(), 0.5);
        assert_eq!(component.lock().learning_rate_bias(), 0.25);
    }
}
