use comms::specs::{Minibatch, MinibatchMetrics};

/// What the numeric collaborators produce for a single minibatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub metrics: MinibatchMetrics,
    /// The loss of every sample in the minibatch, in order.
    pub sample_losses: Vec<f32>,
}

/// The model side of a training run.
pub trait Trainable {
    /// Runs the forward pass and evaluator over `minibatch`.
    fn evaluate(&mut self, minibatch: &Minibatch) -> Evaluation;

    /// Applies the gradient step for the last evaluated minibatch.
    fn learn(&mut self, minibatch: &Minibatch);
}
