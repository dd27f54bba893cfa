//! Optimizer seam for the fine-tuning loop

use crate::Tensor;

/// Update rule applied to the student model's trainable tensors
///
/// The fine-tuner hands over the same parameter slice every iteration;
/// stateful implementations key their per-parameter buffers by slice index.
pub trait Optimizer {
    /// Apply one update step using the accumulated gradients
    ///
    /// Parameters without a gradient (frozen tensors, unreached branches)
    /// are skipped.
    fn step(&mut self, params: &mut [Tensor]);

    /// Clear accumulated gradients before the next backward pass
    fn zero_grad(&mut self, params: &mut [Tensor]) {
        for param in params {
            param.zero_grad();
        }
    }

    /// Current learning rate
    fn lr(&self) -> f32;

    /// Override the learning rate
    fn set_lr(&mut self, lr: f32);
}
