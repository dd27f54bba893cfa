//! Gradient tape seam

use super::Tensor;

/// One recorded op on the gradient tape
///
/// `backward` folds the op's accumulated output gradient into its direct
/// inputs only. The tape driver in [`crate::autograd::backward`] orders the
/// recorded ops and fires each exactly once, after every consumer of its
/// output has contributed its share, so a tensor with multiple consumers
/// propagates the sum of all contributions once.
pub trait BackwardOp {
    /// Propagate the accumulated output gradient into the input tensors
    fn backward(&self);

    /// Input tensors this op consumed (tape edges toward producers)
    fn inputs(&self) -> Vec<Tensor>;
}
