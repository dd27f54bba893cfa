//! Tape-based autograd engine
//!
//! Reverse-mode automatic differentiation over 2-D tensors, used by the
//! gradient fine-tuner to backpropagate a distillation loss through the
//! quantized student graph (including the straight-through estimator).

mod backward;
mod ops;
mod tensor;


pub use backward::BackwardOp;
pub use ops::*;
pub use tensor::Tensor;

use std::collections::HashSet;
use std::rc::Rc;

/// Perform backward pass on a tensor
///
/// Walks the recorded tape once in reverse topological order, so an op fires
/// only after every consumer of its output has accumulated its gradient
/// contribution. A tensor feeding several downstream ops (the multi-tensor
/// distillation loss does this to every intermediate activation) therefore
/// propagates the sum of all contributions exactly once.
pub fn backward(tensor: &mut Tensor, grad_output: Option<ndarray::Array2<f32>>) {
    if let Some(grad) = grad_output {
        tensor.set_grad(grad);
    } else {
        // Initialize with ones for scalar loss
        let ones = ndarray::Array2::ones(tensor.data().raw_dim());
        tensor.set_grad(ones);
    }

    if let Some(root) = tensor.backward_op() {
        let mut visited: HashSet<*const ()> = HashSet::new();
        let mut postorder: Vec<Rc<dyn BackwardOp>> = Vec::new();
        collect(&root, &mut visited, &mut postorder);

        // Reverse postorder: consumers before the producers feeding them
        for op in postorder.iter().rev() {
            op.backward();
        }
    }
}

fn collect(
    op: &Rc<dyn BackwardOp>,
    visited: &mut HashSet<*const ()>,
    postorder: &mut Vec<Rc<dyn BackwardOp>>,
) {
    let key = Rc::as_ptr(op) as *const ();
    if !visited.insert(key) {
        return;
    }
    for input in op.inputs() {
        if let Some(producer) = input.backward_op() {
            collect(&producer, visited, postorder);
        }
    }
    postorder.push(op.clone());
}
