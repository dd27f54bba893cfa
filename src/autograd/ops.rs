//! Autograd operations with backward passes
//!
//! Forward kernels mirror the graph execution semantics so the fine-tuner's
//! student model differentiates through the same math the deployed graph runs.
//! The `fake_quantize` op is the straight-through estimator: its forward pass
//! rounds onto the quantization grid, its backward pass treats rounding as
//! identity so gradients reach the underlying float weights.

use super::{BackwardOp, Tensor};
use ndarray::{Array2, Axis};
use std::cell::RefCell;
use std::rc::Rc;

/// Matrix product: `[batch, in] × [in, out] → [batch, out]`
pub fn matmul(x: &Tensor, w: &Tensor) -> Tensor {
    let data = x.data().dot(w.data());
    let requires_grad = x.requires_grad() || w.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MatmulBackward {
            x: x.clone(),
            w: w.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MatmulBackward {
    x: Tensor,
    w: Tensor,
    result_grad: Rc<RefCell<Option<Array2<f32>>>>,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                // ∂L/∂x = ∂L/∂out · wᵀ
                self.x.accumulate_grad(grad.dot(&self.w.data().t()));
            }
            if self.w.requires_grad() {
                // ∂L/∂w = xᵀ · ∂L/∂out
                self.w.accumulate_grad(self.x.data().t().dot(grad));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.w.clone()]
    }
}

/// Broadcast-add a `[1, out]` bias row to every batch row
pub fn add_bias(x: &Tensor, bias: &Tensor) -> Tensor {
    let data = x.data() + bias.data();
    let requires_grad = x.requires_grad() || bias.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBiasBackward {
            x: x.clone(),
            bias: bias.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AddBiasBackward {
    x: Tensor,
    bias: Tensor,
    result_grad: Rc<RefCell<Option<Array2<f32>>>>,
}

impl BackwardOp for AddBiasBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                self.x.accumulate_grad(grad.clone());
            }
            if self.bias.requires_grad() {
                // ∂L/∂bias = column sums of ∂L/∂out
                let col_sum = grad.sum_axis(Axis(0)).insert_axis(Axis(0));
                self.bias.accumulate_grad(col_sum);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.bias.clone()]
    }
}

/// Add two tensors element-wise
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    let data = a.data() + b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: Rc<RefCell<Option<Array2<f32>>>>,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// ReLU activation
pub fn relu(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|x| x.max(0.0));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ReluBackward {
    a: Tensor,
    result_grad: Rc<RefCell<Option<Array2<f32>>>>,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * (a > 0)
                let grad_a = grad * &self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Weighted mean-square error against a constant target: scalar `[1, 1]`
///
/// `loss = weight * mean((pred - target)²)`
///
/// The target carries no gradient (it is the frozen teacher activation).
pub fn mse_against(pred: &Tensor, target: &Array2<f32>, weight: f32) -> Tensor {
    let diff = pred.data() - target;
    let n = diff.len().max(1) as f32;
    let loss = weight * diff.mapv(|d| d * d).sum() / n;

    let requires_grad = pred.requires_grad();
    let mut result = Tensor::scalar(loss, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MseBackward {
            pred: pred.clone(),
            diff,
            weight,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MseBackward {
    pred: Tensor,
    diff: Array2<f32>,
    weight: f32,
    result_grad: Rc<RefCell<Option<Array2<f32>>>>,
}

impl BackwardOp for MseBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.pred.requires_grad() {
                // ∂L/∂pred = g * weight * 2(pred - target)/n
                let n = self.diff.len().max(1) as f32;
                let scale = grad[[0, 0]] * self.weight * 2.0 / n;
                self.pred.accumulate_grad(&self.diff * scale);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.pred.clone()]
    }
}

/// Sum a set of scalar `[1, 1]` tensors into one scalar
pub fn sum_scalars(terms: &[Tensor]) -> Tensor {
    let total: f32 = terms.iter().map(Tensor::item).sum();
    let requires_grad = terms.iter().any(Tensor::requires_grad);

    let mut result = Tensor::scalar(total, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SumScalarsBackward {
            terms: terms.to_vec(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SumScalarsBackward {
    terms: Vec<Tensor>,
    result_grad: Rc<RefCell<Option<Array2<f32>>>>,
}

impl BackwardOp for SumScalarsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            for term in &self.terms {
                if term.requires_grad() {
                    term.accumulate_grad(grad.clone());
                }
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        self.terms.clone()
    }
}

/// Fake quantization onto a symmetric integer grid (straight-through estimator)
///
/// Forward: `y = clamp(round(x / s), qmin, qmax) * s` with `s` either a
/// scalar `[1, 1]` or a per-column `[1, cols]` scale tensor.
///
/// Backward: identity into `x` (STE, local gradient 1 through the rounding
/// step). When the scale is trainable, its gradient is the per-column sum of
/// `g · q` where `q` is the clamped integer grid index, so thresholds can be
/// fine-tuned alongside weights.
pub fn fake_quantize(x: &Tensor, scale: &Tensor, qmin: i32, qmax: i32) -> Tensor {
    let q = quantize_levels(x.data(), scale.data(), qmin, qmax);
    let data = dequantize_levels(&q, scale.data());
    let requires_grad = x.requires_grad() || scale.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(FakeQuantizeBackward {
            x: x.clone(),
            scale: scale.clone(),
            levels: q,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct FakeQuantizeBackward {
    x: Tensor,
    scale: Tensor,
    levels: Array2<f32>,
    result_grad: Rc<RefCell<Option<Array2<f32>>>>,
}

impl BackwardOp for FakeQuantizeBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                // STE: gradient passes through the rounding unchanged
                self.x.accumulate_grad(grad.clone());
            }
            if self.scale.requires_grad() {
                // ∂y/∂s = q at the committed grid point
                let weighted = grad * &self.levels;
                let per_col = weighted.sum_axis(Axis(0)).insert_axis(Axis(0));
                if self.scale.ncols() == 1 {
                    let total = per_col.sum();
                    self.scale.accumulate_grad(Array2::from_elem((1, 1), total));
                } else {
                    self.scale.accumulate_grad(per_col);
                }
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.scale.clone()]
    }
}

/// Integer grid indices for `x` under `scale` (scalar or per-column)
fn quantize_levels(
    x: &Array2<f32>,
    scale: &Array2<f32>,
    qmin: i32,
    qmax: i32,
) -> Array2<f32> {
    let per_column = scale.ncols() == x.ncols() && scale.ncols() > 1;
    let mut q = x.clone();
    for ((_, col), v) in q.indexed_iter_mut() {
        let s = if per_column {
            scale[[0, col]]
        } else {
            scale[[0, 0]]
        };
        let s = s.max(f32::EPSILON);
        *v = (*v / s).round().clamp(qmin as f32, qmax as f32);
    }
    q
}

fn dequantize_levels(q: &Array2<f32>, scale: &Array2<f32>) -> Array2<f32> {
    let per_column = scale.ncols() == q.ncols() && scale.ncols() > 1;
    let mut y = q.clone();
    for ((_, col), v) in y.indexed_iter_mut() {
        let s = if per_column {
            scale[[0, col]]
        } else {
            scale[[0, 0]]
        };
        *v *= s.max(f32::EPSILON);
    }
    y
}
