//! Tensor type with gradient tracking

use super::BackwardOp;
use ndarray::{Array1, Array2};
use std::cell::RefCell;
use std::rc::Rc;

/// Tensor with automatic differentiation support
///
/// Data is a 2-D array: rows are batch entries, columns are features.
/// Parameters use `[in, out]` (weights) or `[1, out]` (biases, scales).
#[derive(Clone)]
pub struct Tensor {
    data: Array2<f32>,
    grad: Rc<RefCell<Option<Array2<f32>>>>,
    backward_op: Option<Rc<dyn BackwardOp>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a new tensor with data
    pub fn new(data: Array2<f32>, requires_grad: bool) -> Self {
        Self {
            data,
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad,
        }
    }

    /// Create a single-row tensor from a vector (shape `[1, n]`)
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        let n = data.len();
        Self::new(
            Array2::from_shape_vec((1, n), data).expect("row vector shape"),
            requires_grad,
        )
    }

    /// Create a single-row tensor from a 1-D array
    pub fn from_row(data: &Array1<f32>, requires_grad: bool) -> Self {
        Self::from_vec(data.to_vec(), requires_grad)
    }

    /// Create a scalar tensor (shape `[1, 1]`)
    pub fn scalar(value: f32, requires_grad: bool) -> Self {
        Self::new(Array2::from_elem((1, 1), value), requires_grad)
    }

    /// Create a tensor filled with zeros
    pub fn zeros(rows: usize, cols: usize, requires_grad: bool) -> Self {
        Self::new(Array2::zeros((rows, cols)), requires_grad)
    }

    /// Get reference to data
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Get mutable reference to data
    pub fn data_mut(&mut self) -> &mut Array2<f32> {
        &mut self.data
    }

    /// Scalar value of a `[1, 1]` tensor
    pub fn item(&self) -> f32 {
        self.data[[0, 0]]
    }

    /// Get gradient (if computed)
    pub fn grad(&self) -> Option<Array2<f32>> {
        self.grad.borrow().clone()
    }

    /// Set gradient
    pub fn set_grad(&self, grad: Array2<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Accumulate gradient (for when tensor is used multiple times)
    pub fn accumulate_grad(&self, grad: Array2<f32>) {
        let mut grad_ref = self.grad.borrow_mut();
        if let Some(existing) = grad_ref.as_mut() {
            *existing = &*existing + &grad;
        } else {
            *grad_ref = Some(grad);
        }
    }

    /// Zero out gradient
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Check if requires gradient
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Get reference to gradient cell (for backward operations)
    pub fn grad_cell(&self) -> Rc<RefCell<Option<Array2<f32>>>> {
        self.grad.clone()
    }

    /// Set backward operation
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }

    /// Get backward operation
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }

    /// Number of rows
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    /// Total element count
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("data", &self.data)
            .field("grad", &self.grad.borrow())
            .field("requires_grad", &self.requires_grad)
            .finish()
    }
}
