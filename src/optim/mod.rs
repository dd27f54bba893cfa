//! Optimizers for the gradient fine-tuning stage

mod adam;
mod optimizer;
mod sgd;

pub use adam::Adam;
pub use optimizer::Optimizer;
pub use sgd::SGD;
