//! Gradient fine-tuning loop
//!
//! Distills the float graph (teacher) into its quantized shadow (student):
//! each iteration samples a batch, forwards both models, backpropagates a
//! multi-tensor MSE between matched activations through the straight-through
//! estimator, and steps the optimizer on the trainable shadow parameters.

use super::{GradientPtqConfig, StudentModel};
use crate::autograd::{self, mse_against, sum_scalars, Tensor};
use crate::data::{materialize, RepresentativeDataset};
use crate::error::Result;
use crate::graph::{FrameworkInfo, Graph, NodeId};

/// Fine-tuner lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainerState {
    Initialized,
    Iterating,
    Converged,
    IterationLimitReached,
    Finalized,
}

/// Snapshot passed to the iteration callback
#[derive(Clone, Copy, Debug)]
pub struct IterationContext {
    /// Current iteration (0-indexed)
    pub iteration: usize,
    /// Total iterations planned
    pub max_iterations: usize,
    /// Loss of this iteration's batch
    pub loss: f32,
    /// Best loss seen so far
    pub best_loss: f32,
    /// Current learning rate
    pub lr: f32,
}

/// Observer hook invoked once per iteration
///
/// Purely observational: implementations must not feed anything back into
/// the run.
pub trait FineTuneCallback {
    fn on_iteration(&mut self, ctx: &IterationContext);
}

/// Result of a fine-tuning run
#[derive(Clone, Copy, Debug)]
pub struct FineTuneResult {
    /// Iterations actually executed
    pub iterations_run: usize,
    /// Loss of the first iteration, if any ran
    pub initial_loss: Option<f32>,
    /// Loss of the last iteration, if any ran
    pub final_loss: Option<f32>,
    /// Whether the plateau stop fired before the iteration limit
    pub stopped_early: bool,
    /// Why the loop ended: `Converged` or `IterationLimitReached`
    ///
    /// The trainer itself moves on to `Finalized` once the shadow parameters
    /// are written back, so the terminal cause lives here.
    pub terminal: TrainerState,
}

/// Orchestrates one fine-tuning run over a calibrated graph
pub struct GptqTrainer {
    config: GradientPtqConfig,
    state: TrainerState,
    callbacks: Vec<Box<dyn FineTuneCallback>>,
}

impl GptqTrainer {
    pub fn new(config: GradientPtqConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: TrainerState::Initialized,
            callbacks: Vec::new(),
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn add_callback<C: FineTuneCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Nodes whose activations enter the distillation loss
    fn compared_nodes(&self, graph: &Graph, info: &FrameworkInfo) -> Result<Vec<NodeId>> {
        let output = graph.output()?;
        let mut nodes = if self.config.compare_intermediates {
            graph.weighted_nodes(info)
        } else {
            Vec::new()
        };
        if !nodes.contains(&output) {
            nodes.push(output);
        }
        Ok(nodes)
    }

    /// Run the full loop and write results back into the graph
    ///
    /// Mutates node weights, biases, and (when configured) thresholds in
    /// place. With zero iterations the graph comes back numerically
    /// unchanged: the untouched shadow parameters are written back as-is.
    pub fn run(
        &mut self,
        graph: &mut Graph,
        info: &FrameworkInfo,
        dataset: &mut dyn RepresentativeDataset,
    ) -> Result<FineTuneResult> {
        let batches = materialize(dataset)?;
        let compared = self.compared_nodes(graph, info)?;
        let mut student = StudentModel::new(graph, &self.config)?;
        let mut optimizer = self.config.optimizer.build();

        // Teacher activations are frozen for the whole run
        let teacher: Vec<_> = batches
            .iter()
            .map(|x| graph.forward(x))
            .collect::<Result<_>>()?;

        self.state = TrainerState::Iterating;
        let mut result = FineTuneResult {
            iterations_run: 0,
            initial_loss: None,
            final_loss: None,
            stopped_early: false,
            terminal: TrainerState::Iterating,
        };
        let mut best_loss = f32::INFINITY;
        let mut stale = 0usize;

        for iter in 0..self.config.iterations {
            let batch_idx = iter % batches.len();
            let x = &batches[batch_idx];
            let teacher_acts = &teacher[batch_idx];

            let student_acts = student.forward(graph, x)?;
            let terms: Vec<Tensor> = compared
                .iter()
                .map(|id| {
                    let weight = self.config.loss_weight_for(&graph.node(*id).name);
                    mse_against(&student_acts[id], &teacher_acts[id], weight)
                })
                .collect();
            let mut loss = sum_scalars(&terms);
            let loss_value = loss.item();

            optimizer.zero_grad(student.tensors_mut());
            autograd::backward(&mut loss, None);
            optimizer.step(student.tensors_mut());

            result.iterations_run = iter + 1;
            result.initial_loss.get_or_insert(loss_value);
            result.final_loss = Some(loss_value);

            let improved = match &self.config.plateau {
                Some(p) => loss_value + p.min_delta < best_loss,
                None => false,
            };
            if loss_value < best_loss {
                best_loss = loss_value;
            }

            let ctx = IterationContext {
                iteration: iter,
                max_iterations: self.config.iterations,
                loss: loss_value,
                best_loss,
                lr: optimizer.lr(),
            };
            for cb in &mut self.callbacks {
                cb.on_iteration(&ctx);
            }
            if self.config.log_interval > 0 && iter % self.config.log_interval == 0 {
                println!(
                    "iter {:>5}/{} loss {:.6} best {:.6}",
                    iter, self.config.iterations, loss_value, best_loss
                );
            }

            if let Some(plateau) = &self.config.plateau {
                if improved {
                    stale = 0;
                } else {
                    stale += 1;
                }
                if stale >= plateau.patience {
                    result.stopped_early = true;
                    break;
                }
            }
        }

        result.terminal = if result.stopped_early {
            TrainerState::Converged
        } else {
            TrainerState::IterationLimitReached
        };
        self.state = result.terminal;

        student.finalize(graph, &self.config);
        self.state = TrainerState::Finalized;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataset;
    use crate::error::Error;
    use crate::gptq::{OptimizerSpec, PlateauConfig};
    use crate::qconfig::QuantScheme;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn calibrated_graph() -> Graph {
        let mut g = Graph::new();
        let input = g.add_input("input", 2);
        let d = g
            .add_dense(
                "fc",
                input,
                arr2(&[[0.43, -0.21], [0.12, 0.33]]),
                arr1(&[0.05, -0.02]),
            )
            .unwrap();
        g.set_output(d).unwrap();
        g.node_mut(d).qconfig.weights.scheme = Some(QuantScheme::symmetric(0.5));
        g.node_mut(d).qconfig.weights.bits = 4;
        g
    }

    fn dataset() -> InMemoryDataset {
        InMemoryDataset::new(vec![
            arr2(&[[1.0, -0.5], [0.2, 0.8]]),
            arr2(&[[-0.3, 0.6]]),
        ])
    }

    #[test]
    fn test_zero_iterations_leaves_graph_unchanged() {
        let mut g = calibrated_graph();
        let before = g.node(crate::graph::NodeId(1)).weight.clone().unwrap();

        let mut trainer = GptqTrainer::new(GradientPtqConfig::with_iterations(0)).unwrap();
        let info = FrameworkInfo::default();
        let result = trainer.run(&mut g, &info, &mut dataset()).unwrap();

        assert_eq!(result.iterations_run, 0);
        assert!(result.final_loss.is_none());
        assert_eq!(result.terminal, TrainerState::IterationLimitReached);
        assert_eq!(trainer.state(), TrainerState::Finalized);

        let after = g.node(crate::graph::NodeId(1)).weight.clone().unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert_abs_diff_eq!(a, b);
        }
    }

    #[test]
    fn test_loss_trends_down_over_run() {
        let mut g = calibrated_graph();
        let mut cfg = GradientPtqConfig::with_iterations(60);
        cfg.optimizer = OptimizerSpec::Sgd {
            lr: 0.05,
            momentum: 0.0,
        };
        let mut trainer = GptqTrainer::new(cfg).unwrap();
        let info = FrameworkInfo::default();
        let result = trainer.run(&mut g, &info, &mut dataset()).unwrap();

        let initial = result.initial_loss.unwrap();
        let final_ = result.final_loss.unwrap();
        assert!(
            final_ <= initial,
            "loss went up: {initial} -> {final_}"
        );
    }

    #[test]
    fn test_empty_dataset_is_config_error() {
        let mut g = calibrated_graph();
        let mut trainer = GptqTrainer::new(GradientPtqConfig::with_iterations(5)).unwrap();
        let info = FrameworkInfo::default();
        let mut empty = InMemoryDataset::new(vec![]);
        assert!(matches!(
            trainer.run(&mut g, &info, &mut empty),
            Err(Error::EmptyDataset)
        ));
        // Run never started iterating
        assert_eq!(trainer.state(), TrainerState::Initialized);
    }

    #[test]
    fn test_callback_sees_every_iteration() {
        struct Counter(std::rc::Rc<std::cell::Cell<usize>>);
        impl FineTuneCallback for Counter {
            fn on_iteration(&mut self, ctx: &IterationContext) {
                assert!(ctx.loss.is_finite());
                self.0.set(self.0.get() + 1);
            }
        }

        let count = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut g = calibrated_graph();
        let mut trainer = GptqTrainer::new(GradientPtqConfig::with_iterations(7)).unwrap();
        trainer.add_callback(Counter(count.clone()));
        let info = FrameworkInfo::default();
        trainer.run(&mut g, &info, &mut dataset()).unwrap();

        assert_eq!(count.get(), 7);
    }

    #[test]
    fn test_plateau_stops_early() {
        let mut g = calibrated_graph();
        let mut cfg = GradientPtqConfig::with_iterations(1000);
        // Zero learning rate: the loss can never improve
        cfg.optimizer = OptimizerSpec::Sgd {
            lr: 1e-30,
            momentum: 0.0,
        };
        cfg.plateau = Some(PlateauConfig {
            patience: 3,
            min_delta: 1e-9,
        });
        let mut trainer = GptqTrainer::new(cfg).unwrap();
        let info = FrameworkInfo::default();
        let result = trainer.run(&mut g, &info, &mut dataset()).unwrap();

        assert!(result.stopped_early);
        assert!(result.iterations_run < 1000);
        assert_eq!(result.terminal, TrainerState::Converged);
        assert_eq!(trainer.state(), TrainerState::Finalized);
    }

    #[test]
    fn test_loss_weights_scale_distillation_terms() {
        // Single compared node: doubling its weight doubles the loss
        let info = FrameworkInfo::default();

        let mut base_cfg = GradientPtqConfig::with_iterations(1);
        base_cfg.optimizer = OptimizerSpec::Sgd {
            lr: 1e-30,
            momentum: 0.0,
        };
        let mut weighted_cfg = base_cfg.clone();
        weighted_cfg.loss_weights =
            Some(std::collections::BTreeMap::from([("fc".to_string(), 2.0)]));

        let mut g1 = calibrated_graph();
        let mut t1 = GptqTrainer::new(base_cfg).unwrap();
        let base = t1.run(&mut g1, &info, &mut dataset()).unwrap();

        let mut g2 = calibrated_graph();
        let mut t2 = GptqTrainer::new(weighted_cfg).unwrap();
        let weighted = t2.run(&mut g2, &info, &mut dataset()).unwrap();

        assert_abs_diff_eq!(
            weighted.initial_loss.unwrap(),
            2.0 * base.initial_loss.unwrap(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_training_reduces_output_distortion() {
        let mut g = calibrated_graph();
        let x = arr2(&[[1.0, -0.5]]);
        let out = g.output().unwrap();
        let float_out = g.forward(&x).unwrap()[&out].clone();
        let before = g.forward_quantized(&x).unwrap()[&out].clone();
        let err_before: f32 = float_out
            .iter()
            .zip(before.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();

        let mut cfg = GradientPtqConfig::with_iterations(200);
        cfg.optimizer = OptimizerSpec::Adam { lr: 0.01 };
        let mut trainer = GptqTrainer::new(cfg).unwrap();
        let info = FrameworkInfo::default();
        trainer.run(&mut g, &info, &mut dataset()).unwrap();

        let after = g.forward_quantized(&x).unwrap()[&out].clone();
        let err_after: f32 = float_out
            .iter()
            .zip(after.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();

        assert!(
            err_after <= err_before + 1e-6,
            "distortion grew: {err_before} -> {err_after}"
        );
    }
}
