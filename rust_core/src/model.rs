use crate::autodiff::{self, Evaluator};
use crate::builder::build;
use crate::data::Bindings;
use crate::distributions::Distribution;
use crate::error::{CompileError, CompileResult, EvalError};
use crate::graph::{Graph, VarId};
use crate::ir::Model;
use crate::lower::lower;
use crate::registry::Registry;
use crate::tape::Tape;
use crate::transforms::to_unconstrained;
use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Half-width of the unconstrained interval used when a prior draw fails.
const FALLBACK_RADIUS: f64 = 2.0;

/// How parameters without a user-supplied init are seeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitStrategy {
    /// Draw from the node's own distribution given its parents.
    Prior,
    /// Uniform on `[-radius, radius]` in unconstrained space.
    Uniform { radius: f64 },
    Zero,
}

/// Configuration for [`compile_with`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Reject duplicate definitions instead of warning.
    pub strict: bool,
    pub init: InitStrategy,
    pub seed: u64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict: false,
            init: InitStrategy::Prior,
            seed: 42,
        }
    }
}

/// Compile with the built-in registry and default options.
pub fn compile(model: &Model, data: &Bindings, inits: Option<&Bindings>) -> CompileResult<CompiledModel> {
    compile_with(model, data, inits, &Registry::with_builtins(), &CompileOptions::default())
}

pub fn compile_with(
    model: &Model,
    data: &Bindings,
    inits: Option<&Bindings>,
    registry: &Registry,
    options: &CompileOptions,
) -> CompileResult<CompiledModel> {
    let graph = build(model, data, registry, options.strict)?;
    let tape = lower(&graph)?;

    let empty = Bindings::new();
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let initial = unconstrained_point(&tape, inits.unwrap_or(&empty), Some((&options.init, &mut rng)))?;

    tracing::debug!(
        dimension = tape.param_count(),
        ops = tape.len(),
        warnings = graph.warnings().len(),
        "model compiled"
    );
    Ok(CompiledModel {
        parameter_names: graph.parameter_names(),
        graph,
        tape: Arc::new(tape),
        initial,
    })
}

/// A compiled model: the frozen dependency graph plus its evaluation tape.
///
/// Immutable after compilation and safe to share between threads. Methods
/// taking `&self` allocate fresh scratch space per call; use
/// [`CompiledModel::evaluator`] in hot loops.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    graph: Graph,
    tape: Arc<Tape>,
    parameter_names: Vec<VarId>,
    initial: Vec<f64>,
}

impl CompiledModel {
    /// Length of the unconstrained parameter vector.
    pub fn dimension(&self) -> usize {
        self.tape.param_count()
    }

    pub fn log_density(&self, theta: &[f64]) -> Result<f64, EvalError> {
        self.evaluator().log_density(theta)
    }

    /// Like [`log_density`](Self::log_density) but reports domain errors
    /// instead of returning `-inf`.
    pub fn try_log_density(&self, theta: &[f64]) -> Result<f64, EvalError> {
        self.evaluator().try_log_density(theta)
    }

    pub fn log_density_and_gradient(&self, theta: &[f64]) -> Result<(f64, Vec<f64>), EvalError> {
        let mut ev = self.evaluator();
        let (lp, grad) = ev.log_density_and_gradient(theta)?;
        Ok((lp, grad.to_vec()))
    }

    /// Unconstrained starting point built from `inits` and the init strategy.
    pub fn initial_parameters(&self) -> Vec<f64> {
        self.initial.clone()
    }

    /// Parameter identities in theta order.
    pub fn parameter_names(&self) -> &[VarId] {
        &self.parameter_names
    }

    /// Unconstrained vector for a full assignment of parameter values.
    pub fn flatten(&self, assignment: &Bindings) -> CompileResult<Vec<f64>> {
        unconstrained_point(&self.tape, assignment, None)
    }

    /// Constrained values of every parameter and deterministic node at `theta`.
    pub fn transform_samples(&self, theta: &[f64]) -> Result<IndexMap<VarId, f64>, EvalError> {
        self.evaluator().transform_samples(theta)
    }

    /// Log-density at many points in parallel.
    pub fn log_density_batch(&self, thetas: &[Vec<f64>]) -> Vec<Result<f64, EvalError>> {
        thetas
            .par_iter()
            .map_init(|| self.evaluator(), |ev, theta| ev.log_density(theta))
            .collect()
    }

    /// [`transform_samples`](Self::transform_samples) over many draws in parallel.
    pub fn transform_draws(&self, thetas: &[Vec<f64>]) -> Result<Vec<IndexMap<VarId, f64>>, EvalError> {
        thetas
            .par_iter()
            .map_init(|| self.evaluator(), |ev, theta| ev.transform_samples(theta))
            .collect()
    }

    /// Evaluator with its own scratch buffers, for repeated calls from one thread.
    pub fn evaluator(&self) -> ModelEvaluator<'_> {
        ModelEvaluator {
            tape: &self.tape,
            inner: Evaluator::new(&self.tape),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Warnings recorded while building the graph.
    pub fn warnings(&self) -> &[String] {
        self.graph.warnings()
    }
}

/// Reusable evaluation handle for one [`CompiledModel`].
#[derive(Debug)]
pub struct ModelEvaluator<'m> {
    tape: &'m Tape,
    inner: Evaluator,
}

impl ModelEvaluator<'_> {
    /// Log-density; domain errors give `-inf`.
    pub fn log_density(&mut self, theta: &[f64]) -> Result<f64, EvalError> {
        match self.inner.try_log_density(self.tape, theta) {
            Err(EvalError::DomainEvaluation { .. }) => Ok(f64::NEG_INFINITY),
            other => other,
        }
    }

    pub fn try_log_density(&mut self, theta: &[f64]) -> Result<f64, EvalError> {
        self.inner.try_log_density(self.tape, theta)
    }

    /// Log-density and gradient with respect to theta. The gradient slice
    /// is overwritten by the next call.
    pub fn log_density_and_gradient(&mut self, theta: &[f64]) -> Result<(f64, &[f64]), EvalError> {
        self.inner.compute(self.tape, theta)?;
        Ok((self.inner.total_logp, self.inner.grad.as_slice()))
    }

    pub fn transform_samples(&mut self, theta: &[f64]) -> Result<IndexMap<VarId, f64>, EvalError> {
        let values = self.inner.evaluate(self.tape, theta)?;
        Ok(self
            .tape
            .outputs
            .iter()
            .map(|(var, id)| (var.clone(), values[id.0]))
            .collect())
    }
}

/// Map an assignment of constrained parameter values to theta.
///
/// Parameters missing from `assignment` are seeded by `fallback`, or are an
/// error when there is none. Runs the forward pass so each parameter's
/// support is checked against its already-resolved parents.
fn unconstrained_point(
    tape: &Tape,
    assignment: &Bindings,
    mut fallback: Option<(&InitStrategy, &mut ChaCha8Rng)>,
) -> CompileResult<Vec<f64>> {
    let mut theta = vec![0.0; tape.param_count()];
    let mut values = Vec::with_capacity(tape.len());
    autodiff::forward_with(tape, &mut values, |k, computed| {
        let slot = &tape.params[k];
        let params = slot.args.iter().map(|a| computed[a.0]).collect();
        let dist = Distribution::new(slot.family, params);
        let name = slot.var.to_string();

        let raw = match assignment.observed(&slot.var.name, &slot.var.indices) {
            Some(x) => {
                if !dist.support().contains(x) {
                    return Err(CompileError::InvalidInitialValue {
                        name,
                        reason: format!("{x} is outside the support of {}", slot.dist),
                    });
                }
                to_unconstrained(&dist, x)
            }
            None => match fallback.as_mut() {
                Some((strategy, rng)) => draw(strategy, &dist, rng),
                None => {
                    return Err(CompileError::InvalidInitialValue {
                        name,
                        reason: "no value supplied".to_string(),
                    })
                }
            },
        };
        if !raw.is_finite() {
            return Err(CompileError::InvalidInitialValue {
                name,
                reason: "value maps to a non-finite unconstrained point".to_string(),
            });
        }
        theta[k] = raw;
        Ok(raw)
    })?;
    Ok(theta)
}

fn draw(strategy: &InitStrategy, dist: &Distribution, rng: &mut ChaCha8Rng) -> f64 {
    match strategy {
        InitStrategy::Prior => dist
            .sample(rng)
            .filter(|x| dist.support().contains(*x))
            .map(|x| to_unconstrained(dist, x))
            .filter(|y| y.is_finite())
            .unwrap_or_else(|| rng.gen_range(-FALLBACK_RADIUS..=FALLBACK_RADIUS)),
        InitStrategy::Uniform { radius } if *radius > 0.0 => rng.gen_range(-radius..=*radius),
        InitStrategy::Uniform { .. } | InitStrategy::Zero => 0.0,
    }
}
