use crate::error::EvalError;
use crate::tape::{Bounds, Op, Tape, TapeId};
use crate::transforms::{Transform, TransformPartials};
use std::convert::Infallible;

/// Forward-evaluate every op. `param` supplies the raw value of parameter
/// `k` given the values computed so far (its arguments and bounds are
/// always already available).
pub fn forward_with<E>(
    tape: &Tape,
    values: &mut Vec<f64>,
    mut param: impl FnMut(usize, &[f64]) -> Result<f64, E>,
) -> Result<(), E> {
    values.clear();
    values.reserve(tape.nodes.len());
    let mut args: Vec<f64> = Vec::new();

    for node in &tape.nodes {
        let v = |id: &TapeId| values[id.0];
        let val = match &node.op {
            Op::Param(k) => param(*k, values.as_slice())?,
            Op::Constant(c) => *c,
            Op::Add(a, b) => v(a) + v(b),
            Op::Sub(a, b) => v(a) - v(b),
            Op::Mul(a, b) => v(a) * v(b),
            Op::Div(a, b) => v(a) / v(b),
            Op::Neg(a) => -v(a),
            Op::Exp(a) => v(a).exp(),
            Op::Log(a) => v(a).ln(),
            Op::Pow(a, b) => v(a).powf(v(b)),
            Op::Unary(f, a) => f.apply(v(a)),
            Op::Min(a, b) => v(a).min(v(b)),
            Op::Max(a, b) => v(a).max(v(b)),
            Op::Equals(a, b) => {
                if v(a) == v(b) {
                    1.0
                } else {
                    0.0
                }
            }
            Op::Select {
                cond,
                then,
                otherwise,
            } => {
                if v(cond) != 0.0 {
                    v(then)
                } else {
                    v(otherwise)
                }
            }
            Op::Sum(items) => items.iter().map(v).sum(),
            Op::Custom { func, args: ids } => {
                args.clear();
                args.extend(ids.iter().map(v));
                (func.eval)(&args)
            }
            Op::Constrain { raw, bounds } => transform(*bounds, values.as_slice()).to_constrained(v(raw)).0,
            Op::LogJacobian { raw, bounds } => transform(*bounds, values.as_slice()).to_constrained(v(raw)).1,
            Op::LogPdf { family, x, args: ids } => {
                args.clear();
                args.extend(ids.iter().map(v));
                family.log_pdf(v(x), &args)
            }
        };
        values.push(val);
    }
    Ok(())
}

/// Forward pass with `theta` as the raw parameter values.
pub fn forward(tape: &Tape, theta: &[f64], values: &mut Vec<f64>) {
    let result: Result<(), Infallible> = forward_with(tape, values, |k, _| Ok(theta[k]));
    if let Err(never) = result {
        match never {}
    }
}

/// Sum of all log-density terms.
pub fn total(tape: &Tape, values: &[f64]) -> f64 {
    tape.logp_terms.iter().map(|id| values[id.0]).sum()
}

/// Reverse pass: accumulate `d total / d theta` into `grad`.
///
/// Ops whose adjoint is zero are skipped, so values on branches that do not
/// reach the total (including NaNs there) never touch the gradient.
pub fn reverse(tape: &Tape, values: &[f64], adjoints: &mut Vec<f64>, grad: &mut [f64]) {
    adjoints.clear();
    adjoints.resize(tape.nodes.len(), 0.0);
    grad.iter_mut().for_each(|g| *g = 0.0);
    for id in &tape.logp_terms {
        adjoints[id.0] += 1.0;
    }

    let mut args: Vec<f64> = Vec::new();
    let mut partials: Vec<f64> = Vec::new();

    for node in tape.nodes.iter().rev() {
        let adj = adjoints[node.id.0];
        if adj == 0.0 {
            continue;
        }
        let y = values[node.id.0];
        let v = |id: &TapeId| values[id.0];

        match &node.op {
            Op::Param(k) => grad[*k] += adj,
            Op::Constant(_) | Op::Equals(..) => {}
            Op::Add(a, b) => {
                adjoints[a.0] += adj;
                adjoints[b.0] += adj;
            }
            Op::Sub(a, b) => {
                adjoints[a.0] += adj;
                adjoints[b.0] -= adj;
            }
            Op::Mul(a, b) => {
                let (va, vb) = (v(a), v(b));
                adjoints[a.0] += adj * vb;
                adjoints[b.0] += adj * va;
            }
            Op::Div(a, b) => {
                let vb = v(b);
                adjoints[a.0] += adj / vb;
                adjoints[b.0] -= adj * y / vb;
            }
            Op::Neg(a) => adjoints[a.0] -= adj,
            Op::Exp(a) => adjoints[a.0] += adj * y,
            Op::Log(a) => adjoints[a.0] += adj / v(a),
            Op::Pow(a, b) => {
                let (va, vb) = (v(a), v(b));
                adjoints[a.0] += adj * vb * va.powf(vb - 1.0);
                // d/db is only defined for a positive base.
                if va > 0.0 {
                    adjoints[b.0] += adj * y * va.ln();
                }
            }
            Op::Unary(f, a) => adjoints[a.0] += adj * f.derivative(v(a), y),
            Op::Min(a, b) => {
                let target = if v(a) <= v(b) { a } else { b };
                adjoints[target.0] += adj;
            }
            Op::Max(a, b) => {
                let target = if v(a) >= v(b) { a } else { b };
                adjoints[target.0] += adj;
            }
            Op::Select {
                cond,
                then,
                otherwise,
            } => {
                let target = if v(cond) != 0.0 { then } else { otherwise };
                adjoints[target.0] += adj;
            }
            Op::Sum(items) => {
                for item in items {
                    adjoints[item.0] += adj;
                }
            }
            Op::Custom { func, args: ids } => {
                args.clear();
                args.extend(ids.iter().map(v));
                partials.clear();
                partials.resize(ids.len(), 0.0);
                func.gradient(&args, &mut partials);
                for (id, d) in ids.iter().zip(&partials) {
                    adjoints[id.0] += adj * d;
                }
            }
            Op::Constrain { raw, bounds } => {
                let p = transform(*bounds, values).value_partials(v(raw));
                push_partials(adjoints, adj, *raw, *bounds, p);
            }
            Op::LogJacobian { raw, bounds } => {
                let p = transform(*bounds, values).log_jacobian_partials(v(raw));
                push_partials(adjoints, adj, *raw, *bounds, p);
            }
            Op::LogPdf { family, x, args: ids } => {
                args.clear();
                args.extend(ids.iter().map(v));
                partials.clear();
                partials.resize(ids.len(), 0.0);
                let dx = family.grad_log_pdf(v(x), &args, &mut partials);
                adjoints[x.0] += adj * dx;
                for (id, d) in ids.iter().zip(&partials) {
                    adjoints[id.0] += adj * d;
                }
            }
        }
    }
}

fn transform(bounds: Bounds, values: &[f64]) -> Transform {
    match bounds {
        Bounds::Positive => Transform::Log,
        Bounds::Interval { lower, upper } => Transform::ScaledLogit {
            lower: values[lower.0],
            upper: values[upper.0],
        },
    }
}

fn push_partials(adjoints: &mut [f64], adj: f64, raw: TapeId, bounds: Bounds, p: TransformPartials) {
    adjoints[raw.0] += adj * p.d_raw;
    if let Bounds::Interval { lower, upper } = bounds {
        adjoints[lower.0] += adj * p.d_lower;
        adjoints[upper.0] += adj * p.d_upper;
    }
}

/// Mark every op whose value is NaN or depends on a NaN it actually uses.
///
/// `min`, `max`, `step` and comparisons can turn a NaN input into an
/// ordinary number, so the value alone is not enough. `Select` only
/// inherits from its condition and the branch it takes.
pub fn mark_poisoned(tape: &Tape, values: &[f64], poisoned: &mut Vec<bool>) {
    poisoned.clear();
    poisoned.reserve(tape.nodes.len());
    for node in &tape.nodes {
        let p = |id: &TapeId| poisoned[id.0];
        let inherited = match &node.op {
            Op::Param(_) | Op::Constant(_) => false,
            Op::Neg(a) | Op::Exp(a) | Op::Log(a) | Op::Unary(_, a) => p(a),
            Op::Add(a, b)
            | Op::Sub(a, b)
            | Op::Mul(a, b)
            | Op::Div(a, b)
            | Op::Pow(a, b)
            | Op::Min(a, b)
            | Op::Max(a, b)
            | Op::Equals(a, b) => p(a) || p(b),
            Op::Select {
                cond,
                then,
                otherwise,
            } => p(cond) || if values[cond.0] != 0.0 { p(then) } else { p(otherwise) },
            Op::Sum(ids) | Op::Custom { args: ids, .. } => ids.iter().any(p),
            Op::Constrain { raw, bounds } | Op::LogJacobian { raw, bounds } => {
                p(raw)
                    || match bounds {
                        Bounds::Positive => false,
                        Bounds::Interval { lower, upper } => p(lower) || p(upper),
                    }
            }
            Op::LogPdf { x, args, .. } => p(x) || args.iter().any(p),
        };
        poisoned.push(inherited || values[node.id.0].is_nan());
    }
}

/// Name of the first log-density term or reported variable that is poisoned.
pub fn domain_error(tape: &Tape, poisoned: &[bool]) -> Option<String> {
    let term = tape.logp_terms.iter().find(|id| poisoned[id.0]).map(|id| {
        let node = &tape.nodes[id.0];
        node.name.clone().unwrap_or_else(|| format!("op {}", id.0))
    });
    term.or_else(|| {
        tape.outputs
            .iter()
            .find(|(_, id)| poisoned[id.0])
            .map(|(var, _)| var.to_string())
    })
}

/// Reusable scratch space for repeated evaluation of one tape.
///
/// Holds the per-op values and adjoints so a sampler calling `compute` in a
/// loop does not allocate. One evaluator per thread; the tape is shared.
#[derive(Debug, Clone)]
pub struct Evaluator {
    values: Vec<f64>,
    adjoints: Vec<f64>,
    poisoned: Vec<bool>,
    pub grad: Vec<f64>,
    pub total_logp: f64,
}

impl Evaluator {
    pub fn new(tape: &Tape) -> Self {
        Self {
            values: Vec::with_capacity(tape.nodes.len()),
            adjoints: Vec::with_capacity(tape.nodes.len()),
            poisoned: Vec::with_capacity(tape.nodes.len()),
            grad: vec![0.0; tape.param_count()],
            total_logp: 0.0,
        }
    }

    fn check_dimension(tape: &Tape, theta: &[f64]) -> Result<(), EvalError> {
        if theta.len() != tape.param_count() {
            return Err(EvalError::DimensionMismatch {
                expected: tape.param_count(),
                found: theta.len(),
            });
        }
        Ok(())
    }

    /// Forward pass only; returns the value of every op.
    pub fn evaluate(&mut self, tape: &Tape, theta: &[f64]) -> Result<&[f64], EvalError> {
        Self::check_dimension(tape, theta)?;
        forward(tape, theta, &mut self.values);
        Ok(&self.values)
    }

    /// Log-density only. Domain errors are reported, not mapped.
    pub fn try_log_density(&mut self, tape: &Tape, theta: &[f64]) -> Result<f64, EvalError> {
        self.evaluate(tape, theta)?;
        mark_poisoned(tape, &self.values, &mut self.poisoned);
        if let Some(node) = domain_error(tape, &self.poisoned) {
            return Err(EvalError::DomainEvaluation { node });
        }
        self.total_logp = total(tape, &self.values);
        Ok(self.total_logp)
    }

    /// Log-density and gradient into `total_logp` and `grad`.
    ///
    /// A domain error or a `-inf` total leaves `total_logp = -inf` and an
    /// all-zero gradient.
    pub fn compute(&mut self, tape: &Tape, theta: &[f64]) -> Result<(), EvalError> {
        match self.try_log_density(tape, theta) {
            Ok(lp) if lp != f64::NEG_INFINITY => {
                reverse(tape, &self.values, &mut self.adjoints, &mut self.grad);
            }
            Ok(_) | Err(EvalError::DomainEvaluation { .. }) => {
                self.total_logp = f64::NEG_INFINITY;
                self.grad.iter_mut().for_each(|g| *g = 0.0);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
