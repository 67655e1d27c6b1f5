use crate::distributions::Family;
use crate::functions::{CustomFunction, UnaryFn};
use crate::graph::{NodeId, VarId};

/// Position of an op on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapeId(pub usize);

/// Constraint applied to a raw parameter.
#[derive(Debug, Clone, Copy)]
pub enum Bounds {
    Positive,
    /// Open interval whose ends are themselves tape values.
    Interval { lower: TapeId, upper: TapeId },
}

/// Scalar operations on the tape.
#[derive(Debug, Clone)]
pub enum Op {
    /// Unconstrained parameter (index into theta).
    Param(usize),
    Constant(f64),
    Add(TapeId, TapeId),
    Sub(TapeId, TapeId),
    Mul(TapeId, TapeId),
    Div(TapeId, TapeId),
    Neg(TapeId),
    Exp(TapeId),
    Log(TapeId),
    Pow(TapeId, TapeId),
    Unary(UnaryFn, TapeId),
    Min(TapeId, TapeId),
    Max(TapeId, TapeId),
    Equals(TapeId, TapeId),
    /// `then` when `cond != 0`, otherwise `otherwise`.
    Select {
        cond: TapeId,
        then: TapeId,
        otherwise: TapeId,
    },
    Sum(Vec<TapeId>),
    Custom {
        func: CustomFunction,
        args: Vec<TapeId>,
    },
    /// Constrained value of a raw parameter.
    Constrain { raw: TapeId, bounds: Bounds },
    /// `log|dx/dy|` of the matching `Constrain`.
    LogJacobian { raw: TapeId, bounds: Bounds },
    /// `log p(x | args)`.
    LogPdf {
        family: Family,
        x: TapeId,
        args: Vec<TapeId>,
    },
}

#[derive(Debug, Clone)]
pub struct TapeNode {
    pub id: TapeId,
    pub op: Op,
    pub name: Option<String>,
}

/// Where a parameter lives on the tape.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub var: VarId,
    pub node: NodeId,
    pub family: Family,
    /// Distribution name as written in the model.
    pub dist: String,
    /// Distribution arguments, evaluated before the parameter.
    pub args: Vec<TapeId>,
    pub bounds: Option<Bounds>,
    pub raw: TapeId,
    /// Constrained value (same as `raw` for real support).
    pub value: TapeId,
}

/// The lowered model: scalar ops in evaluation order, each referring only to
/// earlier ops. Built once per compile and shared read-only by every
/// evaluator.
#[derive(Debug, Clone, Default)]
pub struct Tape {
    pub nodes: Vec<TapeNode>,
    pub params: Vec<ParamSlot>,
    /// Ops summed into the log-density.
    pub logp_terms: Vec<TapeId>,
    /// Reported variables (parameters and deterministic nodes) in graph order.
    pub outputs: Vec<(VarId, TapeId)>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn push(&mut self, op: Op, name: Option<String>) -> TapeId {
        let id = TapeId(self.nodes.len());
        self.nodes.push(TapeNode { id, op, name });
        id
    }

    /// Append a raw parameter; the caller registers its [`ParamSlot`].
    pub fn add_param(&mut self, name: &str) -> (usize, TapeId) {
        let k = self.params.len();
        (k, self.push(Op::Param(k), Some(name.to_string())))
    }

    pub fn add_constant(&mut self, value: f64) -> TapeId {
        self.push(Op::Constant(value), None)
    }

    pub fn add(&mut self, a: TapeId, b: TapeId) -> TapeId {
        self.push(Op::Add(a, b), None)
    }

    pub fn sub(&mut self, a: TapeId, b: TapeId) -> TapeId {
        self.push(Op::Sub(a, b), None)
    }

    pub fn mul(&mut self, a: TapeId, b: TapeId) -> TapeId {
        self.push(Op::Mul(a, b), None)
    }

    pub fn div(&mut self, a: TapeId, b: TapeId) -> TapeId {
        self.push(Op::Div(a, b), None)
    }

    pub fn neg(&mut self, a: TapeId) -> TapeId {
        self.push(Op::Neg(a), None)
    }

    pub fn exp(&mut self, a: TapeId) -> TapeId {
        self.push(Op::Exp(a), None)
    }

    pub fn log(&mut self, a: TapeId) -> TapeId {
        self.push(Op::Log(a), None)
    }

    pub fn pow(&mut self, a: TapeId, b: TapeId) -> TapeId {
        self.push(Op::Pow(a, b), None)
    }

    pub fn unary(&mut self, f: UnaryFn, a: TapeId) -> TapeId {
        self.push(Op::Unary(f, a), None)
    }

    pub fn sum(&mut self, items: Vec<TapeId>) -> TapeId {
        self.push(Op::Sum(items), None)
    }

    /// Record a log-density term for `name`.
    pub fn log_pdf(&mut self, name: &str, family: Family, x: TapeId, args: Vec<TapeId>) -> TapeId {
        let id = self.push(Op::LogPdf { family, x, args }, Some(name.to_string()));
        self.logp_terms.push(id);
        id
    }

    /// Record the log-Jacobian term of a constrained parameter.
    pub fn log_jacobian(&mut self, name: &str, raw: TapeId, bounds: Bounds) -> TapeId {
        let id = self.push(Op::LogJacobian { raw, bounds }, Some(name.to_string()));
        self.logp_terms.push(id);
        id
    }

    pub fn name_of(&self, id: TapeId) -> Option<&str> {
        self.nodes[id.0].name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ops_reference_earlier_ids() {
        let mut t = Tape::new();
        let (k, p) = t.add_param("mu");
        let c = t.add_constant(2.0);
        let s = t.mul(p, c);
        let x = t.add_constant(0.5);
        let term = t.log_pdf("y", Family::Normal, x, vec![s, c]);
        assert_eq!(k, 0);
        assert_eq!(t.len(), 5);
        assert_eq!(t.logp_terms, vec![term]);
        assert_eq!(t.name_of(term), Some("y"));
        assert_eq!(t.name_of(c), None);
    }
}
