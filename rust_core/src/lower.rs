use crate::distributions::SupportKind;
use crate::error::{CompileError, CompileResult};
use crate::functions::{Function, UnaryFn};
use crate::graph::{Definition, Graph, Node, NodeExpr, NodeKind, Operand};
use crate::ir::{BinaryOp, Link};
use crate::tape::{Bounds, Op, ParamSlot, Tape, TapeId};

pub fn lower(graph: &Graph) -> CompileResult<Tape> {
    let mut lowering = Lowering {
        graph,
        tape: Tape::new(),
        slots: vec![None; graph.len()],
    };
    for &id in graph.order() {
        let node = graph.node(id);
        let slot = lowering.lower_node(node)?;
        lowering.slots[id.0] = Some(slot);
    }
    tracing::debug!(
        ops = lowering.tape.len(),
        terms = lowering.tape.logp_terms.len(),
        "tape lowered"
    );
    Ok(lowering.tape)
}

struct Lowering<'g> {
    graph: &'g Graph,
    tape: Tape,
    slots: Vec<Option<TapeId>>,
}

impl Lowering<'_> {
    fn lower_node(&mut self, node: &Node) -> CompileResult<TapeId> {
        let name = node.var.to_string();
        match (&node.definition, node.kind) {
            (Definition::Stochastic { family, args, .. }, NodeKind::Observed) => {
                let x = self.constant(node)?;
                let args = self.lower_all(args)?;
                self.tape.log_pdf(&name, *family, x, args);
                Ok(x)
            }
            (Definition::Stochastic { family, args, dist }, NodeKind::Parameter) => {
                let args = self.lower_all(args)?;
                let bounds = match family.support_kind() {
                    SupportKind::Real => None,
                    SupportKind::Positive => Some(Bounds::Positive),
                    SupportKind::UnitInterval => Some(Bounds::Interval {
                        lower: self.tape.add_constant(0.0),
                        upper: self.tape.add_constant(1.0),
                    }),
                    SupportKind::ParamInterval { lower, upper } => Some(Bounds::Interval {
                        lower: args[lower],
                        upper: args[upper],
                    }),
                    SupportKind::Discrete => {
                        return Err(CompileError::DiscreteParameter {
                            name,
                            dist: dist.clone(),
                        })
                    }
                };
                let (_, raw) = self.tape.add_param(&name);
                let value = match bounds {
                    Some(bounds) => {
                        let value = self.tape.push(Op::Constrain { raw, bounds }, Some(name.clone()));
                        self.tape.log_jacobian(&name, raw, bounds);
                        value
                    }
                    None => raw,
                };
                self.tape.params.push(ParamSlot {
                    var: node.var.clone(),
                    node: node.id,
                    family: *family,
                    dist: dist.clone(),
                    args: args.clone(),
                    bounds,
                    raw,
                    value,
                });
                self.tape.log_pdf(&name, *family, value, args);
                self.tape.outputs.push((node.var.clone(), value));
                Ok(value)
            }
            (Definition::Logical { link, expr }, NodeKind::Deterministic) => {
                let value = self.lower_expr(expr)?;
                let value = match link {
                    None => value,
                    Some(Link::Log) => self.tape.exp(value),
                    Some(Link::Logit) => self.tape.unary(UnaryFn::Logistic, value),
                    Some(Link::Probit) => self.tape.unary(UnaryFn::Phi, value),
                    Some(Link::Cloglog) => self.tape.unary(UnaryFn::InvCloglog, value),
                };
                self.tape.outputs.push((node.var.clone(), value));
                Ok(value)
            }
            _ => self.constant(node),
        }
    }

    fn constant(&mut self, node: &Node) -> CompileResult<TapeId> {
        let value = node
            .value
            .ok_or_else(|| CompileError::UnresolvedIdentifier(node.var.to_string()))?;
        Ok(self.tape.push(Op::Constant(value), Some(node.var.to_string())))
    }

    fn lower_all(&mut self, exprs: &[NodeExpr]) -> CompileResult<Vec<TapeId>> {
        exprs.iter().map(|e| self.lower_expr(e)).collect()
    }

    fn lower_expr(&mut self, expr: &NodeExpr) -> CompileResult<TapeId> {
        Ok(match expr {
            NodeExpr::Const(v) => self.tape.add_constant(*v),
            NodeExpr::Node(id) => self.slots[id.0]
                .ok_or_else(|| CompileError::UnresolvedIdentifier(self.graph.node(*id).var.to_string()))?,
            NodeExpr::Neg(a) => {
                let a = self.lower_expr(a)?;
                self.tape.neg(a)
            }
            NodeExpr::Binary(op, a, b) => {
                let a = self.lower_expr(a)?;
                let b = self.lower_expr(b)?;
                match op {
                    BinaryOp::Add => self.tape.add(a, b),
                    BinaryOp::Sub => self.tape.sub(a, b),
                    BinaryOp::Mul => self.tape.mul(a, b),
                    BinaryOp::Div => self.tape.div(a, b),
                    BinaryOp::Pow => self.tape.pow(a, b),
                }
            }
            NodeExpr::Call(func, operands) => self.lower_call(func, operands)?,
        })
    }

    fn lower_call(&mut self, func: &Function, operands: &[Operand]) -> CompileResult<TapeId> {
        let mut flat: Vec<Vec<TapeId>> = Vec::with_capacity(operands.len());
        for operand in operands {
            flat.push(match operand {
                Operand::Scalar(e) => vec![self.lower_expr(e)?],
                Operand::Slice(items) => self.lower_all(items)?,
            });
        }
        // Single-valued functions take exactly one id per operand.
        let arg = |i: usize| flat[i][0];

        Ok(match func {
            Function::Exp => self.tape.exp(arg(0)),
            Function::Log => self.tape.log(arg(0)),
            Function::Pow => self.tape.pow(arg(0), arg(1)),
            Function::Unary(f) => self.tape.unary(*f, arg(0)),
            Function::Min => self.tape.push(Op::Min(arg(0), arg(1)), None),
            Function::Max => self.tape.push(Op::Max(arg(0), arg(1)), None),
            Function::Equals => self.tape.push(Op::Equals(arg(0), arg(1)), None),
            Function::IfElse => self.tape.push(
                Op::Select {
                    cond: arg(0),
                    then: arg(1),
                    otherwise: arg(2),
                },
                None,
            ),
            Function::Sum => {
                let items = flat.concat();
                self.tape.sum(items)
            }
            Function::Mean => {
                let items = flat.concat();
                let n = self.tape.add_constant(items.len() as f64);
                let total = self.tape.sum(items);
                self.tape.div(total, n)
            }
            Function::Inprod => {
                let products = flat[0]
                    .iter()
                    .zip(&flat[1])
                    .map(|(&a, &b)| self.tape.mul(a, b))
                    .collect();
                self.tape.sum(products)
            }
            Function::Custom(c) => {
                let args = flat.iter().map(|ids| ids[0]).collect();
                self.tape.push(Op::Custom { func: *c, args }, None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::data::Bindings;
    use crate::ir::{Expr as E, Model, Statement as S, VarRef as V};
    use crate::registry::Registry;

    fn lowered(model: &Model, data: &Bindings) -> Tape {
        let graph = build(model, data, &Registry::with_builtins(), false).unwrap();
        lower(&graph).unwrap()
    }

    #[test]
    fn test_parameters_get_constraints_and_jacobians() {
        let model = Model::new(vec![
            S::stochastic(V::scalar("mu"), "dnorm", vec![E::num(0.0), E::num(1.0)]),
            S::stochastic(V::scalar("s"), "dgamma", vec![E::num(2.0), E::num(1.0)]),
            S::stochastic(V::scalar("u"), "dunif", vec![E::var("mu"), E::num(5.0)]),
            S::stochastic(V::scalar("y"), "dnorm", vec![E::var("mu"), E::var("s")]),
        ]);
        let data = Bindings::new().scalar("y", 1.0);
        let tape = lowered(&model, &data);

        assert_eq!(tape.param_count(), 3);
        assert!(tape.params[0].bounds.is_none());
        assert!(matches!(tape.params[1].bounds, Some(Bounds::Positive)));
        match tape.params[2].bounds {
            Some(Bounds::Interval { lower, .. }) => assert_eq!(lower, tape.params[0].value),
            other => panic!("expected interval, got {other:?}"),
        }
        // 3 priors + 1 likelihood + 2 Jacobians
        assert_eq!(tape.logp_terms.len(), 6);
        assert_eq!(tape.outputs.len(), 3);

        for node in &tape.nodes {
            let refs: Vec<TapeId> = match &node.op {
                Op::LogPdf { x, args, .. } => std::iter::once(*x).chain(args.iter().copied()).collect(),
                Op::Constrain { raw, .. } | Op::LogJacobian { raw, .. } => vec![*raw],
                _ => Vec::new(),
            };
            assert!(refs.iter().all(|r| r.0 < node.id.0));
        }
    }

    #[test]
    fn test_links_and_aggregates_lower_to_ops() {
        let model = Model::new(vec![
            S::for_loop(
                "j",
                E::num(1.0),
                E::num(2.0),
                vec![S::stochastic(V::indexed("b", vec![E::var("j")]), "dnorm", vec![E::num(0.0), E::num(1.0)])],
            ),
            S::linked(Link::Logit, V::scalar("p"), E::call("mean", vec![E::var("b")])),
        ]);
        let tape = lowered(&model, &Bindings::new());
        let (_, p) = tape.outputs.iter().find(|(v, _)| v.name == "p").unwrap();
        assert!(matches!(tape.nodes[p.0].op, Op::Unary(UnaryFn::Logistic, _)));
        assert!(tape.nodes.iter().any(|n| matches!(&n.op, Op::Sum(items) if items.len() == 2)));
    }
}
