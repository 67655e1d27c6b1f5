use crate::data::Bindings;
use crate::distributions::Family;
use crate::error::{CompileError, CompileResult};
use crate::functions::{Arity, Function};
use crate::graph::{Definition, Graph, NodeExpr, NodeId, NodeKind, Operand, VarId};
use crate::ir::{self, BinaryOp, Expr, Index, Statement, UnaryOp, VarRef};
use crate::registry::Registry;
use crate::shapes::{resolve_shapes, Shapes};

type Env<'a> = Vec<(&'a str, i64)>;

/// One statement after loop expansion.
struct Expanded<'a> {
    stmt: &'a Statement,
    env: Env<'a>,
    lhs: VarId,
}

/// Build the dependency graph for `model` against `data`.
///
/// With `strict`, a second definition of the same identity is an error;
/// otherwise the first definition wins and a warning is recorded.
pub fn build(model: &ir::Model, data: &Bindings, registry: &Registry, strict: bool) -> CompileResult<Graph> {
    let mut expanded = Vec::new();
    expand(&model.statements, &mut Vec::new(), data, &mut expanded)?;
    tracing::debug!(statements = expanded.len(), "loops expanded");

    let shapes = resolve_shapes(expanded.iter().map(|e| &e.lhs), data, &model.declarations)?;

    let mut graph = Graph::new();
    let mut pending: Vec<(NodeId, &Expanded)> = Vec::with_capacity(expanded.len());
    for item in &expanded {
        if let Some(existing) = graph.lookup(&item.lhs) {
            if strict {
                return Err(CompileError::DuplicateDefinition(item.lhs.to_string()));
            }
            let first = pending
                .iter()
                .find(|(id, _)| *id == existing)
                .map(|(_, e)| e.stmt.to_string())
                .unwrap_or_default();
            graph.warn(format!(
                "`{}` is defined more than once; keeping `{}` and ignoring `{}`",
                item.lhs, first, item.stmt
            ));
            continue;
        }
        let id = graph.add_node(item.lhs.clone(), NodeKind::Deterministic, Definition::Data, None);
        pending.push((id, item));
    }

    let mut resolver = Resolver {
        graph: &mut graph,
        data,
        shapes: &shapes,
        registry,
    };
    for (id, item) in &pending {
        resolver.define(*id, item)?;
    }

    graph.sort()?;
    tracing::debug!(
        nodes = graph.len(),
        parameters = graph.parameters().len(),
        "dependency graph built"
    );
    Ok(graph)
}

fn expand<'a>(
    statements: &'a [Statement],
    env: &mut Env<'a>,
    data: &Bindings,
    out: &mut Vec<Expanded<'a>>,
) -> CompileResult<()> {
    for stmt in statements {
        match stmt {
            Statement::For { var, lo, hi, body } => {
                let lo = as_integer(eval_const(lo, env, data)?, &format!("lower bound of loop `{var}`"))?;
                let hi = as_integer(eval_const(hi, env, data)?, &format!("upper bound of loop `{var}`"))?;
                for value in lo..=hi {
                    env.push((var.as_str(), value));
                    expand(body, env, data, out)?;
                    env.pop();
                }
            }
            Statement::Stochastic { lhs, .. } | Statement::Logical { lhs, .. } => {
                let lhs = resolve_lhs(lhs, env, data)?;
                out.push(Expanded {
                    stmt,
                    env: env.clone(),
                    lhs,
                });
            }
        }
    }
    Ok(())
}

fn resolve_lhs(lhs: &VarRef, env: &Env, data: &Bindings) -> CompileResult<VarId> {
    let mut indices = Vec::with_capacity(lhs.indices.len());
    for idx in &lhs.indices {
        match idx {
            Index::At(e) => indices.push(as_index(eval_const(e, env, data)?, lhs)?),
            _ => {
                return Err(CompileError::Shape(format!(
                    "left-hand side `{lhs}` must name a single element"
                )))
            }
        }
    }
    Ok(VarId::new(&lhs.name, indices))
}

fn loop_value(env: &Env, name: &str) -> Option<i64> {
    env.iter().rev().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

/// Evaluate an expression that must be known at compile time: literals,
/// loop variables and observed data (including nested data indexing).
fn eval_const(expr: &Expr, env: &Env, data: &Bindings) -> CompileResult<f64> {
    match expr {
        Expr::Number { value } => Ok(*value),
        Expr::Var(var) => {
            if var.indices.is_empty() {
                if let Some(v) = loop_value(env, &var.name) {
                    return Ok(v as f64);
                }
            }
            let mut indices = Vec::with_capacity(var.indices.len());
            for idx in &var.indices {
                match idx {
                    Index::At(e) => indices.push(as_index(eval_const(e, env, data)?, var)?),
                    _ => return Err(not_constant(expr)),
                }
            }
            data.observed(&var.name, &indices).ok_or_else(|| not_constant(expr))
        }
        Expr::Unary { op: UnaryOp::Neg, arg } => Ok(-eval_const(arg, env, data)?),
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_const(lhs, env, data)?;
            let b = eval_const(rhs, env, data)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Pow => a.powf(b),
            })
        }
        Expr::Call { .. } => Err(not_constant(expr)),
    }
}

fn not_constant(expr: &Expr) -> CompileError {
    CompileError::Shape(format!(
        "`{expr}` must be computable from data and loop indices"
    ))
}

fn as_integer(v: f64, what: &str) -> CompileResult<i64> {
    if v.is_finite() && v.fract() == 0.0 {
        Ok(v as i64)
    } else {
        Err(CompileError::Shape(format!("{what} evaluated to non-integer {v}")))
    }
}

fn as_index(v: f64, var: &VarRef) -> CompileResult<usize> {
    let i = as_integer(v, &format!("index of `{var}`"))?;
    if i < 1 {
        return Err(CompileError::Shape(format!("index {i} of `{var}` is below 1")));
    }
    Ok(i as usize)
}

struct Resolver<'g> {
    graph: &'g mut Graph,
    data: &'g Bindings,
    shapes: &'g Shapes,
    registry: &'g Registry,
}

impl Resolver<'_> {
    /// Attach the statement to its node and classify it.
    fn define(&mut self, id: NodeId, item: &Expanded) -> CompileResult<()> {
        let observed = self.data.observed(&item.lhs.name, &item.lhs.indices);
        let (kind, definition) = match item.stmt {
            Statement::Stochastic { dist, args, .. } => {
                let family = self.family(dist, args.len())?;
                let args = args
                    .iter()
                    .map(|a| self.scalar(a, &item.env))
                    .collect::<CompileResult<Vec<_>>>()?;
                let kind = if observed.is_some() {
                    NodeKind::Observed
                } else if family.is_discrete() {
                    return Err(CompileError::DiscreteParameter {
                        name: item.lhs.to_string(),
                        dist: dist.clone(),
                    });
                } else {
                    NodeKind::Parameter
                };
                (
                    kind,
                    Definition::Stochastic {
                        dist: dist.clone(),
                        family,
                        args,
                    },
                )
            }
            Statement::Logical { link, expr, .. } => {
                if observed.is_some() {
                    self.graph.warn(format!(
                        "data value for `{}` overrides its logical definition `{}`",
                        item.lhs, item.stmt
                    ));
                    (NodeKind::Observed, Definition::Data)
                } else {
                    let expr = self.scalar(expr, &item.env)?;
                    (
                        NodeKind::Deterministic,
                        Definition::Logical { link: *link, expr },
                    )
                }
            }
            Statement::For { .. } => unreachable!("loops are expanded before definition"),
        };

        let mut parents = Vec::new();
        match &definition {
            Definition::Stochastic { args, .. } => args.iter().for_each(|a| a.collect_refs(&mut parents)),
            Definition::Logical { expr, .. } => expr.collect_refs(&mut parents),
            Definition::Data => {}
        }
        parents.sort();
        parents.dedup();

        let node = self.graph.node_mut(id);
        node.kind = kind;
        node.definition = definition;
        node.value = observed;
        node.parents = parents;
        Ok(())
    }

    fn family(&self, name: &str, arg_count: usize) -> CompileResult<Family> {
        let family = self
            .registry
            .distribution(name)
            .ok_or_else(|| CompileError::Parse(format!("unknown distribution `{name}`")))?;
        if family.arity() != arg_count {
            return Err(CompileError::Parse(format!(
                "`{name}` takes {} parameters, got {arg_count}",
                family.arity()
            )));
        }
        Ok(family)
    }

    /// Resolve an expression that must denote a single value.
    fn scalar(&mut self, expr: &Expr, env: &Env) -> CompileResult<NodeExpr> {
        match expr {
            Expr::Number { value } => Ok(NodeExpr::Const(*value)),
            Expr::Var(var) => {
                if var.indices.is_empty() {
                    if let Some(v) = loop_value(env, &var.name) {
                        return Ok(NodeExpr::Const(v as f64));
                    }
                }
                let mut targets = self.expand_ref(var, env)?;
                if targets.len() != 1 || var.indices.iter().any(|i| !matches!(i, Index::At(_))) {
                    return Err(CompileError::Shape(format!(
                        "`{var}` denotes {} values where one is expected",
                        targets.len()
                    )));
                }
                self.reference(targets.remove(0))
            }
            Expr::Unary { op: UnaryOp::Neg, arg } => Ok(NodeExpr::Neg(Box::new(self.scalar(arg, env)?))),
            Expr::Binary { op, lhs, rhs } => Ok(NodeExpr::Binary(
                *op,
                Box::new(self.scalar(lhs, env)?),
                Box::new(self.scalar(rhs, env)?),
            )),
            Expr::Call { func, args } => self.call(func, args, env),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], env: &Env) -> CompileResult<NodeExpr> {
        let func = self
            .registry
            .function(name)
            .ok_or_else(|| CompileError::Parse(format!("unknown function `{name}`")))?;
        match func.arity() {
            Arity::Exact(n) if n != args.len() => {
                return Err(CompileError::Parse(format!(
                    "`{name}` takes {n} arguments, got {}",
                    args.len()
                )))
            }
            Arity::Variadic if args.is_empty() => {
                return Err(CompileError::Parse(format!("`{name}` needs at least one argument")))
            }
            _ => {}
        }

        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            if func.takes_slices() {
                operands.push(self.operand(arg, env)?);
            } else {
                operands.push(Operand::Scalar(self.scalar(arg, env)?));
            }
        }

        if let Arity::Variadic = func.arity() {
            let empty = operands.iter().all(|o| matches!(o, Operand::Slice(items) if items.is_empty()));
            if empty {
                return Err(CompileError::Shape(format!("`{name}` has no elements to combine")));
            }
        }

        if let Function::Inprod = func {
            let len = |o: &Operand| match o {
                Operand::Scalar(_) => 1,
                Operand::Slice(items) => items.len(),
            };
            if len(&operands[0]) != len(&operands[1]) {
                return Err(CompileError::Shape(format!(
                    "`inprod` arguments have lengths {} and {}",
                    len(&operands[0]),
                    len(&operands[1])
                )));
            }
        }
        Ok(NodeExpr::Call(func, operands))
    }

    /// Resolve a function argument that may be a slice.
    fn operand(&mut self, expr: &Expr, env: &Env) -> CompileResult<Operand> {
        let var = match expr {
            Expr::Var(var) if !(var.indices.is_empty() && loop_value(env, &var.name).is_some()) => var,
            _ => return Ok(Operand::Scalar(self.scalar(expr, env)?)),
        };
        let is_slice = var.indices.iter().any(|i| !matches!(i, Index::At(_)))
            || (var.indices.is_empty() && self.shapes.get(&var.name).is_some_and(|s| !s.is_empty()));
        if !is_slice {
            return Ok(Operand::Scalar(self.scalar(expr, env)?));
        }
        let items = self
            .expand_ref(var, env)?
            .into_iter()
            .map(|target| self.reference(target))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Operand::Slice(items))
    }

    /// All identities a reference denotes, in row-major order. A bare name
    /// of an array denotes the whole array.
    fn expand_ref(&self, var: &VarRef, env: &Env) -> CompileResult<Vec<VarId>> {
        let shape = self
            .shapes
            .get(&var.name)
            .ok_or_else(|| CompileError::UnresolvedIdentifier(var.to_string()))?;
        let whole = var.indices.is_empty() && !shape.is_empty();
        if !whole && var.indices.len() != shape.len() {
            return Err(CompileError::Shape(format!(
                "`{var}` uses {} indices but `{}` has {} dimensions",
                var.indices.len(),
                var.name,
                shape.len()
            )));
        }

        let mut axes: Vec<Vec<usize>> = Vec::with_capacity(shape.len());
        for (dim, &extent) in shape.iter().enumerate() {
            let axis = if whole {
                (1..=extent).collect()
            } else {
                match &var.indices[dim] {
                    Index::At(e) => vec![as_index(eval_const(e, env, self.data)?, var)?],
                    Index::Range(lo, hi) => {
                        let lo = as_index(eval_const(lo, env, self.data)?, var)?;
                        let hi = as_index(eval_const(hi, env, self.data)?, var)?;
                        if lo > hi {
                            return Err(CompileError::Shape(format!("empty range {lo}:{hi} in `{var}`")));
                        }
                        (lo..=hi).collect()
                    }
                    Index::All => (1..=extent).collect(),
                }
            };
            axes.push(axis);
        }

        let mut ids = vec![Vec::new()];
        for axis in &axes {
            ids = ids
                .into_iter()
                .flat_map(|prefix| {
                    axis.iter().map(move |&i| {
                        let mut next = prefix.clone();
                        next.push(i);
                        next
                    })
                })
                .collect();
        }
        let targets: Vec<VarId> = ids.into_iter().map(|idx| VarId::new(&var.name, idx)).collect();
        for target in &targets {
            self.shapes.check(target)?;
        }
        Ok(targets)
    }

    /// Node for `target`, creating a data leaf when it is observed but has no
    /// defining statement.
    fn reference(&mut self, target: VarId) -> CompileResult<NodeExpr> {
        if let Some(id) = self.graph.lookup(&target) {
            return Ok(NodeExpr::Node(id));
        }
        match self.data.observed(&target.name, &target.indices) {
            Some(value) => {
                let id = self
                    .graph
                    .add_node(target, NodeKind::Observed, Definition::Data, Some(value));
                Ok(NodeExpr::Node(id))
            }
            None => {
                let missing = self.data.get(&target.name).is_some();
                Err(CompileError::UnresolvedIdentifier(if missing {
                    format!("{target} (missing in data and not defined)")
                } else {
                    target.to_string()
                }))
            }
        }
    }
}
