use crate::distributions::Family;
use crate::error::{CompileError, CompileResult};
use crate::functions::Function;
use crate::ir::{BinaryOp, Link};
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

/// Identity of a scalar variable: name plus 1-based indices (empty for scalars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId {
    pub name: String,
    pub indices: Vec<usize>,
}

impl VarId {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            indices: Vec::new(),
        }
    }

    pub fn new(name: &str, indices: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            indices,
        }
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.indices.is_empty() {
            return write!(f, "{}", self.name);
        }
        let idx: Vec<String> = self.indices.iter().map(|i| i.to_string()).collect();
        write!(f, "{}[{}]", self.name, idx.join(","))
    }
}

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Value fixed by data. Scored when it also has a stochastic definition.
    Observed,
    /// Unobserved stochastic node; one slot of the parameter vector.
    Parameter,
    /// Computed from its parents, contributes no density term.
    Deterministic,
}

/// Right-hand-side expression with every variable reference resolved to a node.
#[derive(Debug, Clone)]
pub enum NodeExpr {
    Const(f64),
    Node(NodeId),
    Neg(Box<NodeExpr>),
    Binary(BinaryOp, Box<NodeExpr>, Box<NodeExpr>),
    Call(Function, Vec<Operand>),
}

/// Function argument: a scalar, or the elements of a slice such as `x[i, ]`.
#[derive(Debug, Clone)]
pub enum Operand {
    Scalar(NodeExpr),
    Slice(Vec<NodeExpr>),
}

impl NodeExpr {
    pub fn collect_refs(&self, out: &mut Vec<NodeId>) {
        match self {
            NodeExpr::Const(_) => {}
            NodeExpr::Node(id) => out.push(*id),
            NodeExpr::Neg(a) => a.collect_refs(out),
            NodeExpr::Binary(_, a, b) => {
                a.collect_refs(out);
                b.collect_refs(out);
            }
            NodeExpr::Call(_, args) => {
                for arg in args {
                    match arg {
                        Operand::Scalar(e) => e.collect_refs(out),
                        Operand::Slice(items) => items.iter().for_each(|e| e.collect_refs(out)),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Definition {
    /// Pure data leaf with no defining statement.
    Data,
    Stochastic {
        dist: String,
        family: Family,
        args: Vec<NodeExpr>,
    },
    Logical {
        link: Option<Link>,
        expr: NodeExpr,
    },
}

/// A single scalar variable in the dependency graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub var: VarId,
    pub kind: NodeKind,
    pub definition: Definition,
    /// Observed value for `Observed` nodes.
    pub value: Option<f64>,
    /// Nodes this one reads, sorted and deduplicated.
    pub parents: Vec<NodeId>,
}

/// Dependency graph of a model.
///
/// Nodes live in an arena indexed by [`NodeId`]; edges are the parent lists.
/// The structure is frozen once [`Graph::sort`] has run, after which `order`
/// lists every node after all of its parents.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: IndexMap<VarId, NodeId>,
    order: Vec<NodeId>,
    parameters: Vec<NodeId>,
    warnings: Vec<String>,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_node(
        &mut self,
        var: VarId,
        kind: NodeKind,
        definition: Definition,
        value: Option<f64>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(var.clone(), id);
        self.nodes.push(Node {
            id,
            var,
            kind,
            definition,
            value,
            parents: Vec::new(),
        });
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub(crate) fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn lookup(&self, var: &VarId) -> Option<NodeId> {
        self.index.get(var).copied()
    }

    /// Topological order: every node appears after its parents.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Parameter nodes in parameter-vector order.
    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn parameter_names(&self) -> Vec<VarId> {
        self.parameters
            .iter()
            .map(|id| self.nodes[id.0].var.clone())
            .collect()
    }

    /// Model-authoring problems noticed while building (duplicate
    /// definitions, data overriding logical nodes).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.parents.contains(&id))
            .map(|n| n.id)
            .collect()
    }

    /// Order nodes topologically (Kahn's algorithm, lowest id first among
    /// ready nodes, so the result follows statement order where it can) and
    /// fix the parameter ordering.
    pub(crate) fn sort(&mut self) -> CompileResult<()> {
        let n = self.nodes.len();
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|node| node.parents.len()).collect();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for node in &self.nodes {
            for p in &node.parents {
                children[p.0].push(node.id.0);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(NodeId(i));
            for &c in &children[i] {
                in_degree[c] -= 1;
                if in_degree[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
            return Err(CompileError::CyclicDependency {
                path: self.trace_cycle(&stuck),
            });
        }

        self.parameters = order
            .iter()
            .copied()
            .filter(|id| self.nodes[id.0].kind == NodeKind::Parameter)
            .collect();
        self.order = order;
        Ok(())
    }

    /// Walk parent edges inside the unsorted remainder until a node repeats.
    /// Every such node has an unsorted parent, so the walk always closes.
    /// Returns e.g. `[a, b, a]`: `a` depends on `b`, which depends on `a`.
    fn trace_cycle(&self, stuck: &[usize]) -> Vec<String> {
        let stuck_set: HashSet<usize> = stuck.iter().copied().collect();
        let mut path: Vec<usize> = Vec::new();
        let mut current = match stuck.first() {
            Some(&s) => s,
            None => return Vec::new(),
        };
        loop {
            if let Some(pos) = path.iter().position(|&p| p == current) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|&i| self.nodes[i].var.to_string())
                    .collect();
                cycle.push(self.nodes[current].var.to_string());
                return cycle;
            }
            path.push(current);
            match self.nodes[current]
                .parents
                .iter()
                .find(|p| stuck_set.contains(&p.0))
            {
                Some(p) => current = p.0,
                None => {
                    return path
                        .iter()
                        .map(|&i| self.nodes[i].var.to_string())
                        .collect()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logical(graph: &mut Graph, name: &str) -> NodeId {
        graph.add_node(
            VarId::scalar(name),
            NodeKind::Deterministic,
            Definition::Logical {
                link: None,
                expr: NodeExpr::Const(0.0),
            },
            None,
        )
    }

    #[test]
    fn test_sort_places_parents_first() {
        let mut g = Graph::new();
        let c = logical(&mut g, "c");
        let a = logical(&mut g, "a");
        let b = logical(&mut g, "b");
        g.node_mut(c).parents = vec![b];
        g.node_mut(b).parents = vec![a];
        g.sort().unwrap();
        assert_eq!(g.order(), &[a, b, c]);
        assert_eq!(g.children(a), vec![b]);
    }

    #[test]
    fn test_cycle_is_traced() {
        let mut g = Graph::new();
        let a = logical(&mut g, "a");
        let b = logical(&mut g, "b");
        let c = logical(&mut g, "c");
        g.node_mut(a).parents = vec![c];
        g.node_mut(b).parents = vec![a];
        g.node_mut(c).parents = vec![b];
        match g.sort() {
            Err(CompileError::CyclicDependency { path }) => {
                assert_eq!(path, vec!["a", "c", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_var_id_display() {
        assert_eq!(VarId::scalar("mu").to_string(), "mu");
        assert_eq!(VarId::new("x", vec![2, 3]).to_string(), "x[2,3]");
    }
}
