//! Intermediate representation handed over by the front-end parser.
//!
//! The IR keeps loops and symbolic indices; loop expansion and index
//! resolution happen in [`crate::builder`]. On the wire it is a JSON document:
//!
//! ```json
//! { "statements": [
//!     { "kind": "stochastic",
//!       "lhs": { "name": "mu" },
//!       "dist": "dnorm",
//!       "args": [ { "type": "number", "value": 0.0 },
//!                 { "type": "number", "value": 0.01 } ] } ] }
//! ```

use crate::error::{CompileError, CompileResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A complete model: statements plus optional explicit array shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub statements: Vec<Statement>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub declarations: IndexMap<String, Vec<usize>>,
}

impl Model {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            statements,
            declarations: IndexMap::new(),
        }
    }

    /// Declare the shape of an array up front instead of inferring it.
    pub fn declare(mut self, name: &str, shape: Vec<usize>) -> Self {
        self.declarations.insert(name.to_string(), shape);
        self
    }

    pub fn from_json(text: &str) -> CompileResult<Self> {
        serde_json::from_str(text).map_err(|e| CompileError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // Serialising plain enums and maps with string keys cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// `lhs ~ dist(args)`
    Stochastic {
        lhs: VarRef,
        dist: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// `lhs <- expr`, or `link(lhs) <- expr` when `link` is set.
    Logical {
        lhs: VarRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<Link>,
        expr: Expr,
    },
    /// `for (var in lo:hi) { body }`, bounds inclusive.
    For {
        var: String,
        lo: Expr,
        hi: Expr,
        body: Vec<Statement>,
    },
}

impl Statement {
    pub fn stochastic(lhs: VarRef, dist: &str, args: Vec<Expr>) -> Self {
        Statement::Stochastic {
            lhs,
            dist: dist.to_string(),
            args,
        }
    }

    pub fn logical(lhs: VarRef, expr: Expr) -> Self {
        Statement::Logical {
            lhs,
            link: None,
            expr,
        }
    }

    pub fn linked(link: Link, lhs: VarRef, expr: Expr) -> Self {
        Statement::Logical {
            lhs,
            link: Some(link),
            expr,
        }
    }

    pub fn for_loop(var: &str, lo: Expr, hi: Expr, body: Vec<Statement>) -> Self {
        Statement::For {
            var: var.to_string(),
            lo,
            hi,
            body,
        }
    }
}

/// Link functions allowed on the left of a logical statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Log,
    Logit,
    Probit,
    Cloglog,
}

/// A (possibly indexed) variable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<Index>,
}

impl VarRef {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            indices: Vec::new(),
        }
    }

    pub fn indexed(name: &str, indices: Vec<Expr>) -> Self {
        Self {
            name: name.to_string(),
            indices: indices.into_iter().map(Index::At).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Index {
    At(Expr),
    /// Inclusive `lo:hi`.
    Range(Expr, Expr),
    /// Blank index: the whole dimension.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    Number {
        value: f64,
    },
    Var(VarRef),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn num(value: f64) -> Self {
        Expr::Number { value }
    }

    pub fn var(name: &str) -> Self {
        Expr::Var(VarRef::scalar(name))
    }

    pub fn index(name: &str, indices: Vec<Expr>) -> Self {
        Expr::Var(VarRef::indexed(name, indices))
    }

    /// Reference with arbitrary index kinds, e.g. `x[i, ]`.
    pub fn slice(name: &str, indices: Vec<Index>) -> Self {
        Expr::Var(VarRef {
            name: name.to_string(),
            indices,
        })
    }

    pub fn call(func: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: func.to_string(),
            args,
        }
    }

    pub fn neg(arg: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Neg,
            arg: Box::new(arg),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn pow(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Pow, lhs, rhs)
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.indices.is_empty() {
            return Ok(());
        }
        write!(f, "[")?;
        for (i, idx) in self.indices.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match idx {
                Index::At(e) => write!(f, "{e}")?,
                Index::Range(lo, hi) => write!(f, "{lo}:{hi}")?,
                Index::All => {}
            }
        }
        write!(f, "]")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number { value } => write!(f, "{value}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Unary { arg, .. } => write!(f, "-({arg})"),
            Expr::Binary { op, lhs, rhs } => {
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Pow => "^",
                };
                write!(f, "({lhs} {sym} {rhs})")
            }
            Expr::Call { func, args } => {
                write!(f, "{func}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Stochastic { lhs, dist, args } => {
                write!(f, "{lhs} ~ {}", Expr::call(dist, args.clone()))
            }
            Statement::Logical { lhs, link, expr } => match link {
                Some(l) => write!(f, "{}({lhs}) <- {expr}", format!("{l:?}").to_lowercase()),
                None => write!(f, "{lhs} <- {expr}"),
            },
            Statement::For { var, lo, hi, .. } => write!(f, "for ({var} in {lo}:{hi}) {{ ... }}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip_of_loop_model() {
        let model = Model::new(vec![Statement::for_loop(
            "i",
            Expr::num(1.0),
            Expr::var("N"),
            vec![Statement::stochastic(
                VarRef::indexed("y", vec![Expr::var("i")]),
                "dnorm",
                vec![Expr::var("mu"), Expr::num(1.0)],
            )],
        )]);
        let parsed = Model::from_json(&model.to_json()).unwrap();
        assert_eq!(parsed, model);
    }

    #[test]
    fn test_parse_hand_written_document() {
        let text = r#"{
            "statements": [
                { "kind": "logical",
                  "lhs": { "name": "p" },
                  "link": "logit",
                  "expr": { "type": "call", "func": "sum",
                            "args": [ { "type": "var", "name": "b", "indices": ["all"] } ] } }
            ],
            "declarations": { "b": [3] }
        }"#;
        let model = Model::from_json(text).unwrap();
        assert_eq!(model.declarations["b"], vec![3]);
        assert_eq!(model.statements[0].to_string(), "logit(p) <- sum(b[])");
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = Model::from_json(r#"{ "statements": [ { "kind": "sample" } ] }"#).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }
}
