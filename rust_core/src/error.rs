use thiserror::Error;

/// Errors raised while turning IR + data into a compiled model.
///
/// Every variant is fatal to the compile call. Messages name the offending
/// variable or statement so the model author can find it.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Malformed IR document, unknown distribution/function, or arity mismatch.
    #[error("parse error: {0}")]
    Parse(String),

    /// Index out of bounds, rank disagreement, or an index that cannot be
    /// resolved at compile time.
    #[error("shape error: {0}")]
    Shape(String),

    /// A right-hand side references a variable with neither a defining
    /// statement nor a data value.
    #[error("unresolved identifier `{0}`")]
    UnresolvedIdentifier(String),

    /// The dependency graph contains a cycle. `path` traces it, e.g. `[a, b, a]`.
    #[error("cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    /// An unobserved stochastic node has a discrete distribution and cannot be
    /// mapped to unconstrained space.
    #[error("`{name}` is an unobserved discrete variable ({dist}); it must be supplied as data")]
    DiscreteParameter { name: String, dist: String },

    /// Data or inits could not be interpreted.
    #[error("invalid data for `{name}`: {reason}")]
    InvalidData { name: String, reason: String },

    /// An initial value lies outside the support of its node.
    #[error("invalid initial value for `{name}`: {reason}")]
    InvalidInitialValue { name: String, reason: String },

    /// Two statements define the same variable (only raised in strict mode).
    #[error("`{0}` is defined more than once")]
    DuplicateDefinition(String),

    /// A user distribution or function failed registration checks.
    #[error("registry error: {0}")]
    Registry(String),
}

/// Errors raised while evaluating a compiled model.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Caller supplied a parameter vector of the wrong length.
    #[error("parameter vector has length {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    /// An expression left its mathematical domain (e.g. `log` of a negative
    /// number). `log_density` converts this to `-inf`.
    #[error("domain error while evaluating `{node}`")]
    DomainEvaluation { node: String },
}

/// Crate-wide result alias for compile-time operations.
pub type CompileResult<T> = Result<T, CompileError>;
