pub mod autodiff;
pub mod builder;
pub mod data;
pub mod distributions;
pub mod error;
pub mod functions;
pub mod graph;
pub mod ir;
pub mod lower;
pub mod model;
pub mod registry;
pub mod shapes;
pub mod tape;
pub mod transforms;

pub use data::{Bindings, DataValue};
pub use error::{CompileError, CompileResult, EvalError};
pub use graph::VarId;
pub use ir::Model;
pub use model::{compile, compile_with, CompileOptions, CompiledModel, InitStrategy, ModelEvaluator};
pub use registry::Registry;
