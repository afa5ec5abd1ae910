//! Callable functions (tools) the model may invoke during generation.
//!
//! A [`Function`] pairs a [`FunctionDefinition`](crate::types::FunctionDefinition)
//! with an async handler. Functions live in a [`FunctionRegistry`]; the
//! executor looks calls up by exact name, validates arguments against the
//! declared JSON schema and runs every call of one model turn concurrently.

pub mod context;
pub mod executor;
mod fixing;
pub mod registry;

pub use context::{FunctionContext, SharedParams};
pub use executor::{
    ExecutionEnv, FunctionBatch, ResultFormatter, default_formatter, execute, process_functions,
};
pub use registry::{Function, FunctionCallError, FunctionHandler, FunctionRegistry};
