//! Function definitions, handlers and the registry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use super::context::FunctionContext;
use crate::defaults;
use crate::error::{FieldError, LlmError};
use crate::types::FunctionDefinition;

/// Failure reported by a function handler.
#[derive(Debug, Clone, Error)]
pub enum FunctionCallError {
    /// The arguments had the wrong shape; the model is asked to fix them.
    #[error("invalid arguments: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    InvalidArguments(Vec<FieldError>),

    #[error("{0}")]
    Failed(String),
}

impl FunctionCallError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments(vec![FieldError::new(field, message)])
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for FunctionCallError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid("arguments", err.to_string())
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Value, FunctionCallError>>;

/// Async function body, by arity.
#[derive(Clone)]
pub enum FunctionHandler {
    NoArgs(Arc<dyn Fn() -> HandlerFuture + Send + Sync>),
    Args(Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>),
    WithContext(Arc<dyn Fn(Value, FunctionContext) -> HandlerFuture + Send + Sync>),
}

impl FunctionHandler {
    pub fn no_args<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionCallError>> + Send + 'static,
    {
        Self::NoArgs(Arc::new(move || Box::pin(f())))
    }

    pub fn args<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionCallError>> + Send + 'static,
    {
        Self::Args(Arc::new(move |args| Box::pin(f(args))))
    }

    pub fn with_context<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, FunctionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionCallError>> + Send + 'static,
    {
        Self::WithContext(Arc::new(move |args, ctx| Box::pin(f(args, ctx))))
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::NoArgs(_) => 0,
            Self::Args(_) => 1,
            Self::WithContext(_) => 2,
        }
    }

    pub(crate) fn call(&self, args: Value, ctx: FunctionContext) -> HandlerFuture {
        match self {
            Self::NoArgs(f) => f(),
            Self::Args(f) => f(args),
            Self::WithContext(f) => f(args, ctx),
        }
    }
}

impl fmt::Debug for FunctionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionHandler(arity={})", self.arity())
    }
}

/// A callable function.
#[derive(Clone)]
pub struct Function {
    definition: FunctionDefinition,
    handler: Option<FunctionHandler>,
    validator: Option<Arc<jsonschema::Validator>>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("definition", &self.definition)
            .field("handler", &self.handler)
            .finish()
    }
}

impl Function {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            definition: FunctionDefinition::new(name, description, None),
            handler: None,
            validator: None,
        }
    }

    /// JSON schema of the arguments object.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.definition.parameters = Some(schema);
        self.validator = None;
        self
    }

    pub fn with_handler(mut self, handler: FunctionHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    pub fn handler(&self) -> Option<&FunctionHandler> {
        self.handler.as_ref()
    }

    pub(crate) fn validator(&self) -> Option<&jsonschema::Validator> {
        self.validator.as_deref()
    }

    fn compile(mut self) -> Result<Self, LlmError> {
        if let Some(schema) = &self.definition.parameters {
            let validator = jsonschema::validator_for(schema).map_err(|e| {
                LlmError::config(format!(
                    "function '{}' has an invalid parameter schema: {e}",
                    self.definition.name
                ))
            })?;
            self.validator = Some(Arc::new(validator));
        }
        Ok(self)
    }
}

/// Ordered set of functions, unique by name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function, compiling its parameter schema.
    pub fn register(&mut self, function: Function) -> Result<(), LlmError> {
        let name = function.name();
        if name.trim().is_empty() {
            return Err(LlmError::config("function name cannot be empty"));
        }
        if name == defaults::generation::FINAL_RESULT_FUNCTION {
            return Err(LlmError::config(format!("function name '{name}' is reserved")));
        }
        if self.get(name).is_some() {
            return Err(LlmError::config(format!("duplicate function '{name}'")));
        }
        self.functions.push(function.compile()?);
        Ok(())
    }

    pub fn with(mut self, function: Function) -> Result<Self, LlmError> {
        self.register(function)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.functions.iter().map(|f| f.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(Function::name).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_duplicates_and_reserved_names() {
        let mut registry = FunctionRegistry::new();
        registry.register(Function::new("lookup", "Look up")).unwrap();
        let err = registry.register(Function::new("lookup", "Again")).unwrap_err();
        assert!(matches!(err, LlmError::ConfigError(msg) if msg.contains("duplicate")));
        assert!(registry.register(Function::new("__finalResult", "x")).is_err());
        assert_eq!(registry.names(), vec!["lookup"]);
    }

    #[test]
    fn invalid_schema_fails_registration() {
        let bad = Function::new("f", "d").with_parameters(json!({"type": 12}));
        assert!(FunctionRegistry::new().register(bad).is_err());
    }

    #[tokio::test]
    async fn handlers_dispatch_by_arity() {
        let zero = FunctionHandler::no_args(|| async { Ok(json!("pong")) });
        let one = FunctionHandler::args(|args| async move { Ok(args["x"].clone()) });
        let two = FunctionHandler::with_context(|_, ctx| async move { Ok(json!(ctx.step)) });
        let ctx = FunctionContext::standalone();
        assert_eq!(zero.arity(), 0);
        assert_eq!(zero.call(json!({}), ctx.clone()).await.unwrap(), json!("pong"));
        assert_eq!(one.call(json!({"x": 3}), ctx.clone()).await.unwrap(), json!(3));
        assert_eq!(two.call(Value::Null, ctx).await.unwrap(), json!(0));
    }

    #[test]
    fn serde_errors_become_argument_errors() {
        let err: FunctionCallError = serde_json::from_value::<u32>(json!("x")).unwrap_err().into();
        assert!(matches!(err, FunctionCallError::InvalidArguments(ref e) if e[0].field == "arguments"));
    }
}
