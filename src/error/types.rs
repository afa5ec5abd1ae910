//! Core error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single structured validation failure.
///
/// `field` is the field name (dot-separated for nested object members) and
/// `message` a human readable explanation that can be fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefix the field path with a parent name (`parent.field`).
    pub fn nested_in(mut self, parent: &str) -> Self {
        self.field = if self.field.is_empty() {
            parent.to_string()
        } else {
            format!("{parent}.{}", self.field)
        };
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A non-empty list of field errors produced by one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn single(error: FieldError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.field.as_str())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Model output did not satisfy the signature or an assertion
    Validation,
    /// Tool/function lookup or execution
    Function,
    /// Invalid signature, options or registry setup
    Configuration,
    /// Conversation memory misuse
    Memory,
    /// Requested capability not available on the service
    Unsupported,
    /// Failure reported by the model service collaborator
    Service,
    /// Unparseable JSON or response content
    Parsing,
    /// Generation stopped by a cancel request or the step budget
    Aborted,
    /// Retry budget exhausted
    Exhausted,
    /// Anything else
    Internal,
}

/// Unified error type for signatures, rendering, memory, functions and generation.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Invalid signature, field, registry or option setup. Raised at construction.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A required field is absent from rendered input or a history turn.
    #[error("Missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// Extracted model output failed field validation.
    #[error("Field validation failed: {0}")]
    FieldValidation(ValidationError),

    /// A user assertion rejected the parsed output.
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// Function arguments were rejected; carries instructions for the model.
    #[error("Function '{function}' rejected its arguments: {message}")]
    FunctionError {
        function: String,
        message: String,
        fixing_instructions: String,
    },

    /// A function handler failed for a reason other than its arguments.
    #[error("Function '{function}' failed: {message}")]
    FunctionFailed { function: String, message: String },

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function '{0}' has no handler")]
    NoHandler(String),

    /// A pending call was missing its id or name.
    #[error("Malformed function call: {0}")]
    MalformedFunctionCall(String),

    #[error("Tag not found in memory: {0}")]
    TagNotFound(String),

    #[error("The most recent memory turn is not an assistant turn")]
    NoAssistantTurn,

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Every correction round failed; `last_error` is the final validation failure.
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        attempts: usize,
        last_error: Box<LlmError>,
    },

    #[error("Maximum number of steps ({0}) exceeded")]
    MaxStepsExceeded(usize),

    #[error("Generation aborted: {0}")]
    Aborted(String),

    #[error("Content filtered by the model service: {0}")]
    ContentFiltered(String),

    /// Error returned by the model service collaborator.
    #[error("Model service error: {0}")]
    ServiceError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("JSON error: {0}")]
    JsonError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LlmError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) | Self::MissingField { .. } => ErrorCategory::Configuration,
            Self::FieldValidation(_) | Self::AssertionFailed(_) => ErrorCategory::Validation,
            Self::FunctionError { .. }
            | Self::FunctionFailed { .. }
            | Self::FunctionNotFound(_)
            | Self::NoHandler(_)
            | Self::MalformedFunctionCall(_) => ErrorCategory::Function,
            Self::TagNotFound(_) | Self::NoAssistantTurn => ErrorCategory::Memory,
            Self::UnsupportedFeature(_) => ErrorCategory::Unsupported,
            Self::RetryBudgetExhausted { .. } => ErrorCategory::Exhausted,
            Self::MaxStepsExceeded(_) | Self::Aborted(_) => ErrorCategory::Aborted,
            Self::ContentFiltered(_) | Self::ServiceError(_) => ErrorCategory::Service,
            Self::ParseError(_) | Self::JsonError(_) => ErrorCategory::Parsing,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the engine turns this error into a correction turn instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FieldValidation(_)
                | Self::AssertionFailed(_)
                | Self::FunctionError { .. }
                | Self::FunctionFailed { .. }
        )
    }

    /// Field errors carried by a validation failure, if any.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::FieldValidation(v) => &v.errors,
            Self::RetryBudgetExhausted { last_error, .. } => last_error.field_errors(),
            _ => &[],
        }
    }
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_split_fatal_and_recoverable() {
        let fatal = LlmError::FunctionNotFound("lookup".into());
        assert_eq!(fatal.category(), ErrorCategory::Function);
        assert!(!fatal.is_recoverable());

        let recoverable = LlmError::FunctionError {
            function: "lookup".into(),
            message: "bad city".into(),
            fixing_instructions: "use a real city".into(),
        };
        assert_eq!(recoverable.category(), ErrorCategory::Function);
        assert!(recoverable.is_recoverable());

        assert_eq!(
            LlmError::TagNotFound("x".into()).category(),
            ErrorCategory::Memory
        );
    }

    #[test]
    fn exhausted_exposes_last_field_errors() {
        let last = LlmError::FieldValidation(ValidationError::single(FieldError::new(
            "answer",
            "is required",
        )));
        let err = LlmError::RetryBudgetExhausted {
            attempts: 4,
            last_error: Box::new(last),
        };
        assert_eq!(err.field_errors().len(), 1);
        assert!(err.to_string().contains("after 4 attempts"));
        assert!(err.to_string().contains("answer: is required"));
    }

    #[test]
    fn nested_field_paths() {
        let err = FieldError::new("name", "is required").nested_in("items[0]");
        assert_eq!(err.field, "items[0].name");
    }
}
