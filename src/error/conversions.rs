//! Type Conversions for LlmError
//!
//! This module contains From trait implementations for converting
//! common error types into LlmError.

use super::types::{LlmError, ValidationError};

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<regex::Error> for LlmError {
    fn from(err: regex::Error) -> Self {
        Self::ConfigError(format!("invalid pattern: {err}"))
    }
}

impl From<ValidationError> for LlmError {
    fn from(err: ValidationError) -> Self {
        Self::FieldValidation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let llm_err: LlmError = json_err.into();
        assert!(matches!(llm_err, LlmError::JsonError(_)));
    }

    #[test]
    fn test_from_regex_error() {
        let regex_err = regex::Regex::new("(unclosed").unwrap_err();
        let llm_err: LlmError = regex_err.into();
        assert!(matches!(llm_err, LlmError::ConfigError(msg) if msg.contains("invalid pattern")));
    }

    #[test]
    fn test_from_validation_error() {
        let err = ValidationError::single(FieldError::new("answer", "is required"));
        let llm_err: LlmError = err.into();
        assert!(llm_err.is_recoverable());
    }
}
