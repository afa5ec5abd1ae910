//! Error Handling Module
//!
//! This module provides the error types shared by every component:
//! - Core error types (`LlmError`, `ErrorCategory`)
//! - Structured field errors (`FieldError`, `ValidationError`)
//! - Type conversions from common error types
//!
//! # Example
//!
//! ```rust,ignore
//! use siumai_dsp::error::{ErrorCategory, LlmError};
//!
//! let error = LlmError::FunctionNotFound("get_weather".into());
//! assert_eq!(error.category(), ErrorCategory::Function);
//! assert!(!error.is_recoverable());
//! ```

mod conversions;
pub mod types;

pub use types::*;
