//! Generation results.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::types::{FinishReason, Usage};

/// A validated output plus bookkeeping about how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Output field values; internal fields are removed
    pub output: Map<String, Value>,
    /// Usage summed over every model call
    pub usage: Usage,
    pub model_calls: usize,
    /// Model turns taken, tool round-trips included
    pub steps: usize,
    /// Corrections made across all steps
    pub retries: usize,
    pub functions_executed: BTreeSet<String>,
    pub finish_reason: Option<FinishReason>,
    pub trace_id: String,
}

impl GenerationResult {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.output.get(field)
    }

    /// Deserialize the output into a caller type.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<T, LlmError> {
        serde_json::from_value(Value::Object(self.output.clone()))
            .map_err(|e| LlmError::ParseError(format!("output does not match the requested type: {e}")))
    }
}
