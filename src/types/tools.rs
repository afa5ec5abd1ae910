//! Function definition types advertised to the model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Function definition sent with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// JSON schema for function parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Option<Value>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// How the model is allowed to call functions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCallMode {
    /// Model decides
    #[default]
    Auto,
    /// Functions are not offered for this call
    None,
    /// Model must call some function
    Required,
    /// Model must call the named function
    Named(String),
}
