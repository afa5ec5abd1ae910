//! Signatures: typed input/output contracts for one generation call.
//!
//! A signature is built once, from the DSL or the builder, and is immutable
//! afterwards. Every structural rule is checked at construction so a bad
//! contract never reaches a model call:
//!
//! - field names are identifiers and unique within each side
//! - there is at least one output field
//! - internal fields are outputs; media fields are top-level inputs
//! - class fields list at least one option
//! - a `pattern` always comes with a `pattern_description`
//!
//! ```rust,ignore
//! let sig: Signature = r#""Answer briefly" question -> answer, confidence?:number"#.parse()?;
//! ```

pub mod field;
mod parser;
pub mod schema;
pub mod tools;
pub mod validate;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

pub use field::{Constraints, Field, FieldType, title_from_name};
pub use schema::to_json_schema;
pub use tools::{extract_tool_calls, sanitize_name};
pub use validate::{validate_field, validate_values};

use crate::error::{LlmError, ValidationError};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    description: Option<String>,
    inputs: Vec<Field>,
    outputs: Vec<Field>,
}

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Input,
    Output,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl Signature {
    /// Build and check a signature.
    pub fn new(description: Option<String>, inputs: Vec<Field>, outputs: Vec<Field>) -> Result<Self, LlmError> {
        if outputs.is_empty() {
            return Err(LlmError::config("signature must declare at least one output field"));
        }
        let inputs = check_side(inputs, Side::Input)?;
        let outputs = check_side(outputs, Side::Output)?;
        Ok(Self {
            description: description.filter(|d| !d.trim().is_empty()),
            inputs,
            outputs,
        })
    }

    pub fn builder() -> SignatureBuilder {
        SignatureBuilder::default()
    }

    /// Parse the signature DSL.
    pub fn parse(dsl: &str) -> Result<Self, LlmError> {
        let parsed = parser::parse(dsl)?;
        Self::new(parsed.description, parsed.inputs, parsed.outputs)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn input_fields(&self) -> &[Field] {
        &self.inputs
    }

    pub fn output_fields(&self) -> &[Field] {
        &self.outputs
    }

    pub fn input_field(&self, name: &str) -> Option<&Field> {
        self.inputs.iter().find(|f| f.name == name)
    }

    pub fn output_field(&self, name: &str) -> Option<&Field> {
        self.outputs.iter().find(|f| f.name == name)
    }

    /// Copy with a different description.
    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self.clone()
        }
    }

    /// Whether any output is an object or array of objects, which switches
    /// rendering and parsing to JSON.
    pub fn has_structured_output(&self) -> bool {
        self.outputs.iter().any(Field::is_structured)
    }

    /// Whether any field nests objects. Demonstrations for such signatures are
    /// rendered as separate turns rather than embedded in the system prompt.
    pub fn has_complex_fields(&self) -> bool {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .any(Field::is_structured)
    }

    /// JSON schema of the output fields.
    pub fn output_schema(&self) -> Result<Value, LlmError> {
        to_json_schema(&self.outputs)
    }

    /// Validate extracted output values.
    pub fn validate_output(&self, values: &Map<String, Value>) -> Result<(), ValidationError> {
        validate_values(&self.outputs, values)
    }

    /// Validate input values.
    pub fn validate_input(&self, values: &Map<String, Value>) -> Result<(), ValidationError> {
        validate_values(&self.inputs, values)
    }
}

fn check_side(fields: Vec<Field>, side: Side) -> Result<Vec<Field>, LlmError> {
    let mut seen = HashSet::new();
    let mut checked = Vec::with_capacity(fields.len());
    for field in fields {
        if !seen.insert(field.name.clone()) {
            return Err(LlmError::config(format!(
                "duplicate {} field name '{}'",
                side.as_str(),
                field.name
            )));
        }
        if side == Side::Input && field.is_internal {
            return Err(LlmError::config(format!(
                "input field '{}' cannot be internal; only output fields can",
                field.name
            )));
        }
        if side == Side::Output && field.field_type.is_media() {
            return Err(LlmError::config(format!(
                "output field '{}' cannot be of type {}; media is input-only",
                field.name,
                field.field_type.keyword()
            )));
        }
        checked.push(check_field(field, None)?);
    }
    Ok(checked)
}

fn check_field(mut field: Field, parent: Option<&str>) -> Result<Field, LlmError> {
    let path = match parent {
        Some(p) => format!("{p}.{}", field.name),
        None => field.name.clone(),
    };
    if !IDENTIFIER.is_match(&field.name) {
        return Err(LlmError::config(format!(
            "invalid field name '{path}': names must start with a letter or underscore and contain only letters, digits and underscores"
        )));
    }
    if parent.is_some() && field.field_type.is_media() {
        return Err(LlmError::config(format!(
            "media field '{path}' cannot be nested inside an object; media is input-only and top-level only"
        )));
    }

    match &mut field.field_type {
        FieldType::Class { options } => {
            options.retain(|o| !o.trim().is_empty());
            if options.is_empty() {
                return Err(LlmError::config(format!(
                    "class field '{path}' must list at least one option"
                )));
            }
        }
        FieldType::Object { fields } => {
            if fields.is_empty() {
                return Err(LlmError::config(format!(
                    "object field '{path}' must declare at least one property"
                )));
            }
            let mut names = HashSet::new();
            let children = std::mem::take(fields);
            for child in children {
                if !names.insert(child.name.clone()) {
                    return Err(LlmError::config(format!(
                        "duplicate property '{}' in object field '{path}'",
                        child.name
                    )));
                }
                fields.push(check_field(child, Some(&path))?);
            }
        }
        _ => {}
    }

    let c = &field.constraints;
    if let Some(pattern) = &c.pattern {
        if c.pattern_description.as_deref().is_none_or(|d| d.trim().is_empty()) {
            return Err(LlmError::config(format!(
                "field '{path}' declares pattern '{pattern}' without a pattern description; describe what the pattern accepts so validation errors are understandable"
            )));
        }
        let compiled = Regex::new(pattern).map_err(|e| {
            LlmError::config(format!("field '{path}' has an invalid pattern '{pattern}': {e}"))
        })?;
        field.compiled_pattern = Some(compiled);
    }
    if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
        if min > max {
            return Err(LlmError::config(format!(
                "field '{path}' has min_length {min} greater than max_length {max}"
            )));
        }
    }
    if let (Some(min), Some(max)) = (c.minimum, c.maximum) {
        if min > max {
            return Err(LlmError::config(format!(
                "field '{path}' has minimum {min} greater than maximum {max}"
            )));
        }
    }
    if field.title.trim().is_empty() {
        field.title = title_from_name(&field.name);
    }
    Ok(field)
}

impl FromStr for Signature {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Signature {
    type Error = LlmError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(desc) = &self.description {
            write!(f, "{} ", field::quote(desc))?;
        }
        let join = |fields: &[Field]| {
            fields
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "{} -> {}", join(&self.inputs), join(&self.outputs))
    }
}

/// Builder for signatures that need object fields or explicit titles.
#[derive(Debug, Clone, Default)]
pub struct SignatureBuilder {
    description: Option<String>,
    inputs: Vec<Field>,
    outputs: Vec<Field>,
}

impl SignatureBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input(mut self, field: Field) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn output(mut self, field: Field) -> Self {
        self.outputs.push(field);
        self
    }

    pub fn build(self) -> Result<Signature, LlmError> {
        Signature::new(self.description, self.inputs, self.outputs)
    }
}
