//! Tool-parameter injection for services without native function calling.
//!
//! Each function parameter becomes an optional output field named
//! `<function>_<path>` (nested objects flattened with underscores). When the
//! model fills any of a function's fields, the values are folded back into a
//! call to that function.

use serde_json::{Map, Value};
use tracing::debug;

use super::Signature;
use super::field::{Field, FieldType};
use crate::error::LlmError;
use crate::types::{FunctionCall, FunctionDefinition};

/// One flattened function parameter.
#[derive(Debug, Clone)]
pub(crate) struct InjectedParam {
    pub field: Field,
    /// Path of the value inside the function's arguments object
    pub path: Vec<String>,
}

/// Replace every character that cannot appear in an identifier with `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

pub(crate) fn flatten_parameters(function: &FunctionDefinition) -> Vec<InjectedParam> {
    let mut out = Vec::new();
    if let Some(schema) = &function.parameters {
        flatten_into(&function.name, schema, &mut Vec::new(), &mut out);
    }
    out
}

fn flatten_into(function: &str, schema: &Value, path: &mut Vec<String>, out: &mut Vec<InjectedParam>) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (key, prop) in properties {
        path.push(key.clone());
        let is_nested_object = prop.get("type").and_then(Value::as_str) == Some("object")
            && prop.get("properties").is_some();
        if is_nested_object {
            flatten_into(function, prop, path, out);
        } else {
            let name = sanitize_name(&format!("{function}_{}", path.join("_")));
            let mut field = field_from_schema(&name, prop).optional();
            let what = prop
                .get("description")
                .and_then(Value::as_str)
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            field.description = Some(format!(
                "Argument `{}` of function `{function}`{what}. Fill only to call `{function}`.",
                path.join(".")
            ));
            out.push(InjectedParam {
                field,
                path: path.clone(),
            });
        }
        path.pop();
    }
}

fn field_from_schema(name: &str, prop: &Value) -> Field {
    let ty = prop.get("type").and_then(Value::as_str).unwrap_or("string");
    if ty == "array" {
        let items = prop.get("items").cloned().unwrap_or(Value::Null);
        let mut field = field_from_schema(name, &items);
        if matches!(field.field_type, FieldType::Object { .. }) {
            field.field_type = FieldType::Json;
        }
        field.is_array = true;
        return field;
    }
    if let Some(options) = prop.get("enum").and_then(Value::as_array) {
        let options: Vec<String> = options
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect();
        if !options.is_empty() {
            return Field::class(name, options);
        }
    }
    let field_type = match ty {
        "number" | "integer" => FieldType::Number,
        "boolean" => FieldType::Boolean,
        "object" => FieldType::Json,
        _ => match prop.get("format").and_then(Value::as_str) {
            Some("date") => FieldType::Date,
            Some("date-time") => FieldType::DateTime,
            Some("uri") | Some("url") => FieldType::Url,
            Some("email") => FieldType::Email,
            _ => FieldType::String,
        },
    };
    let mut field = Field::new(name, field_type);
    let c = &mut field.constraints;
    c.minimum = prop.get("minimum").and_then(Value::as_f64);
    c.maximum = prop.get("maximum").and_then(Value::as_f64);
    c.min_length = prop.get("minLength").and_then(Value::as_u64).map(|n| n as usize);
    c.max_length = prop.get("maxLength").and_then(Value::as_u64).map(|n| n as usize);
    field
}

impl Signature {
    /// Derive a signature whose outputs also carry every function's parameters
    /// as optional fields.
    pub fn inject_tool_fields(&self, functions: &[FunctionDefinition]) -> Result<Signature, LlmError> {
        let mut outputs = self.output_fields().to_vec();
        for function in functions {
            for param in flatten_parameters(function) {
                if outputs.iter().any(|f| f.name == param.field.name) {
                    return Err(LlmError::config(format!(
                        "injected field '{}' for function '{}' collides with an existing output field",
                        param.field.name, function.name
                    )));
                }
                outputs.push(param.field);
            }
        }
        Signature::new(
            self.description().map(str::to_string),
            self.input_fields().to_vec(),
            outputs,
        )
    }
}

/// Pull filled tool fields out of `values` and turn them into function calls.
///
/// Tool fields are removed from `values` whether or not they were filled.
pub fn extract_tool_calls(functions: &[FunctionDefinition], values: &mut Map<String, Value>) -> Vec<FunctionCall> {
    let mut calls = Vec::new();
    for function in functions {
        let mut args = Map::new();
        let mut filled = false;
        for param in flatten_parameters(function) {
            let Some(value) = values.remove(&param.field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            filled = true;
            insert_path(&mut args, &param.path, value);
        }
        if filled {
            debug!(function = %function.name, "recovered function call from output fields");
            calls.push(FunctionCall::new(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                function.name.clone(),
                Value::Object(args),
            ));
        }
    }
    calls
}

fn insert_path(target: &mut Map<String, Value>, path: &[String], value: Value) {
    match path {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather() -> FunctionDefinition {
        FunctionDefinition::new(
            "get-weather",
            "Look up the weather",
            Some(json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "object",
                        "properties": {
                            "city": {"type": "string", "description": "City name"},
                            "country": {"type": "string"}
                        }
                    },
                    "units": {"type": "string", "enum": ["metric", "imperial"]},
                    "days": {"type": "array", "items": {"type": "integer"}}
                }
            })),
        )
    }

    #[test]
    fn injects_flattened_optional_fields() {
        let sig: Signature = "question -> answer".parse().unwrap();
        let derived = sig.inject_tool_fields(&[weather()]).unwrap();
        let outputs = derived.output_fields();
        assert_eq!(outputs[0].name, "answer");
        let mut names: Vec<&str> = outputs[1..].iter().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "get_weather_days",
                "get_weather_location_city",
                "get_weather_location_country",
                "get_weather_units"
            ]
        );
        let field = |name: &str| outputs.iter().find(|f| f.name == name).unwrap();
        assert!(outputs[1..].iter().all(|f| f.is_optional));
        assert!(field("get_weather_days").is_array);
        assert_eq!(field("get_weather_days").field_type, FieldType::Number);
        assert_eq!(
            field("get_weather_units").field_type,
            FieldType::class(["metric", "imperial"])
        );
        assert!(
            field("get_weather_location_city")
                .description
                .as_deref()
                .unwrap()
                .contains("City name")
        );
        // The source signature is untouched.
        assert_eq!(sig.output_fields().len(), 1);
    }

    #[test]
    fn filled_fields_become_calls() {
        let mut values = json!({
            "answer": null,
            "get_weather_location_city": "Paris",
            "get_weather_units": "metric",
            "get_weather_days": null
        })
        .as_object()
        .cloned()
        .unwrap();
        let calls = extract_tool_calls(&[weather()], &mut values);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get-weather");
        assert_eq!(
            calls[0].arguments.to_value().unwrap(),
            json!({"location": {"city": "Paris"}, "units": "metric"})
        );
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["answer"]);
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_name("a-b.c"), "a_b_c");
        assert_eq!(sanitize_name("1x"), "_1x");
    }
}
