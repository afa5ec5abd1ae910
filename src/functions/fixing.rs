//! Fixing instructions for rejected function arguments.

use serde_json::Value;

use crate::error::FieldError;
use crate::types::FunctionDefinition;

/// Map schema violations to field errors keyed by dotted argument path.
pub(crate) fn schema_errors(validator: &jsonschema::Validator, args: &Value) -> Vec<FieldError> {
    validator
        .iter_errors(args)
        .map(|err| {
            let pointer = err.instance_path.to_string();
            let field = pointer.trim_start_matches('/').replace('/', ".");
            let field = if field.is_empty() { "arguments".to_string() } else { field };
            FieldError::new(field, err.to_string())
        })
        .collect()
}

fn property_schema<'a>(schema: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = schema;
    for segment in path.split('.') {
        node = match node.get("properties").and_then(|p| p.get(segment)) {
            Some(prop) => prop,
            None if segment.parse::<usize>().is_ok() => node.get("items")?,
            None => return None,
        };
    }
    Some(node)
}

fn describe(schema: &Value) -> Vec<String> {
    let mut hints = Vec::new();
    if let Some(ty) = schema.get("type").and_then(Value::as_str) {
        hints.push(format!("expected type {ty}"));
    }
    if let Some(desc) = schema.get("description").and_then(Value::as_str) {
        hints.push(desc.trim().trim_end_matches('.').to_string());
    }
    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        let allowed: Vec<String> = options
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect();
        hints.push(format!("allowed values: {}", allowed.join(", ")));
    }
    if let Some(min) = schema.get("minimum") {
        hints.push(format!("minimum {min}"));
    }
    if let Some(max) = schema.get("maximum") {
        hints.push(format!("maximum {max}"));
    }
    hints
}

/// Instructions telling the model how to call `function` correctly.
pub(crate) fn fixing_instructions(function: &FunctionDefinition, errors: &[FieldError]) -> String {
    let mut text = format!(
        "The arguments for function `{}` were invalid. Fix these problems:",
        function.name
    );
    for error in errors {
        text.push_str(&format!("\n- `{}`: {}", error.field, error.message));
        let hints = function
            .parameters
            .as_ref()
            .and_then(|schema| property_schema(schema, &error.field))
            .map(describe)
            .unwrap_or_default();
        if !hints.is_empty() {
            text.push_str(&format!(" ({})", hints.join("; ")));
        }
    }
    if let Some(required) = function
        .parameters
        .as_ref()
        .and_then(|s| s.get("required"))
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
    {
        let names: Vec<&str> = required.iter().filter_map(Value::as_str).collect();
        text.push_str(&format!("\nRequired arguments: {}.", names.join(", ")));
    }
    text.push_str(&format!(
        "\nCall `{}` again with corrected arguments.",
        function.name
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather() -> FunctionDefinition {
        FunctionDefinition::new(
            "weather",
            "Get the weather",
            Some(json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "City name."},
                    "units": {"type": "string", "enum": ["metric", "imperial"]},
                    "days": {"type": "array", "items": {"type": "integer", "minimum": 1}}
                },
                "required": ["city"]
            })),
        )
    }

    #[test]
    fn instructions_list_allowed_values() {
        let text = fixing_instructions(&weather(), &[FieldError::new("units", "must be metric or imperial")]);
        assert!(text.contains("`units`: must be metric or imperial"));
        assert!(text.contains("allowed values: metric, imperial"));
        assert!(text.contains("Required arguments: city."));
        assert!(text.ends_with("Call `weather` again with corrected arguments."));
    }

    #[test]
    fn schema_violations_carry_argument_paths() {
        let def = weather();
        let validator = jsonschema::validator_for(def.parameters.as_ref().unwrap()).unwrap();
        let errors = schema_errors(&validator, &json!({"city": "Oslo", "units": "kelvin", "days": [0]}));
        let mut fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        fields.sort_unstable();
        assert_eq!(fields, vec!["days.0", "units"]);

        let text = fixing_instructions(&def, &errors);
        assert!(text.contains("minimum 1"));

        let missing = schema_errors(&validator, &json!({}));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].field, "arguments");
    }
}
