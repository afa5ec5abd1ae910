//! JSON Schema derivation for native structured output and the `__finalResult` fallback.

use serde_json::{Map, Value, json};

use super::field::{Field, FieldType};
use crate::error::LlmError;

/// Derive an object schema whose properties are `fields`.
///
/// Media fields are input-only and rejected wherever they appear.
pub fn to_json_schema(fields: &[Field]) -> Result<Value, LlmError> {
    object_schema(fields, None)
}

fn object_schema(fields: &[Field], parent: Option<&str>) -> Result<Value, LlmError> {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields {
        properties.insert(field.name.clone(), field_schema(field, parent)?);
        if !field.is_optional {
            required.push(Value::String(field.name.clone()));
        }
    }
    Ok(json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    }))
}

fn field_schema(field: &Field, parent: Option<&str>) -> Result<Value, LlmError> {
    let item = item_schema(field, parent)?;
    let mut schema = if field.is_array {
        json!({ "type": "array", "items": item })
    } else {
        item
    };
    if let (Some(desc), Value::Object(map)) = (&field.description, &mut schema) {
        map.insert("description".into(), Value::String(desc.clone()));
    }
    Ok(schema)
}

fn item_schema(field: &Field, parent: Option<&str>) -> Result<Value, LlmError> {
    let c = &field.constraints;
    let schema = match &field.field_type {
        FieldType::String | FieldType::Code => {
            let mut s = json!({ "type": "string" });
            if let Some(n) = c.min_length {
                s["minLength"] = json!(n);
            }
            if let Some(n) = c.max_length {
                s["maxLength"] = json!(n);
            }
            if let Some(p) = &c.pattern {
                s["pattern"] = json!(p);
            }
            s
        }
        FieldType::Number => {
            let mut s = json!({ "type": "number" });
            if let Some(n) = c.minimum {
                s["minimum"] = json!(n);
            }
            if let Some(n) = c.maximum {
                s["maximum"] = json!(n);
            }
            s
        }
        FieldType::Boolean => json!({ "type": "boolean" }),
        FieldType::Date => json!({ "type": "string", "format": "date" }),
        FieldType::DateTime => json!({ "type": "string", "format": "date-time" }),
        FieldType::Url => json!({ "type": "string", "format": "uri" }),
        FieldType::Email => json!({ "type": "string", "format": "email" }),
        FieldType::Json => json!({}),
        FieldType::Class { options } => json!({ "type": "string", "enum": options }),
        FieldType::Object { fields } => object_schema(fields, Some(&field.name))?,
        FieldType::Image | FieldType::Audio | FieldType::File => {
            return Err(match parent {
                Some(parent) => LlmError::config(format!(
                    "media field '{}' cannot be nested inside object '{parent}'; media is input-only and top-level only",
                    field.name
                )),
                None => LlmError::config(format!(
                    "media field '{}' cannot appear in a JSON schema; media is input-only",
                    field.name
                )),
            });
        }
    };
    Ok(schema)
}
