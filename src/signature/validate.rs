//! Field value validation.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Map, Value};
use validator::{ValidateEmail, ValidateUrl};

use super::field::{Field, FieldType};
use crate::error::{FieldError, ValidationError};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Validate one field's value.
///
/// `None` and `null` count as absent.
pub fn validate_field(field: &Field, value: Option<&Value>) -> Result<(), FieldError> {
    let value = match value {
        None | Some(Value::Null) => {
            return if field.is_optional {
                Ok(())
            } else {
                Err(FieldError::new(&field.name, "is required"))
            };
        }
        Some(v) => v,
    };

    if field.is_array {
        let Value::Array(items) = value else {
            return Err(FieldError::new(
                &field.name,
                format!("must be an array, got {}", kind_of(value)),
            ));
        };
        for (i, item) in items.iter().enumerate() {
            validate_item(field, item)
                .map_err(|e| e.nested_in(&format!("{}[{i}]", field.name)))?;
        }
        return Ok(());
    }

    validate_item(field, value).map_err(|e| e.nested_in(&field.name))
}

/// Validate every field against an object of values, collecting all failures.
pub fn validate_values(fields: &[Field], values: &Map<String, Value>) -> Result<(), ValidationError> {
    let errors: Vec<FieldError> = fields
        .iter()
        .filter_map(|f| validate_field(f, values.get(&f.name)).err())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(errors))
    }
}

/// Errors from here carry an empty field name; callers nest them under the field path.
fn validate_item(field: &Field, value: &Value) -> Result<(), FieldError> {
    let fail = |message: String| Err(FieldError::new("", message));
    match &field.field_type {
        FieldType::String | FieldType::Code => {
            let Some(s) = value.as_str() else {
                return fail(format!("must be a string, got {}", kind_of(value)));
            };
            check_string(field, s)
        }
        FieldType::Number => {
            let Some(n) = value.as_f64() else {
                return fail(format!("must be a number, got {}", kind_of(value)));
            };
            if let Some(min) = field.constraints.minimum.filter(|min| n < *min) {
                return fail(format!("must be at least {min}"));
            }
            if let Some(max) = field.constraints.maximum.filter(|max| n > *max) {
                return fail(format!("must be at most {max}"));
            }
            Ok(())
        }
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            _ => fail(format!("must be true or false, got {}", kind_of(value))),
        },
        FieldType::Date => match value.as_str() {
            Some(s) if NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok() => Ok(()),
            _ => fail("must be a date in YYYY-MM-DD format".to_string()),
        },
        FieldType::DateTime => match value.as_str() {
            Some(s) if is_datetime(s.trim()) => Ok(()),
            _ => fail("must be a datetime in ISO 8601 format (YYYY-MM-DDTHH:MM:SSZ)".to_string()),
        },
        FieldType::Url => match value.as_str() {
            Some(s) if s.trim().validate_url() => Ok(()),
            _ => fail("must be a valid URL".to_string()),
        },
        FieldType::Email => match value.as_str() {
            Some(s) if s.trim().validate_email() => Ok(()),
            _ => fail("must be a valid email address".to_string()),
        },
        FieldType::Json => Ok(()),
        FieldType::Class { options } => match value.as_str() {
            Some(s) if options.iter().any(|o| o == s) => Ok(()),
            _ => fail(format!("must be one of: {}", options.join(", "))),
        },
        FieldType::Object { fields } => {
            let Value::Object(map) = value else {
                return fail(format!("must be an object, got {}", kind_of(value)));
            };
            for sub in fields {
                validate_field(sub, map.get(&sub.name))?;
            }
            Ok(())
        }
        FieldType::Image => validate_media(value, &["mime_type", "data"]),
        FieldType::Audio => validate_media(value, &["data", "format"]),
        FieldType::File => match value.get("file_uri") {
            Some(_) => validate_media(value, &["mime_type"]),
            None => validate_media(value, &["mime_type", "data"]),
        },
    }
}

fn check_string(field: &Field, s: &str) -> Result<(), FieldError> {
    let c = &field.constraints;
    let len = s.chars().count();
    if let Some(min) = c.min_length.filter(|min| len < *min) {
        return Err(FieldError::new("", format!("must be at least {min} characters long")));
    }
    if let Some(max) = c.max_length.filter(|max| len > *max) {
        return Err(FieldError::new("", format!("must be at most {max} characters long")));
    }
    if let Some(pattern) = &c.pattern {
        let compiled;
        let re = match &field.compiled_pattern {
            Some(re) => re,
            None => {
                compiled = Regex::new(pattern)
                    .map_err(|e| FieldError::new("", format!("has an invalid pattern: {e}")))?;
                &compiled
            }
        };
        if !re.is_match(s) {
            let desc = c.pattern_description.as_deref().unwrap_or(pattern);
            return Err(FieldError::new("", format!("must be {desc}")));
        }
    }
    Ok(())
}

fn is_datetime(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || DATETIME_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
}

/// Media values are objects carrying a base64 payload, or a URI for files.
fn validate_media(value: &Value, required: &[&str]) -> Result<(), FieldError> {
    let Value::Object(map) = value else {
        return Err(FieldError::new("", "must be a media object"));
    };
    match required.iter().find(|k| !map.contains_key(**k)) {
        Some(missing) => Err(FieldError::new("", format!("is missing '{missing}'"))),
        None => Ok(()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optionality() {
        let required = Field::string("answer");
        let err = validate_field(&required, None).unwrap_err();
        assert_eq!(err.to_string(), "answer: is required");
        assert!(validate_field(&required, Some(&Value::Null)).is_err());
        assert!(validate_field(&required.clone().optional(), None).is_ok());
    }

    #[test]
    fn string_bounds_and_pattern() {
        let field = Field::string("code")
            .max_length(3)
            .pattern("^[A-Z]+$")
            .pattern_description("uppercase letters");
        assert!(validate_field(&field, Some(&json!("ABC"))).is_ok());
        assert_eq!(
            validate_field(&field, Some(&json!("ABCD"))).unwrap_err().message,
            "must be at most 3 characters long"
        );
        assert_eq!(
            validate_field(&field, Some(&json!("ab"))).unwrap_err().message,
            "must be uppercase letters"
        );
    }

    #[test]
    fn number_bounds() {
        let field = Field::number("score").minimum(0.0).maximum(1.0);
        assert!(validate_field(&field, Some(&json!(0.5))).is_ok());
        assert!(validate_field(&field, Some(&json!(2))).is_err());
        assert!(validate_field(&field, Some(&json!("0.5"))).is_err());
    }

    #[test]
    fn formats() {
        let date = Field::new("d", FieldType::Date);
        assert!(validate_field(&date, Some(&json!("2024-02-29"))).is_ok());
        assert!(validate_field(&date, Some(&json!("2023-02-29"))).is_err());

        let dt = Field::new("t", FieldType::DateTime);
        assert!(validate_field(&dt, Some(&json!("2024-01-01T10:00:00Z"))).is_ok());
        assert!(validate_field(&dt, Some(&json!("2024-01-01 10:00"))).is_ok());
        assert!(validate_field(&dt, Some(&json!("yesterday"))).is_err());

        let url = Field::new("u", FieldType::Url);
        assert!(validate_field(&url, Some(&json!("https://example.com/a"))).is_ok());
        assert!(validate_field(&url, Some(&json!("not a url"))).is_err());

        let email = Field::new("e", FieldType::Email);
        assert!(validate_field(&email, Some(&json!("a@example.com"))).is_ok());
        assert!(validate_field(&email, Some(&json!("nope"))).is_err());
    }

    #[test]
    fn nested_paths_in_arrays_of_objects() {
        let items = Field::object("items", vec![Field::string("name")]).array();
        let err = validate_field(&items, Some(&json!([{"name": "a"}, {}]))).unwrap_err();
        assert_eq!(err.field, "items[1].name");
        assert_eq!(err.message, "is required");
    }

    #[test]
    fn class_membership() {
        let field = Field::class("mood", ["happy", "sad"]);
        assert!(validate_field(&field, Some(&json!("sad"))).is_ok());
        assert_eq!(
            validate_field(&field, Some(&json!("angry"))).unwrap_err().to_string(),
            "mood: must be one of: happy, sad"
        );
    }

    #[test]
    fn collects_all_errors() {
        let fields = vec![Field::string("a"), Field::number("b")];
        let values = json!({"b": "x"});
        let err = validate_values(&fields, values.as_object().unwrap()).unwrap_err();
        assert_eq!(err.fields().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
