//! Output extraction: turning model text or JSON into field values.
//!
//! Text output is split on `Title:` labels at line starts and each value is
//! coerced to its field type. JSON output must be complete
//! and is lightly normalized. Extraction never validates; that is the
//! signature's job.

use serde_json::{Map, Number, Value};

use crate::error::{FieldError, ValidationError};
use crate::signature::{Field, FieldType, Signature, title_from_name};
use crate::streaming::{extract_json_block, parse_partial_json, strip_code_fence};

#[derive(Debug, Clone)]
pub(crate) struct ExtractOptions<'a> {
    /// Labels must match verbatim; no single-field fallback
    pub strict: bool,
    pub thought_field_name: &'a str,
}

struct Target<'a> {
    key: String,
    field: Option<&'a Field>,
    labels: Vec<String>,
}

fn targets<'a>(signature: &'a Signature, opts: &ExtractOptions<'_>) -> Vec<Target<'a>> {
    let mut out: Vec<Target<'a>> = signature
        .output_fields()
        .iter()
        .map(|f| {
            let mut labels = vec![f.title.clone()];
            if !opts.strict && f.name != f.title {
                labels.push(f.name.clone());
            }
            Target {
                key: f.name.clone(),
                field: Some(f),
                labels,
            }
        })
        .collect();
    let thought = opts.thought_field_name;
    if !thought.is_empty() && signature.output_field(thought).is_none() {
        out.push(Target {
            key: thought.to_string(),
            field: None,
            labels: vec![title_from_name(thought), thought.to_string()],
        });
    }
    out
}

fn match_label<'t>(line: &'t str, labels: &[(String, usize)], strict: bool) -> Option<(usize, &'t str)> {
    let candidate = if strict { line } else { line.trim_start() };
    for (label, idx) in labels {
        let Some(head) = candidate.get(..label.len()) else {
            continue;
        };
        let same = if strict {
            head == label
        } else {
            head.eq_ignore_ascii_case(label)
        };
        if !same {
            continue;
        }
        if let Some(value) = candidate[label.len()..].strip_prefix(':') {
            return Some((*idx, value.trim_start()));
        }
    }
    None
}

/// Raw label values in target order. `None` when no label matched at all.
fn split_labels(targets: &[Target<'_>], content: &str, strict: bool) -> Option<Vec<Option<String>>> {
    let mut labels: Vec<(String, usize)> = targets
        .iter()
        .enumerate()
        .flat_map(|(i, t)| t.labels.iter().map(move |l| (l.clone(), i)))
        .collect();
    // Longest first so "Answer Detail" is not taken for "Answer".
    labels.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut values: Vec<Option<String>> = vec![None; targets.len()];
    let mut current: Option<usize> = None;
    let mut found = false;
    for line in content.lines() {
        if let Some((idx, value)) = match_label(line, &labels, strict) {
            found = true;
            current = Some(idx);
            values[idx] = Some(value.to_string());
        } else if let Some(idx) = current {
            if let Some(v) = values[idx].as_mut() {
                v.push('\n');
                v.push_str(line);
            }
        }
    }
    found.then_some(values)
}

/// Extract field values from `Title: value` text.
pub(crate) fn extract_text(
    signature: &Signature,
    content: &str,
    opts: &ExtractOptions<'_>,
) -> Result<Map<String, Value>, ValidationError> {
    let targets = targets(signature, opts);
    let raw = match split_labels(&targets, content, opts.strict) {
        Some(values) => values,
        None => {
            let mut values = vec![None; targets.len()];
            let answer_fields: Vec<usize> = targets
                .iter()
                .enumerate()
                .filter(|(_, t)| t.field.is_some())
                .map(|(i, _)| i)
                .collect();
            if !opts.strict && answer_fields.len() == 1 && !content.trim().is_empty() {
                values[answer_fields[0]] = Some(content.to_string());
            }
            values
        }
    };

    let mut out = Map::new();
    let mut errors = Vec::new();
    for (target, value) in targets.iter().zip(raw) {
        let Some(value) = value else { continue };
        match target.field {
            None => {
                let text = value.trim();
                if !text.is_empty() {
                    out.insert(target.key.clone(), Value::String(text.to_string()));
                }
            }
            Some(field) => match coerce(field, &value) {
                Ok(Some(v)) => {
                    out.insert(target.key.clone(), v);
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            },
        }
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(ValidationError::new(errors))
    }
}

/// Best-effort values from incomplete text, skipping anything that does not coerce yet.
pub(crate) fn extract_partial_text(signature: &Signature, content: &str, opts: &ExtractOptions<'_>) -> Map<String, Value> {
    let targets = targets(signature, opts);
    let Some(raw) = split_labels(&targets, content, opts.strict) else {
        return Map::new();
    };
    let mut out = Map::new();
    for (target, value) in targets.iter().zip(raw) {
        if let (Some(field), Some(value)) = (target.field, value) {
            if let Ok(Some(v)) = coerce(field, &value) {
                out.insert(target.key.clone(), v);
            }
        }
    }
    out
}

/// Parse a complete JSON object answer, tolerating code fences and surrounding prose.
///
/// Truncated JSON is rejected; only streamed chunks go through the repairer.
pub(crate) fn extract_json(content: &str) -> Result<Map<String, Value>, ValidationError> {
    let block = extract_json_block(content).unwrap_or_else(|| content.trim());
    match parse_json_text(block) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(ValidationError::single(FieldError::new(
            "output",
            "must be a single valid JSON object whose keys are the output field names",
        ))),
    }
}

/// Object parsed so far from a streamed JSON answer.
pub(crate) fn extract_partial_json(content: &str) -> Option<Map<String, Value>> {
    let block = extract_json_block(content)?;
    match parse_partial_json(block).value {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Coerce string values of scalar-typed fields in a JSON answer (`"3"` for a number).
pub(crate) fn normalize_json(signature: &Signature, values: &mut Map<String, Value>) {
    for field in signature.output_fields() {
        let Some(slot) = values.get_mut(&field.name) else {
            continue;
        };
        let coercible = matches!(field.field_type, FieldType::Number | FieldType::Boolean);
        match slot {
            Value::String(s) if coercible && !field.is_array => {
                if let Ok(v) = coerce_scalar(field, s) {
                    *slot = v;
                }
            }
            Value::Array(items) if coercible && field.is_array => {
                for item in items.iter_mut() {
                    if let Value::String(s) = item {
                        if let Ok(v) = coerce_scalar(field, s) {
                            *item = v;
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn parse_json_text(text: &str) -> Option<Value> {
    let text = strip_code_fence(text);
    serde_json::from_str(text).ok()
}

/// Coerce one raw label value. Blank values are treated as absent.
pub(crate) fn coerce(field: &Field, raw: &str) -> Result<Option<Value>, FieldError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if field.is_array {
        return coerce_array(field, text).map(Some);
    }
    coerce_scalar(field, text).map(Some)
}

fn list_item(line: &str) -> Option<&str> {
    let line = line.trim();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(item) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(item.trim());
        }
    }
    None
}

fn coerce_array(field: &Field, text: &str) -> Result<Value, FieldError> {
    let unfenced = strip_code_fence(text);
    if unfenced.starts_with('[') {
        let Some(Value::Array(items)) = parse_json_text(unfenced) else {
            return Err(FieldError::new(&field.name, "must be a JSON array"));
        };
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            out.push(match item {
                Value::String(s) if !is_textual(&field.field_type) => coerce_scalar(field, &s)
                    .map_err(|e| FieldError::new(format!("{}[{i}]", field.name), e.message))?,
                other => other,
            });
        }
        return Ok(Value::Array(out));
    }

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let items: Vec<&str> = if lines.iter().all(|l| list_item(l).is_some()) {
        lines.iter().filter_map(|l| list_item(l)).collect()
    } else if lines.len() == 1 && splits_on_comma(&field.field_type) {
        lines[0].split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
    } else {
        lines.iter().map(|l| l.trim()).collect()
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            coerce_scalar(field, item)
                .map_err(|e| FieldError::new(format!("{}[{i}]", field.name), e.message))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn splits_on_comma(ty: &FieldType) -> bool {
    matches!(
        ty,
        FieldType::Number | FieldType::Boolean | FieldType::Class { .. }
    )
}

fn is_textual(ty: &FieldType) -> bool {
    !matches!(
        ty,
        FieldType::Number | FieldType::Boolean | FieldType::Json | FieldType::Object { .. }
    )
}

fn coerce_scalar(field: &Field, text: &str) -> Result<Value, FieldError> {
    let text = text.trim();
    match &field.field_type {
        FieldType::Number => parse_number(text)
            .ok_or_else(|| FieldError::new(&field.name, format!("must be a number, got '{text}'"))),
        FieldType::Boolean => match text.to_ascii_lowercase().trim_end_matches('.') {
            "true" | "yes" => Ok(Value::Bool(true)),
            "false" | "no" => Ok(Value::Bool(false)),
            _ => Err(FieldError::new(&field.name, format!("must be true or false, got '{text}'"))),
        },
        FieldType::Json | FieldType::Object { .. } => parse_json_text(text)
            .ok_or_else(|| FieldError::new(&field.name, "must be valid JSON")),
        FieldType::Code => Ok(Value::String(strip_code_fence(text).to_string())),
        FieldType::Class { options } => {
            let cleaned = text.trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
            let matched = options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(cleaned))
                .cloned()
                .unwrap_or_else(|| cleaned.to_string());
            Ok(Value::String(matched))
        }
        _ => Ok(Value::String(text.to_string())),
    }
}

fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim_end_matches('.');
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Drop internal fields, unknown keys and, unless requested, the thought.
pub(crate) fn finalize_output(
    signature: &Signature,
    mut values: Map<String, Value>,
    keep_thought: Option<&str>,
) -> Map<String, Value> {
    values.retain(|key, value| match signature.output_field(key) {
        Some(field) => !field.is_internal && !value.is_null(),
        None => keep_thought == Some(key.as_str()),
    });
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(strict: bool) -> ExtractOptions<'static> {
        ExtractOptions {
            strict,
            thought_field_name: "thought",
        }
    }

    #[test]
    fn splits_labels_and_coerces_types() {
        let sig = Signature::parse(
            r#"q -> answer, answerDetail?, score:number, ok:boolean, tags:string[], meta?:json"#,
        )
        .unwrap();
        let text = "Thought: think first\nAnswer: Paris\nAnswer Detail: capital\nof France\nScore: 4.5\nOk: yes\nTags:\n- a\n- b\nMeta: ```json\n{\"x\": 1}\n```";
        let values = extract_text(&sig, text, &opts(false)).unwrap();
        assert_eq!(values["answer"], json!("Paris"));
        assert_eq!(values["answerDetail"], json!("capital\nof France"));
        assert_eq!(values["score"], json!(4.5));
        assert_eq!(values["ok"], json!(true));
        assert_eq!(values["tags"], json!(["a", "b"]));
        assert_eq!(values["meta"], json!({"x": 1}));
        assert_eq!(values["thought"], json!("think first"));
    }

    #[test]
    fn lenient_labels_and_single_field_fallback() {
        let sig = Signature::parse("q -> answer").unwrap();
        let values = extract_text(&sig, "  answer: 42", &opts(false)).unwrap();
        assert_eq!(values["answer"], json!("42"));

        let values = extract_text(&sig, "Just the answer", &opts(false)).unwrap();
        assert_eq!(values["answer"], json!("Just the answer"));

        let strict = extract_text(&sig, "Just the answer", &opts(true)).unwrap();
        assert!(strict.is_empty());
        let strict = extract_text(&sig, "answer: x", &opts(true)).unwrap();
        assert!(strict.is_empty());
    }

    #[test]
    fn coercion_failures_are_field_errors() {
        let sig = Signature::parse("q -> n:number, b:boolean").unwrap();
        let err = extract_text(&sig, "N: many\nB: perhaps", &opts(false)).unwrap_err();
        let fields: Vec<&str> = err.fields().collect();
        assert_eq!(fields, vec!["n", "b"]);
    }

    #[test]
    fn arrays_from_json_or_lists() {
        let sig = Signature::parse("q -> n:number[], c:class[] \"red, blue\"").unwrap();
        let values = extract_text(&sig, "N: [1, \"2\", 3]\nC: Red, BLUE", &opts(false)).unwrap();
        assert_eq!(values["n"], json!([1, 2, 3]));
        assert_eq!(values["c"], json!(["red", "blue"]));

        let values = extract_text(&sig, "N:\n1. 4\n2. 5", &opts(false)).unwrap();
        assert_eq!(values["n"], json!([4, 5]));
    }

    #[test]
    fn json_answers() {
        let sig = Signature::parse("q -> n:number, b:boolean").unwrap();
        let mut values = extract_json("Sure!\n```json\n{\"n\": \"7\", \"b\": true}\n```").unwrap();
        normalize_json(&sig, &mut values);
        assert_eq!(values, json!({"n": 7, "b": true}).as_object().cloned().unwrap());

        assert!(extract_json(r#"{"n": 1, "b":"#).is_err());
        assert!(extract_json(r#"{"items": [{"name": "apple"}, {"name": "pe"#).is_err());
        assert!(extract_json("no json here").is_err());
        assert!(extract_json("[1, 2]").is_err());
    }

    #[test]
    fn partial_extraction() {
        let sig = Signature::parse("q -> answer, n:number").unwrap();
        let values = extract_partial_text(&sig, "Answer: Par", &opts(false));
        assert_eq!(values["answer"], json!("Par"));
        assert_eq!(
            extract_partial_json(r#"{"answer": "Pa"#).unwrap()["answer"],
            json!("Pa")
        );
        assert!(extract_partial_json("").is_none());
    }

    #[test]
    fn finalize_drops_internal_and_unknown_keys() {
        let sig = Signature::parse("q -> answer, scratch!").unwrap();
        let values = json!({"answer": "a", "scratch": "s", "thought": "t", "extra": 1})
            .as_object()
            .cloned()
            .unwrap();
        let out = finalize_output(&sig, values.clone(), None);
        assert_eq!(out, json!({"answer": "a"}).as_object().cloned().unwrap());
        let out = finalize_output(&sig, values, Some("thought"));
        assert_eq!(out["thought"], json!("t"));
    }
}
