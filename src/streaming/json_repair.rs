//! Best-effort completion of truncated JSON.
//!
//! Streaming structured output arrives as prefixes of a JSON document. This
//! module closes those prefixes so each chunk boundary can yield a partial value.
//!
//! Repair rules, applied after a failed strict parse:
//! - an escape or `\u` sequence cut off inside a string is dropped and the string closed
//! - trailing commas are dropped
//! - a dangling `"key":` (or an object key with no colon yet) is dropped with its comma
//! - a trailing exponent/decimal/sign fragment of a number is stripped
//! - a truncated `true`/`false`/`null` in value position is completed
//! - open arrays and objects are closed innermost first
//!
//! Mismatched closers are never repaired.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the text was cut off, computed before any repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationMarker {
    pub nesting_level: usize,
    pub in_string: bool,
    pub in_array: bool,
    pub in_object: bool,
}

/// Result of [`parse_partial_json`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialJson {
    /// Parsed value, or `None` when the text cannot be repaired yet
    pub value: Option<Value>,
    /// `None` when the text was already complete JSON
    pub marker: Option<TruncationMarker>,
}

impl PartialJson {
    pub fn is_complete(&self) -> bool {
        self.value.is_some() && self.marker.is_none()
    }
}

#[derive(Debug, Default)]
struct ScanState {
    stack: Vec<u8>,
    in_string: bool,
    escape: bool,
    escape_start: usize,
    unicode_pending: usize,
    string_start: Option<usize>,
    mismatched: bool,
}

impl ScanState {
    fn marker(&self) -> TruncationMarker {
        TruncationMarker {
            nesting_level: self.stack.len(),
            in_string: self.in_string,
            in_array: self.stack.last() == Some(&b'['),
            in_object: self.stack.last() == Some(&b'{'),
        }
    }
}

fn scan(text: &str) -> ScanState {
    let mut st = ScanState::default();
    for (i, &b) in text.as_bytes().iter().enumerate() {
        if st.in_string {
            if st.unicode_pending > 0 {
                if b.is_ascii_hexdigit() {
                    st.unicode_pending -= 1;
                    continue;
                }
                st.unicode_pending = 0;
            }
            if st.escape {
                st.escape = false;
                if b == b'u' {
                    st.unicode_pending = 4;
                }
                continue;
            }
            match b {
                b'\\' => {
                    st.escape = true;
                    st.escape_start = i;
                }
                b'"' => st.in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => {
                st.in_string = true;
                st.string_start = Some(i);
            }
            b'{' | b'[' => st.stack.push(b),
            b'}' | b']' => {
                let open = if b == b'}' { b'{' } else { b'[' };
                if st.stack.pop() != Some(open) {
                    st.mismatched = true;
                    break;
                }
            }
            _ => {}
        }
    }
    st
}

fn trim_end_in_place(s: &mut String) {
    let len = s.trim_end().len();
    s.truncate(len);
}

/// Position of the cut that removes a trailing numeric fragment, if any.
fn number_fragment_cut(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut start = bytes.len();
    while start > 0 && matches!(bytes[start - 1], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
        start -= 1;
    }
    if start == bytes.len() || !(bytes[start].is_ascii_digit() || bytes[start] == b'-') {
        return None;
    }
    let mut end = bytes.len();
    while end > start && matches!(bytes[end - 1], b'-' | b'+' | b'.' | b'e' | b'E') {
        end -= 1;
    }
    (end < bytes.len()).then_some(end)
}

/// Completion suffix for a truncated literal in value position.
fn literal_completion(s: &str, innermost: Option<u8>) -> Option<&'static str> {
    let head_len = s.trim_end_matches(|c: char| c.is_ascii_lowercase()).len();
    let partial = &s[head_len..];
    if partial.is_empty() {
        return None;
    }
    let full = ["true", "false", "null"]
        .into_iter()
        .find(|lit| lit.len() > partial.len() && lit.starts_with(partial))?;
    let value_position = match s[..head_len].trim_end().chars().last()? {
        ':' | '[' => true,
        ',' => innermost == Some(b'['),
        _ => false,
    };
    value_position.then(|| &full[partial.len()..])
}

/// Whether the string literal starting at `start` sits where an object key goes.
fn is_key_position(s: &str, start: usize, innermost: Option<u8>) -> bool {
    innermost == Some(b'{') && s[..start].trim_end().ends_with(['{', ','])
}

fn repair_text(text: &str) -> Option<String> {
    let st = scan(text);
    if st.mismatched {
        return None;
    }

    let mut out = text.to_string();
    if st.in_string {
        if st.escape || st.unicode_pending > 0 {
            out.truncate(st.escape_start);
        }
        out.push('"');
    }

    loop {
        trim_end_in_place(&mut out);
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.pop();
            trim_end_in_place(&mut out);
            if !out.ends_with('"') {
                return None;
            }
            continue;
        }
        if let Some(cut) = number_fragment_cut(&out) {
            out.truncate(cut);
            continue;
        }
        let st = scan(&out);
        if st.mismatched {
            return None;
        }
        let innermost = st.stack.last().copied();
        if let Some(suffix) = literal_completion(&out, innermost) {
            out.push_str(suffix);
            continue;
        }
        if out.ends_with('"') && !st.in_string {
            if let Some(start) = st.string_start.filter(|&s| is_key_position(&out, s, innermost)) {
                out.truncate(start);
                trim_end_in_place(&mut out);
                if out.ends_with(',') {
                    out.pop();
                }
                continue;
            }
        }
        break;
    }

    let st = scan(&out);
    if st.mismatched || st.in_string {
        return None;
    }
    for open in st.stack.iter().rev() {
        out.push(if *open == b'{' { '}' } else { ']' });
    }
    Some(out)
}

/// Parse possibly-truncated JSON.
///
/// Complete JSON takes the fast path and reports no marker. Otherwise the
/// text is repaired and re-parsed; `value` is `None` when that fails and the
/// caller should wait for more bytes.
pub fn parse_partial_json(text: &str) -> PartialJson {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return PartialJson {
            value: Some(value),
            marker: None,
        };
    }
    let marker = scan(text).marker();
    let value = repair_text(text).and_then(|r| serde_json::from_str(&r).ok());
    if value.is_none() {
        tracing::trace!(len = text.len(), ?marker, "partial JSON not repairable yet");
    }
    PartialJson {
        value,
        marker: Some(marker),
    }
}

/// Repair truncated JSON text.
///
/// Valid JSON and unrepairable text are returned unchanged, so repairing
/// twice gives the same result as repairing once.
pub fn repair_json(text: &str) -> String {
    if serde_json::from_str::<Value>(text).is_ok() {
        return text.to_string();
    }
    match repair_text(text) {
        Some(repaired) if serde_json::from_str::<Value>(&repaired).is_ok() => repaired,
        _ => text.to_string(),
    }
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Extract the first JSON object or array from free text.
///
/// Finds the first `{` or `[` and returns the text up to its balanced closer,
/// or to the end of input when the block is still open.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let text = strip_code_fence(text);
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;
    for (i, b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            match (escape, b) {
                (true, _) => escape = false,
                (false, b'\\') => escape = true,
                (false, b'"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn parsed(text: &str) -> Option<Value> {
        parse_partial_json(text).value
    }

    #[test]
    fn dangling_key_is_dropped() {
        let repaired = repair_json(r#"{"a": 1, "b":"#);
        assert_eq!(serde_json::from_str::<Value>(&repaired).unwrap(), json!({"a": 1}));
        assert_eq!(parsed(r#"{"a": 1, "b":"#), Some(json!({"a": 1})));
    }

    #[test]
    fn first_key_dangling_keeps_brace() {
        assert_eq!(parsed(r#"{"key":"#), Some(json!({})));
        assert_eq!(parsed(r#"{"ke"#), Some(json!({})));
        assert_eq!(parsed(r#"{"a": 1, "b""#), Some(json!({"a": 1})));
    }

    #[test]
    fn complete_json_has_no_marker() {
        let result = parse_partial_json(r#"{"a": [1, 2]}"#);
        assert!(result.is_complete());
        assert_eq!(result.marker, None);
    }

    #[test]
    fn marker_describes_truncation_point() {
        let result = parse_partial_json(r#"{"items": [{"name": "ap"#);
        assert_eq!(
            result.marker,
            Some(TruncationMarker {
                nesting_level: 3,
                in_string: true,
                in_array: false,
                in_object: true,
            })
        );
        assert_eq!(result.value, Some(json!({"items": [{"name": "ap"}]})));
    }

    #[test]
    fn trailing_comma_and_open_array() {
        assert_eq!(parsed("[1, 2,"), Some(json!([1, 2])));
        assert_eq!(parsed(r#"{"a": [1, 2"#), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn numeric_fragments_are_stripped() {
        assert_eq!(parsed(r#"{"a": 1.5e-"#), Some(json!({"a": 1.5})));
        assert_eq!(parsed("[3."), Some(json!([3])));
        assert_eq!(parsed(r#"{"a": -"#), Some(json!({})));
    }

    #[test]
    fn literals_complete_only_in_value_position() {
        assert_eq!(parsed(r#"{"ok": tr"#), Some(json!({"ok": true})));
        assert_eq!(parsed("[fal"), Some(json!([false])));
        assert_eq!(parsed("[1, nu"), Some(json!([1, null])));
        assert_eq!(parsed("tr"), None);
    }

    #[test]
    fn truncated_escapes_are_dropped() {
        assert_eq!(parsed(r#"{"a": "x\"#), Some(json!({"a": "x"})));
        assert_eq!(parsed(r#"{"a": "x\u00"#), Some(json!({"a": "x"})));
        assert_eq!(parsed(r#"["a\"b"#), Some(json!(["a\"b"])));
    }

    #[test]
    fn mismatched_closers_are_not_repaired() {
        let result = parse_partial_json(r#"{"a": [1}"#);
        assert_eq!(result.value, None);
        assert!(result.marker.is_some());
        assert_eq!(repair_json(r#"{"a": [1}"#), r#"{"a": [1}"#);
    }

    #[test]
    fn unrepairable_text_is_returned_unchanged() {
        assert_eq!(repair_json("hello"), "hello");
        assert_eq!(parsed(""), None);
    }

    #[test]
    fn code_fences_and_blocks() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(
            extract_json_block("Here you go: {\"a\": {\"b\": 2}} thanks"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(extract_json_block("partial [1, 2"), Some("[1, 2"));
        assert_eq!(extract_json_block("no json"), None);
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            prop::collection::vec(any::<char>(), 0..12)
                .prop_map(|chars| Value::String(chars.into_iter().collect())),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn repair_is_idempotent(text in ".{0,40}") {
            let once = repair_json(&text);
            prop_assert_eq!(repair_json(&once), once);
        }

        #[test]
        fn valid_json_round_trips(value in json_value()) {
            let text = serde_json::to_string(&value).unwrap();
            let result = parse_partial_json(&text);
            prop_assert_eq!(result.value, Some(value));
            prop_assert_eq!(result.marker, None);
        }

        #[test]
        fn prefixes_of_valid_json_never_panic(value in json_value(), cut in 0usize..64) {
            let text = serde_json::to_string(&value).unwrap();
            let mut end = cut.min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            let _ = parse_partial_json(&text[..end]);
            let once = repair_json(&text[..end]);
            prop_assert_eq!(repair_json(&once), once);
        }
    }
}
