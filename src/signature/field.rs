//! Field declarations.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Type of a signature field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// `YYYY-MM-DD`
    Date,
    /// RFC 3339, or `YYYY-MM-DD HH:MM[:SS]`
    DateTime,
    Url,
    Email,
    /// Source code; fences are stripped on extraction
    Code,
    /// Any JSON value
    Json,
    /// One of a fixed set of labels
    Class { options: Vec<String> },
    /// Nested object with its own fields
    Object { fields: Vec<Field> },
    Image,
    Audio,
    File,
}

impl FieldType {
    pub fn class<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Class {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    pub fn object(fields: Vec<Field>) -> Self {
        Self::Object { fields }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::Audio | Self::File)
    }

    /// DSL keyword for the type.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Url => "url",
            Self::Email => "email",
            Self::Code => "code",
            Self::Json => "json",
            Self::Class { .. } => "class",
            Self::Object { .. } => "object",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }

    /// Parse a DSL keyword. `class` and `object` carry data and are handled by the parser.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "url" => Self::Url,
            "email" => Self::Email,
            "code" => Self::Code,
            "json" => Self::Json,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "file" => Self::File,
            _ => return None,
        })
    }
}

/// Value bounds attached to a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Human-readable meaning of `pattern`; required whenever a pattern is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One named input or output of a signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Rendered label; derived from the name unless set explicitly
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub is_optional: bool,
    /// Output-only: validated, then stripped from the returned output
    #[serde(default)]
    pub is_internal: bool,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    #[serde(skip)]
    pub(crate) compiled_pattern: Option<Regex>,
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.title == other.title
            && self.description == other.description
            && self.field_type == other.field_type
            && self.is_array == other.is_array
            && self.is_optional == other.is_optional
            && self.is_internal == other.is_internal
            && self.constraints == other.constraints
    }
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            title: title_from_name(&name),
            name,
            description: None,
            field_type,
            is_array: false,
            is_optional: false,
            is_internal: false,
            constraints: Constraints::default(),
            compiled_pattern: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn class<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, FieldType::class(options))
    }

    pub fn object(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::new(name, FieldType::object(fields))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.is_internal = true;
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.constraints.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.constraints.max_length = Some(n);
        self
    }

    pub fn minimum(mut self, n: f64) -> Self {
        self.constraints.minimum = Some(n);
        self
    }

    pub fn maximum(mut self, n: f64) -> Self {
        self.constraints.maximum = Some(n);
        self
    }

    /// Regex the value must match. Pair it with [`Field::pattern_description`].
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.constraints.pattern = Some(pattern.into());
        self
    }

    pub fn pattern_description(mut self, description: impl Into<String>) -> Self {
        self.constraints.pattern_description = Some(description.into());
        self
    }

    /// Whether this field holds an object or an array of objects.
    pub fn is_structured(&self) -> bool {
        matches!(self.field_type, FieldType::Object { .. })
    }

    /// Human-readable type description used in prompts, e.g. `array of numbers`.
    pub fn type_label(&self) -> String {
        let base = match &self.field_type {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean (true or false)",
            FieldType::Date => "date (YYYY-MM-DD)",
            FieldType::DateTime => "datetime (ISO 8601)",
            FieldType::Url => "URL",
            FieldType::Email => "email address",
            FieldType::Code => "code",
            FieldType::Json => "JSON",
            FieldType::Class { .. } => "class",
            FieldType::Object { .. } => "object",
            FieldType::Image => "image",
            FieldType::Audio => "audio",
            FieldType::File => "file",
        };
        if self.is_array {
            format!("array of {base} items")
        } else {
            base.to_string()
        }
    }

    /// Constraint hints appended to the field's description in prompts.
    pub fn constraint_hints(&self) -> Vec<String> {
        let c = &self.constraints;
        let mut hints = Vec::new();
        if let FieldType::Class { options } = &self.field_type {
            hints.push(format!("one of: {}", options.join(", ")));
        }
        match (c.min_length, c.max_length) {
            (Some(min), Some(max)) => hints.push(format!("length between {min} and {max} characters")),
            (Some(min), None) => hints.push(format!("at least {min} characters")),
            (None, Some(max)) => hints.push(format!("at most {max} characters")),
            (None, None) => {}
        }
        match (c.minimum, c.maximum) {
            (Some(min), Some(max)) => hints.push(format!("between {min} and {max}")),
            (Some(min), None) => hints.push(format!("minimum {min}")),
            (None, Some(max)) => hints.push(format!("maximum {max}")),
            (None, None) => {}
        }
        if let Some(desc) = &c.pattern_description {
            hints.push(format!("must be {desc}"));
        }
        hints
    }
}

/// Derive a display title from a field name.
///
/// `userQuestion`, `user_question` and `UserQuestion` all become `User Question`;
/// acronyms stay together (`sourceURL` becomes `Source URL`).
pub fn title_from_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
        .into_iter()
        .map(|w| {
            let mut it = w.chars();
            match it.next() {
                Some(first) => first.to_uppercase().chain(it).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for Field {
    /// DSL form: `name?!:type[] "description"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.is_optional {
            f.write_str("?")?;
        }
        if self.is_internal {
            f.write_str("!")?;
        }
        write!(f, ":{}", self.field_type.keyword())?;
        if self.is_array {
            f.write_str("[]")?;
        }
        if let FieldType::Class { options } = &self.field_type {
            write!(f, " {}", quote(&options.join(", ")))?;
        }
        if let Some(desc) = &self.description {
            write!(f, " {}", quote(desc))?;
        }
        Ok(())
    }
}

pub(crate) fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_from_names() {
        assert_eq!(title_from_name("userQuestion"), "User Question");
        assert_eq!(title_from_name("user_question"), "User Question");
        assert_eq!(title_from_name("question"), "Question");
        assert_eq!(title_from_name("sourceURL"), "Source URL");
        assert_eq!(title_from_name("HTTPStatus"), "HTTP Status");
        assert_eq!(title_from_name("step2Result"), "Step2 Result");
    }

    #[test]
    fn constraint_hints_read_naturally() {
        let field = Field::string("code")
            .min_length(2)
            .max_length(4)
            .pattern("^[A-Z]+$")
            .pattern_description("uppercase letters only");
        assert_eq!(
            field.constraint_hints(),
            vec![
                "length between 2 and 4 characters".to_string(),
                "must be uppercase letters only".to_string()
            ]
        );
        let class = Field::class("mood", ["happy", "sad"]);
        assert_eq!(class.constraint_hints(), vec!["one of: happy, sad".to_string()]);
    }

    #[test]
    fn display_uses_dsl_syntax() {
        let field = Field::class("labels", ["a", "b"])
            .array()
            .optional()
            .with_description("Pick \"all\" that apply");
        assert_eq!(
            field.to_string(),
            r#"labels?:class[] "a, b" "Pick \"all\" that apply""#
        );
    }
}
