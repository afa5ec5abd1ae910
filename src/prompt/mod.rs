//! Prompt rendering.
//!
//! [`PromptRenderer`] turns a [`Signature`] plus either one set of input
//! values or a message history into chat turns. The first turn is always the
//! system turn; rendering is deterministic, so the same inputs always produce
//! the same bytes.

mod system;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use system::FORMAT_PROTECTION;

use crate::defaults;
use crate::error::{LlmError, ValidationError};
use crate::signature::{Field, FieldType, Signature, title_from_name, validate_field};
use crate::types::{ChatTurn, ContentPart, FunctionDefinition, UserContent};

/// How the model is asked to shape its answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `Field Title: value` lines
    #[default]
    Text,
    /// A single JSON object
    Json,
    /// Arguments of the synthetic `__finalResult` function
    FinalResultFunction,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub output_format: OutputFormat,
    /// Name of the optional reasoning field accepted in assistant history turns
    pub thought_field_name: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Text,
            thought_field_name: defaults::prompt::THOUGHT_FIELD_NAME.to_string(),
        }
    }
}

/// A worked example: values for some or all input and output fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Example {
    pub values: Map<String, Value>,
}

impl Example {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Build from a JSON object; other values yield an empty example.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// One turn of a caller-supplied history, expressed as field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub values: Map<String, Value>,
}

impl HistoryTurn {
    pub fn user(values: Map<String, Value>) -> Self {
        Self {
            role: HistoryRole::User,
            values,
        }
    }

    pub fn assistant(values: Map<String, Value>) -> Self {
        Self {
            role: HistoryRole::Assistant,
            values,
        }
    }
}

/// Input to a program: a single value set or a history of turns.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramInput {
    Values(Map<String, Value>),
    History(Vec<HistoryTurn>),
}

impl ProgramInput {
    /// Build from a JSON object; anything else is a configuration error.
    pub fn from_value(value: Value) -> Result<Self, LlmError> {
        match value {
            Value::Object(map) => Ok(Self::Values(map)),
            other => Err(LlmError::config(format!(
                "program input must be a JSON object, got {other}"
            ))),
        }
    }
}

impl From<Map<String, Value>> for ProgramInput {
    fn from(value: Map<String, Value>) -> Self {
        Self::Values(value)
    }
}

impl From<Vec<HistoryTurn>> for ProgramInput {
    fn from(value: Vec<HistoryTurn>) -> Self {
        Self::History(value)
    }
}

/// Rendered prompt split by role in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system: ChatTurn,
    /// Inline demonstration turns, placed before the live turns
    pub examples: Vec<ChatTurn>,
    /// Live user/assistant turns
    pub turns: Vec<ChatTurn>,
}

impl RenderedPrompt {
    /// Flatten into request order. Without live turns only the system turn is returned.
    pub fn into_turns(self) -> Vec<ChatTurn> {
        let mut out = vec![self.system];
        if !self.turns.is_empty() {
            out.extend(self.examples);
            out.extend(self.turns);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct PromptRenderer {
    signature: Signature,
    functions: Vec<FunctionDefinition>,
    examples: Vec<Example>,
    options: RenderOptions,
}

impl PromptRenderer {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            functions: Vec::new(),
            examples: Vec::new(),
            options: RenderOptions::default(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<FunctionDefinition>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_examples(mut self, examples: Vec<Example>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    fn inline_examples(&self) -> bool {
        self.signature.has_complex_fields()
    }

    /// The system prompt text.
    pub fn system_prompt(&self) -> String {
        let embedded: &[Example] = if self.inline_examples() {
            &[]
        } else {
            &self.examples
        };
        system::build(&self.signature, &self.functions, embedded, &self.options)
    }

    /// Render to chat turns: one system turn followed by the conversation.
    pub fn render(&self, input: &ProgramInput) -> Result<Vec<ChatTurn>, LlmError> {
        Ok(self.render_prompt(input)?.into_turns())
    }

    pub fn render_prompt(&self, input: &ProgramInput) -> Result<RenderedPrompt, LlmError> {
        let turns = match input {
            ProgramInput::Values(values) => vec![ChatTurn::User {
                content: self.render_user_content(values)?,
            }],
            ProgramInput::History(history) => self.render_history(history)?,
        };
        let examples = if self.inline_examples() {
            self.examples
                .iter()
                .flat_map(|ex| {
                    [
                        ChatTurn::user(format_lines(self.signature.input_fields(), &ex.values, None)),
                        ChatTurn::assistant(render_output_values(&self.signature, &ex.values, &self.options)),
                    ]
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(RenderedPrompt {
            system: ChatTurn::system(self.system_prompt()),
            examples,
            turns,
        })
    }

    /// Render one input value set as user content, one `Title: value` line per field.
    pub fn render_user_content(&self, values: &Map<String, Value>) -> Result<UserContent, LlmError> {
        let mut parts: Vec<ContentPart> = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        let mut errors = Vec::new();

        for field in self.signature.input_fields() {
            let value = match values.get(&field.name) {
                None | Some(Value::Null) if field.is_optional => continue,
                None | Some(Value::Null) => {
                    return Err(LlmError::missing_field(&field.name, "input values"));
                }
                Some(v) => v,
            };
            if let Err(e) = validate_field(field, Some(value)) {
                errors.push(e);
                continue;
            }
            if field.field_type.is_media() {
                lines.push(format!("{}:", field.title));
                parts.push(ContentPart::text(lines.join("\n")));
                lines.clear();
                parts.extend(media_parts(field, value)?);
            } else {
                lines.push(format!("{}: {}", field.title, format_value(value)));
            }
        }
        if !errors.is_empty() {
            return Err(LlmError::FieldValidation(ValidationError::new(errors)));
        }

        if parts.is_empty() {
            return Ok(UserContent::Text(lines.join("\n")));
        }
        if !lines.is_empty() {
            parts.push(ContentPart::text(lines.join("\n")));
        }
        Ok(UserContent::Parts(parts))
    }

    /// Render an assistant turn from output values, requiring every non-optional output.
    pub fn render_assistant_content(&self, values: &Map<String, Value>) -> Result<String, LlmError> {
        for field in self.signature.output_fields() {
            let absent = values.get(&field.name).is_none_or(Value::is_null);
            if absent && !field.is_optional {
                return Err(LlmError::missing_field(&field.name, "assistant turn"));
            }
        }
        Ok(render_output_values(&self.signature, values, &self.options))
    }

    fn render_history(&self, history: &[HistoryTurn]) -> Result<Vec<ChatTurn>, LlmError> {
        let mut turns = Vec::new();
        let mut pending: Vec<UserContent> = Vec::new();
        for turn in history {
            match turn.role {
                HistoryRole::User => pending.push(self.render_user_content(&turn.values)?),
                HistoryRole::Assistant => {
                    if !pending.is_empty() {
                        turns.push(ChatTurn::User {
                            content: merge_user_contents(std::mem::take(&mut pending)),
                        });
                    }
                    turns.push(ChatTurn::assistant(self.render_assistant_content(&turn.values)?));
                }
            }
        }
        if !pending.is_empty() {
            turns.push(ChatTurn::User {
                content: merge_user_contents(pending),
            });
        }
        Ok(turns)
    }
}

/// Merge consecutive user contents line by line, in order.
fn merge_user_contents(contents: Vec<UserContent>) -> UserContent {
    if contents.iter().all(|c| matches!(c, UserContent::Text(_))) {
        let text = contents
            .iter()
            .map(UserContent::text)
            .collect::<Vec<_>>()
            .join("\n");
        return UserContent::Text(text);
    }
    let mut parts = Vec::new();
    for content in contents {
        match content {
            UserContent::Text(text) => parts.push(ContentPart::text(text)),
            UserContent::Parts(p) => parts.extend(p),
        }
    }
    UserContent::Parts(parts)
}

/// Render a value for a `Title: value` line. Strings are verbatim, everything else compact JSON.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `Title: value` lines for whichever of `fields` are present in `values`.
pub(crate) fn format_lines(fields: &[Field], values: &Map<String, Value>, extra: Option<(&str, &str)>) -> String {
    let mut lines: Vec<String> = fields
        .iter()
        .filter_map(|f| match values.get(&f.name) {
            None | Some(Value::Null) => None,
            Some(_) if f.field_type.is_media() => Some(format!("{}: [{}]", f.title, f.field_type.keyword())),
            Some(v) => Some(format!("{}: {}", f.title, format_value(v))),
        })
        .collect();
    if let Some((title, value)) = extra {
        lines.push(format!("{title}: {value}"));
    }
    lines.join("\n")
}

/// Render output values in the configured format. The thought field, when
/// present, is rendered last; it is never required.
pub(crate) fn render_output_values(signature: &Signature, values: &Map<String, Value>, options: &RenderOptions) -> String {
    let thought_name = options.thought_field_name.as_str();
    let thought = values
        .get(thought_name)
        .filter(|v| !v.is_null() && signature.output_field(thought_name).is_none());
    match options.output_format {
        OutputFormat::Text => {
            let thought_text = thought.map(format_value);
            let thought_title = title_from_name(thought_name);
            format_lines(
                signature.output_fields(),
                values,
                thought_text.as_deref().map(|t| (thought_title.as_str(), t)),
            )
        }
        OutputFormat::Json | OutputFormat::FinalResultFunction => {
            let mut object = Map::new();
            for field in signature.output_fields() {
                if let Some(v) = values.get(&field.name).filter(|v| !v.is_null()) {
                    object.insert(field.name.clone(), v.clone());
                }
            }
            if let Some(t) = thought {
                object.insert(thought_name.to_string(), t.clone());
            }
            Value::Object(object).to_string()
        }
    }
}

fn media_parts(field: &Field, value: &Value) -> Result<Vec<ContentPart>, LlmError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) if field.is_array => items.iter().collect(),
        other => vec![other],
    };
    items.into_iter().map(|item| media_part(field, item)).collect()
}

fn media_part(field: &Field, value: &Value) -> Result<ContentPart, LlmError> {
    let get = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    let missing = |key: &str| LlmError::missing_field(format!("{}.{key}", field.name), "media input");
    Ok(match field.field_type {
        FieldType::Image => ContentPart::Image {
            mime_type: get("mime_type").ok_or_else(|| missing("mime_type"))?,
            data: get("data").ok_or_else(|| missing("data"))?,
            detail: get("detail"),
        },
        FieldType::Audio => ContentPart::Audio {
            data: get("data").ok_or_else(|| missing("data"))?,
            format: get("format").ok_or_else(|| missing("format"))?,
        },
        FieldType::File => ContentPart::File {
            mime_type: get("mime_type").ok_or_else(|| missing("mime_type"))?,
            data: get("data"),
            file_uri: get("file_uri"),
        },
        _ => return Err(LlmError::InternalError(format!("field '{}' is not a media field", field.name))),
    })
}
