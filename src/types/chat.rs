//! Conversation turns and the content they carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Function,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Function => "function",
        };
        f.write_str(s)
    }
}

/// One multimodal content part of a user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// MIME type, e.g. `image/png`
        mime_type: String,
        /// Base64 payload
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Audio {
        /// Base64 payload
        data: String,
        /// Container format, e.g. `wav`
        format: String,
    },
    File {
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_uri: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }
}

/// Content of a user turn: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl UserContent {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn parts(&self) -> &[ContentPart] {
        match self {
            Self::Text(_) => &[],
            Self::Parts(parts) => parts,
        }
    }
}

impl From<String> for UserContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for UserContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Arguments of a pending function call as delivered by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionArguments {
    /// Raw JSON text (possibly empty)
    Raw(String),
    /// Already-decoded value
    Value(Value),
}

impl FunctionArguments {
    /// Decode the arguments.
    ///
    /// A non-empty raw string is parsed as JSON; an empty one and decoded
    /// values are used as-is.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Raw(s) if s.trim().is_empty() => Ok(Value::String(s.clone())),
            Self::Raw(s) => serde_json::from_str(s),
            Self::Value(v) => Ok(v.clone()),
        }
    }

    /// Textual form suitable for echoing back in a request.
    pub fn as_text(&self) -> String {
        match self {
            Self::Raw(s) => s.clone(),
            Self::Value(v) => v.to_string(),
        }
    }
}

impl Default for FunctionArguments {
    fn default() -> Self {
        Self::Raw(String::new())
    }
}

impl From<Value> for FunctionArguments {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: FunctionArguments,
}

impl FunctionCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<FunctionArguments>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn raw(id: impl Into<String>, name: impl Into<String>, arguments: &str) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            arguments: FunctionArguments::Raw(arguments.to_string()),
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatTurn {
    System {
        content: String,
    },
    User {
        content: UserContent,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        function_calls: Vec<FunctionCall>,
    },
    Function {
        function_id: String,
        result: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<UserContent>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::User {
            content: UserContent::Parts(parts),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            function_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(content: Option<String>, function_calls: Vec<FunctionCall>) -> Self {
        Self::Assistant {
            content,
            function_calls,
        }
    }

    pub fn function_result(function_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self::Function {
            function_id: function_id.into(),
            result: result.into(),
            is_error: false,
        }
    }

    pub fn function_error(function_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            function_id: function_id.into(),
            result: message.into(),
            is_error: true,
        }
    }

    pub fn role(&self) -> TurnRole {
        match self {
            Self::System { .. } => TurnRole::System,
            Self::User { .. } => TurnRole::User,
            Self::Assistant { .. } => TurnRole::Assistant,
            Self::Function { .. } => TurnRole::Function,
        }
    }

    /// Text of the turn, if it carries any.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::System { content } => Some(content.clone()),
            Self::User { content } => Some(content.text()),
            Self::Assistant { content, .. } => content.clone(),
            Self::Function { result, .. } => Some(result.clone()),
        }
    }

    pub fn function_calls(&self) -> &[FunctionCall] {
        match self {
            Self::Assistant { function_calls, .. } => function_calls,
            _ => &[],
        }
    }
}
