//! Buffered responses, finish reasons and token usage.

use serde::{Deserialize, Serialize};

use super::chat::FunctionCall;

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Completed naturally or hit a stop sequence
    Stop,
    /// Hit the token limit
    Length,
    /// Pending function calls
    FunctionCall,
    /// Blocked by the service's content filter
    ContentFilter,
    Other(String),
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            reasoning_tokens: None,
        }
    }

    /// Add another call's usage into this one.
    pub fn merge(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.reasoning_tokens = match (self.reasoning_tokens, other.reasoning_tokens) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }
}

/// One candidate of a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl CandidateResult {
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty) && self.function_calls.is_empty()
    }
}

/// A buffered model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub results: Vec<CandidateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatResponse {
    /// Single-candidate text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            results: vec![CandidateResult {
                content: Some(content.into()),
                finish_reason: Some(FinishReason::Stop),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Single-candidate response requesting function calls.
    pub fn function_calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            results: vec![CandidateResult {
                function_calls: calls,
                finish_reason: Some(FinishReason::FunctionCall),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        if let Some(first) = self.results.first_mut() {
            first.thought = Some(thought.into());
        }
        self
    }

    pub fn first(&self) -> Option<&CandidateResult> {
        self.results.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_merge_sums_counters() {
        let mut total = Usage::new(10, 5);
        total.merge(&Usage {
            reasoning_tokens: Some(3),
            ..Usage::new(7, 2)
        });
        assert_eq!(total.prompt_tokens, 17);
        assert_eq!(total.completion_tokens, 7);
        assert_eq!(total.total_tokens, 24);
        assert_eq!(total.reasoning_tokens, Some(3));
    }

    #[test]
    fn empty_candidate() {
        assert!(CandidateResult::default().is_empty());
        assert!(!ChatResponse::text("hi").results[0].is_empty());
    }
}
