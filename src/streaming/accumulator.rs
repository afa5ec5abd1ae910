//! Stream accumulation as an explicit fold.
//!
//! One [`StreamState`] belongs to one model call; `fold` consumes it and an
//! event and returns the next state.

use std::collections::BTreeMap;

use serde_json::Value;

use super::json_repair::parse_partial_json;
use crate::error::LlmError;
use crate::types::{
    CandidateResult, ChatStreamEvent, FinishReason, FunctionArguments, FunctionCall, Usage,
};

/// A function call assembled from fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialFunctionCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

impl PartialFunctionCall {
    /// Arguments parsed so far, repairing truncated JSON.
    pub fn partial_arguments(&self) -> Option<Value> {
        if self.arguments.trim().is_empty() {
            return None;
        }
        parse_partial_json(&self.arguments).value
    }
}

/// Accumulated state of one streamed model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    pub content: String,
    pub thought: String,
    pub calls: BTreeMap<usize, PartialFunctionCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    pub finished: bool,
}

impl StreamState {
    /// Apply one event.
    pub fn fold(mut self, event: ChatStreamEvent) -> Result<Self, LlmError> {
        match event {
            ChatStreamEvent::ContentDelta { delta, index } => {
                if index.unwrap_or(0) == 0 {
                    self.content.push_str(&delta);
                }
            }
            ChatStreamEvent::ThinkingDelta { delta } => self.thought.push_str(&delta),
            ChatStreamEvent::FunctionCallDelta {
                index,
                id,
                function_name,
                arguments_delta,
            } => {
                let call = self.calls.entry(index).or_default();
                if id.is_some() {
                    call.id = id;
                }
                if let Some(name) = function_name {
                    call.name.push_str(&name);
                }
                if let Some(args) = arguments_delta {
                    call.arguments.push_str(&args);
                }
            }
            // Providers report cumulative usage; the latest figure replaces the previous one.
            ChatStreamEvent::UsageUpdate { usage } => self.usage = Some(usage),
            ChatStreamEvent::StreamEnd { finish_reason } => {
                if finish_reason.is_some() {
                    self.finish_reason = finish_reason;
                }
                self.finished = true;
            }
            ChatStreamEvent::Error { error } => return Err(LlmError::ServiceError(error)),
        }
        Ok(self)
    }

    /// Completed function calls in index order.
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.calls
            .values()
            .map(|c| FunctionCall {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: FunctionArguments::Raw(c.arguments.clone()),
            })
            .collect()
    }

    /// Freeze into a candidate result.
    pub fn into_candidate(self) -> CandidateResult {
        let function_calls = self.function_calls();
        let finish_reason = self.finish_reason.or_else(|| {
            Some(if function_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::FunctionCall
            })
        });
        CandidateResult {
            index: 0,
            content: (!self.content.is_empty()).then_some(self.content),
            thought: (!self.thought.is_empty()).then_some(self.thought),
            function_calls,
            finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_delta(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> ChatStreamEvent {
        ChatStreamEvent::FunctionCallDelta {
            index,
            id: id.map(str::to_string),
            function_name: name.map(str::to_string),
            arguments_delta: Some(args.to_string()),
        }
    }

    #[test]
    fn fragments_accumulate_by_index() {
        let events = vec![
            call_delta(1, Some("b"), Some("second"), "{\"x\""),
            call_delta(0, Some("a"), Some("first"), "{\"q\": \"he"),
            call_delta(1, None, None, ": 2}"),
            call_delta(0, None, None, "llo\"}"),
        ];
        let state = events
            .into_iter()
            .try_fold(StreamState::default(), StreamState::fold)
            .unwrap();
        let calls = state.function_calls();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[0].arguments.to_value().unwrap(), json!({"q": "hello"}));
        assert_eq!(calls[1].id.as_deref(), Some("b"));
        assert_eq!(
            state.into_candidate().finish_reason,
            Some(FinishReason::FunctionCall)
        );
    }

    #[test]
    fn partial_arguments_are_repaired() {
        let state = StreamState::default()
            .fold(call_delta(0, Some("a"), Some("f"), "{\"city\": \"Par"))
            .unwrap();
        assert_eq!(
            state.calls[&0].partial_arguments(),
            Some(json!({"city": "Par"}))
        );
    }

    #[test]
    fn usage_is_replaced_not_summed() {
        let state = StreamState::default()
            .fold(ChatStreamEvent::UsageUpdate {
                usage: Usage::new(10, 2),
            })
            .unwrap()
            .fold(ChatStreamEvent::UsageUpdate {
                usage: Usage::new(10, 7),
            })
            .unwrap();
        assert_eq!(state.usage, Some(Usage::new(10, 7)));
    }

    #[test]
    fn in_band_error_fails_the_fold() {
        let err = StreamState::default()
            .fold(ChatStreamEvent::Error {
                error: "overloaded".into(),
            })
            .unwrap_err();
        assert!(matches!(err, LlmError::ServiceError(m) if m == "overloaded"));
    }

    #[test]
    fn other_candidates_are_ignored() {
        let state = StreamState::default()
            .fold(ChatStreamEvent::ContentDelta {
                delta: "keep".into(),
                index: Some(0),
            })
            .unwrap()
            .fold(ChatStreamEvent::ContentDelta {
                delta: "drop".into(),
                index: Some(1),
            })
            .unwrap();
        assert_eq!(state.content, "keep");
    }
}
