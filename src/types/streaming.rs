//! Streaming event types for incremental responses

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use super::response::{ChatResponse, FinishReason, Usage};
use crate::error::LlmError;

/// Chat streaming event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatStreamEvent {
    /// Incremental text
    ContentDelta {
        delta: String,
        /// Candidate index; only candidate 0 is consumed
        index: Option<usize>,
    },
    /// Function call fragment, accumulated by `index`
    FunctionCallDelta {
        index: usize,
        /// Present on the first fragment of a call
        id: Option<String>,
        function_name: Option<String>,
        arguments_delta: Option<String>,
    },
    /// Reasoning text
    ThinkingDelta { delta: String },
    /// Usage so far. Replaces any earlier figure for the same call.
    UsageUpdate { usage: Usage },
    /// Stream finished
    StreamEnd { finish_reason: Option<FinishReason> },
    /// Error reported in-band by the service
    Error { error: String },
}

/// Stream of chat events produced by a model service.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent, LlmError>> + Send>>;

/// Split a buffered response into the events a streaming service would emit.
pub fn events_from_response(response: &ChatResponse) -> Vec<ChatStreamEvent> {
    let mut events = Vec::new();
    let Some(first) = response.first() else {
        events.push(ChatStreamEvent::StreamEnd {
            finish_reason: None,
        });
        return events;
    };
    if let Some(thought) = first.thought.as_ref().filter(|t| !t.is_empty()) {
        events.push(ChatStreamEvent::ThinkingDelta {
            delta: thought.clone(),
        });
    }
    if let Some(content) = first.content.as_ref().filter(|c| !c.is_empty()) {
        events.push(ChatStreamEvent::ContentDelta {
            delta: content.clone(),
            index: Some(0),
        });
    }
    for (index, call) in first.function_calls.iter().enumerate() {
        events.push(ChatStreamEvent::FunctionCallDelta {
            index,
            id: call.id.clone(),
            function_name: Some(call.name.clone()),
            arguments_delta: Some(call.arguments.as_text()),
        });
    }
    if let Some(usage) = response.usage {
        events.push(ChatStreamEvent::UsageUpdate { usage });
    }
    events.push(ChatStreamEvent::StreamEnd {
        finish_reason: first.finish_reason.clone(),
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCall;
    use serde_json::json;

    #[test]
    fn buffered_response_becomes_events() {
        let response = ChatResponse::function_calls(vec![FunctionCall::new(
            "c1",
            "lookup",
            json!({"q": "x"}),
        )])
        .with_usage(Usage::new(3, 4));
        let events = events_from_response(&response);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            ChatStreamEvent::FunctionCallDelta { index: 0, function_name: Some(n), .. } if n == "lookup"
        ));
        assert!(matches!(
            events.last(),
            Some(ChatStreamEvent::StreamEnd {
                finish_reason: Some(FinishReason::FunctionCall)
            })
        ));
    }
}
