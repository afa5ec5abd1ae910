//! Scripted model service for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use siumai_dsp::prelude::*;
use siumai_dsp::streaming::StreamState;
use siumai_dsp::types::{ChatStream, events_from_response};

pub type Responder = Box<dyn Fn(&ChatRequest) -> Result<ChatResponse, LlmError> + Send + Sync>;

/// One scripted reply.
pub enum Reply {
    Response(ChatResponse),
    /// Streamed as-is; folded into a response for buffered calls
    Chunks(Vec<ChatStreamEvent>),
    Error(LlmError),
    /// Never answers
    Hang,
    Dynamic(Responder),
}

impl From<ChatResponse> for Reply {
    fn from(value: ChatResponse) -> Self {
        Self::Response(value)
    }
}

pub struct MockService {
    caps: ServiceCapabilities,
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockService {
    pub fn new(caps: ServiceCapabilities, script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            caps,
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Text-only service replying with the given texts in order.
    pub fn texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            ServiceCapabilities::text_only(),
            texts.into_iter().map(|t| Reply::Response(ChatResponse::text(t))),
        )
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Text of the last turn of request `n`.
    pub fn last_turn_text(&self, n: usize) -> String {
        self.requests()[n]
            .turns
            .last()
            .and_then(ChatTurn::text)
            .unwrap_or_default()
    }

    fn next(&self, request: &ChatRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Error(LlmError::ServiceError("script exhausted".into())))
    }
}

fn fold(events: Vec<ChatStreamEvent>) -> Result<ChatResponse, LlmError> {
    let mut state = StreamState::default();
    for event in events {
        state = state.fold(event)?;
    }
    let usage = state.usage;
    Ok(ChatResponse {
        results: vec![state.into_candidate()],
        usage,
        model: None,
    })
}

#[async_trait]
impl ModelService for MockService {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> ServiceCapabilities {
        self.caps
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        match self.next(&request) {
            Reply::Response(r) => Ok(r),
            Reply::Chunks(events) => fold(events),
            Reply::Error(e) => Err(e),
            Reply::Hang => futures::future::pending().await,
            Reply::Dynamic(f) => f(&request),
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        let events = match self.next(&request) {
            Reply::Response(r) => events_from_response(&r),
            Reply::Chunks(events) => events,
            Reply::Error(e) => return Err(e),
            Reply::Hang => return Ok(Box::pin(stream::pending())),
            Reply::Dynamic(f) => events_from_response(&f(&request)?),
        };
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

/// Build an input map from a JSON object literal.
pub fn input(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().expect("object input")
}

/// Content chunks followed by a stream end.
pub fn text_chunks(parts: &[&str]) -> Vec<ChatStreamEvent> {
    let mut events: Vec<ChatStreamEvent> = parts
        .iter()
        .map(|p| ChatStreamEvent::ContentDelta {
            delta: p.to_string(),
            index: Some(0),
        })
        .collect();
    events.push(ChatStreamEvent::StreamEnd {
        finish_reason: Some(FinishReason::Stop),
    });
    events
}
