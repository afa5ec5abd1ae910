//! Model service collaborator.
//!
//! Transport, authentication and vendor payload shapes live behind this trait.

use async_trait::async_trait;
use futures::stream;

use crate::error::LlmError;
use crate::types::{ChatRequest, ChatResponse, ChatStream, events_from_response};

/// Features a service supports natively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceCapabilities {
    /// Native function calling
    pub functions: bool,
    /// Native JSON-schema constrained output
    pub structured_outputs: bool,
    /// Incremental streaming
    pub streaming: bool,
    pub images: bool,
    pub audio: bool,
    pub files: bool,
}

impl ServiceCapabilities {
    /// Everything supported.
    pub const fn full() -> Self {
        Self {
            functions: true,
            structured_outputs: true,
            streaming: true,
            images: true,
            audio: true,
            files: true,
        }
    }

    /// Plain text chat only.
    pub const fn text_only() -> Self {
        Self {
            functions: false,
            structured_outputs: false,
            streaming: false,
            images: false,
            audio: false,
            files: false,
        }
    }

    pub const fn with_functions(mut self, enabled: bool) -> Self {
        self.functions = enabled;
        self
    }

    pub const fn with_structured_outputs(mut self, enabled: bool) -> Self {
        self.structured_outputs = enabled;
        self
    }

    pub const fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }
}

#[async_trait]
pub trait ModelService: Send + Sync {
    /// Name used in logs and telemetry.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ServiceCapabilities;

    /// Buffered chat call.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Streaming chat call. Defaults to replaying the buffered response as events.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        let response = self.chat(request).await?;
        let events: Vec<_> = events_from_response(&response).into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}
