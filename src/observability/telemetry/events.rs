//! Telemetry Events
//!
//! Structured events for generations, function calls and metrics.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::types::{FinishReason, Usage};

/// Main telemetry event enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Span start event (for hierarchical tracing)
    SpanStart(SpanEvent),
    /// Span end event
    SpanEnd(SpanEvent),
    /// One model call
    Generation(GenerationEvent),
    /// One function call
    ToolExecution(ToolExecutionEvent),
    /// Counter or histogram sample
    Metric(MetricEvent),
}

impl TelemetryEvent {
    pub fn trace_id(&self) -> &str {
        match self {
            Self::SpanStart(e) | Self::SpanEnd(e) => &e.trace_id,
            Self::Generation(e) => &e.trace_id,
            Self::ToolExecution(e) => &e.trace_id,
            Self::Metric(e) => &e.trace_id,
        }
    }
}

/// Span event for hierarchical tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    /// Groups every event of one generation
    pub trace_id: String,
    /// Span name (e.g. `siumai_dsp.forward`)
    pub name: String,
    pub start_time: SystemTime,
    /// Only for SpanEnd events
    pub end_time: Option<SystemTime>,
    /// Only for SpanEnd events
    pub duration: Option<Duration>,
    pub attributes: HashMap<String, String>,
    pub status: SpanStatus,
    pub error: Option<String>,
}

/// Span status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    InProgress,
    Ok,
    Error,
}

impl SpanEvent {
    /// Create a new span start event
    pub fn start(span_id: String, parent_span_id: Option<String>, trace_id: String, name: String) -> Self {
        Self {
            span_id,
            parent_span_id,
            trace_id,
            name,
            start_time: SystemTime::now(),
            end_time: None,
            duration: None,
            attributes: HashMap::new(),
            status: SpanStatus::InProgress,
            error: None,
        }
    }

    /// End the span successfully
    pub fn end_ok(mut self) -> Self {
        let now = SystemTime::now();
        self.end_time = Some(now);
        self.duration = now.duration_since(self.start_time).ok();
        self.status = SpanStatus::Ok;
        self
    }

    /// End the span with error
    pub fn end_error(mut self, error: String) -> Self {
        let now = SystemTime::now();
        self.end_time = Some(now);
        self.duration = now.duration_since(self.start_time).ok();
        self.status = SpanStatus::Error;
        self.error = Some(error);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationEvent {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub timestamp: SystemTime,
    /// Model service name
    pub service: String,
    pub step: usize,
    /// Zero-based attempt within the step
    pub attempt: usize,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    pub duration: Option<Duration>,
    pub metadata: HashMap<String, String>,
    pub error: Option<String>,
}

impl GenerationEvent {
    pub fn new(id: String, trace_id: String, service: String, step: usize, attempt: usize) -> Self {
        Self {
            id,
            trace_id,
            parent_span_id: None,
            timestamp: SystemTime::now(),
            service,
            step,
            attempt,
            usage: None,
            finish_reason: None,
            duration: None,
            metadata: HashMap::new(),
            error: None,
        }
    }

    pub fn with_parent(mut self, span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(span_id.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One function call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionEvent {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub timestamp: SystemTime,
    pub tool_call_id: Option<String>,
    pub tool_name: String,
    /// Parsed arguments, when they decoded
    pub arguments: Option<serde_json::Value>,
    pub result: Option<String>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

impl ToolExecutionEvent {
    pub fn new(
        id: String,
        trace_id: String,
        tool_call_id: Option<String>,
        tool_name: String,
        arguments: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            trace_id,
            parent_span_id: None,
            timestamp: SystemTime::now(),
            tool_call_id,
            tool_name,
            arguments,
            result: None,
            duration: None,
            error: None,
        }
    }

    pub fn with_parent(mut self, span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(span_id.into());
        self
    }

    pub fn with_result(mut self, result: String) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Histogram,
}

/// Counter increment or histogram sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub trace_id: String,
    pub timestamp: SystemTime,
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub attributes: HashMap<String, String>,
}

impl MetricEvent {
    pub fn counter(trace_id: String, name: impl Into<String>, value: f64) -> Self {
        Self::new(trace_id, name, MetricKind::Counter, value)
    }

    pub fn histogram(trace_id: String, name: impl Into<String>, value: f64) -> Self {
        Self::new(trace_id, name, MetricKind::Histogram, value)
    }

    fn new(trace_id: String, name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            trace_id,
            timestamp: SystemTime::now(),
            name: name.into(),
            kind,
            value,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
