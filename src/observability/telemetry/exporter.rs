//! Telemetry exporters and the per-generator collector.

use std::sync::{Arc, Mutex};

use super::events::{MetricEvent, TelemetryEvent};
use crate::error::LlmError;

/// Trait for telemetry exporters
#[async_trait::async_trait]
pub trait TelemetryExporter: Send + Sync {
    /// Export a telemetry event
    async fn export(&self, event: &TelemetryEvent) -> Result<(), LlmError>;

    /// Flush any buffered events
    async fn flush(&self) -> Result<(), LlmError> {
        Ok(())
    }

    /// Shutdown the exporter
    async fn shutdown(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

/// Collects exported events in memory. Cloning shares the buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event exported so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Metric events with the given name.
    pub fn metrics(&self, name: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::Metric(m) if m.name == name => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Sum of every sample recorded for `name`.
    pub fn metric_total(&self, name: &str) -> f64 {
        self.metrics(name).iter().map(|m| m.value).sum()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[async_trait::async_trait]
impl TelemetryExporter for InMemoryExporter {
    async fn export(&self, event: &TelemetryEvent) -> Result<(), LlmError> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| LlmError::InternalError(format!("telemetry buffer poisoned: {e}")))?;
        events.push(event.clone());
        Ok(())
    }
}

/// Telemetry collector that fans events out to exporters.
///
/// An empty collector is disabled: spans and metrics are skipped entirely.
/// Export failures are logged and never affect generation.
#[derive(Clone, Default)]
pub struct Telemetry {
    exporters: Vec<Arc<dyn TelemetryExporter>>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("exporters", &self.exporters.len())
            .finish()
    }
}

impl Telemetry {
    /// A collector with no exporters.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_exporter(mut self, exporter: impl TelemetryExporter + 'static) -> Self {
        self.exporters.push(Arc::new(exporter));
        self
    }

    pub fn with_shared_exporter(mut self, exporter: Arc<dyn TelemetryExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.exporters.is_empty()
    }

    /// Emit a telemetry event
    pub async fn emit(&self, event: TelemetryEvent) {
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(&event).await {
                tracing::warn!("Failed to export telemetry event: {}", e);
            }
        }
    }

    pub async fn metric(&self, metric: MetricEvent) {
        if self.is_enabled() {
            self.emit(TelemetryEvent::Metric(metric)).await;
        }
    }

    pub async fn flush(&self) {
        for exporter in &self.exporters {
            if let Err(e) = exporter.flush().await {
                tracing::warn!("Failed to flush telemetry exporter: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::telemetry::events::{MetricKind, SpanEvent, SpanStatus};

    struct FailingExporter;

    #[async_trait::async_trait]
    impl TelemetryExporter for FailingExporter {
        async fn export(&self, _event: &TelemetryEvent) -> Result<(), LlmError> {
            Err(LlmError::InternalError("down".into()))
        }
    }

    #[tokio::test]
    async fn fans_out_and_ignores_failing_exporters() {
        let memory = InMemoryExporter::new();
        let telemetry = Telemetry::disabled()
            .with_exporter(FailingExporter)
            .with_exporter(memory.clone());
        assert!(telemetry.is_enabled());

        let span = SpanEvent::start("s1".into(), None, "t1".into(), "work".into());
        telemetry.emit(TelemetryEvent::SpanStart(span.clone())).await;
        telemetry.emit(TelemetryEvent::SpanEnd(span.end_ok())).await;
        telemetry
            .metric(MetricEvent::counter("t1".into(), "calls", 2.0))
            .await;
        telemetry
            .metric(MetricEvent::counter("t1".into(), "calls", 1.0))
            .await;

        let events = memory.events();
        assert_eq!(events.len(), 4);
        match &events[1] {
            TelemetryEvent::SpanEnd(s) => {
                assert_eq!(s.status, SpanStatus::Ok);
                assert!(s.duration.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(memory.metric_total("calls"), 3.0);
        assert!(memory.metrics("calls").iter().all(|m| m.kind == MetricKind::Counter));
        assert!(events.iter().all(|e| e.trace_id() == "t1"));
    }

    #[tokio::test]
    async fn disabled_collector_drops_metrics() {
        let telemetry = Telemetry::disabled();
        assert!(!telemetry.is_enabled());
        telemetry
            .metric(MetricEvent::histogram("t".into(), "latency", 5.0))
            .await;
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = TelemetryEvent::Metric(MetricEvent::histogram("t".into(), "latency", 1.5));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "metric");
        assert_eq!(json["kind"], "histogram");
    }
}
