//! Telemetry events and exporters.

pub mod events;
pub mod exporter;

pub use events::*;
pub use exporter::{InMemoryExporter, Telemetry, TelemetryExporter};
