//! Observability: structured telemetry events and tracing subscriber setup.
//!
//! Telemetry is opt-in per generator: pass an exporter at construction. Without
//! one, the engine behaves identically and only `tracing` logs are produced.

pub mod subscriber;
pub mod telemetry;

pub use subscriber::{LogFormat, SubscriberConfig, init_debug, init_default, init_from_env, init_subscriber};
pub use telemetry::{InMemoryExporter, Telemetry, TelemetryEvent, TelemetryExporter};
