//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; applications decide where they go.
//! These helpers install a `tracing-subscriber` fmt layer filtered to this
//! crate, optionally writing to a file through a non-blocking appender.
//!
//! ```rust,ignore
//! use siumai_dsp::observability::{init_subscriber, LogFormat, SubscriberConfig};
//!
//! let _guard = init_subscriber(
//!     SubscriberConfig::builder()
//!         .log_level(tracing::Level::DEBUG)
//!         .output_format(LogFormat::Json)
//!         .build(),
//! )?;
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::LlmError;

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format
    Json,
    /// Compact JSON format
    JsonCompact,
}

impl std::str::FromStr for LogFormat {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            _ => Err(LlmError::config(format!(
                "Invalid log format: {s}. Valid options: text, json, json-compact"
            ))),
        }
    }
}

/// Configuration for tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: LogFormat,
    /// Write to stderr when no log file is set
    pub enable_console: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: LogFormat::Text,
            enable_console: true,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    /// Create a debug configuration
    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }

    /// JSON logs at WARN into a file.
    pub fn production(log_file: PathBuf) -> Self {
        Self {
            log_level: tracing::Level::WARN,
            output_format: LogFormat::Json,
            enable_console: false,
            log_file: Some(log_file),
        }
    }

    /// Filter directive for this crate at the configured level.
    pub fn filter_directive(&self) -> String {
        format!(
            "siumai_dsp={}",
            self.log_level.as_str().to_lowercase()
        )
    }
}

/// Builder for SubscriberConfig
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<LogFormat>,
    enable_console: Option<bool>,
    log_file: Option<PathBuf>,
}

impl SubscriberConfigBuilder {
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from a string
    pub fn log_level_str(mut self, level: &str) -> Result<Self, LlmError> {
        let level = match level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => {
                return Err(LlmError::config(format!(
                    "Invalid log level: {level}. Valid options: trace, debug, info, warn, error"
                )));
            }
        };
        self.log_level = Some(level);
        Ok(self)
    }

    pub fn output_format(mut self, format: LogFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn enable_console(mut self, enable: bool) -> Self {
        self.enable_console = Some(enable);
        self
    }

    pub fn log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
            enable_console: self.enable_console.unwrap_or(true),
            log_file: self.log_file,
        }
    }
}

/// Install the global subscriber.
///
/// Returns a guard when logging to a file; keep it alive for the life of the
/// program or buffered lines are lost. An already-installed subscriber is not
/// an error.
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>, LlmError> {
    let filter = EnvFilter::try_new(config.filter_directive())
        .map_err(|e| LlmError::config(format!("invalid log filter: {e}")))?;

    let (writer, guard) = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    LlmError::config(format!("cannot open log file {}: {e}", path.display()))
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, Some(guard))
        }
        None if config.enable_console => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, Some(guard))
        }
        None => return Ok(None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);
    let init_result = match config.output_format {
        LogFormat::Json => builder
            .with_thread_ids(true)
            .with_thread_names(true)
            .json()
            .try_init(),
        LogFormat::JsonCompact => builder
            .with_thread_ids(true)
            .with_thread_names(true)
            .json()
            .flatten_event(true)
            .try_init(),
        LogFormat::Text => builder.try_init(),
    };

    match init_result {
        Ok(()) => Ok(guard),
        Err(e) => {
            let error_msg = e.to_string();
            if error_msg.contains("global default trace dispatcher has already been set") {
                Ok(None)
            } else {
                Err(LlmError::config(format!("Failed to initialize tracing: {e}")))
            }
        }
    }
}

pub fn init_default() -> Result<Option<WorkerGuard>, LlmError> {
    init_subscriber(SubscriberConfig::default())
}

pub fn init_debug() -> Result<Option<WorkerGuard>, LlmError> {
    init_subscriber(SubscriberConfig::debug())
}

/// Initialize from `SIUMAI_DSP_LOG_LEVEL`, `SIUMAI_DSP_LOG_FORMAT`
/// (text, json, json-compact) and `SIUMAI_DSP_LOG_FILE`.
pub fn init_from_env() -> Result<Option<WorkerGuard>, LlmError> {
    init_subscriber(config_from_env(|key| std::env::var(key).ok())?)
}

fn config_from_env(var: impl Fn(&str) -> Option<String>) -> Result<SubscriberConfig, LlmError> {
    let mut builder = SubscriberConfig::builder();
    if let Some(level) = var("SIUMAI_DSP_LOG_LEVEL") {
        builder = builder.log_level_str(&level)?;
    }
    if let Some(format) = var("SIUMAI_DSP_LOG_FORMAT") {
        builder = builder.output_format(format.parse()?);
    }
    if let Some(path) = var("SIUMAI_DSP_LOG_FILE") {
        builder = builder.log_file(PathBuf::from(path));
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_and_overrides() {
        let config = SubscriberConfig::builder()
            .log_level_str("DEBUG")
            .unwrap()
            .output_format(LogFormat::JsonCompact)
            .build();
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.output_format, LogFormat::JsonCompact);
        assert!(config.enable_console);
        assert_eq!(config.filter_directive(), "siumai_dsp=debug");

        assert!(SubscriberConfig::builder().log_level_str("loud").is_err());
    }

    #[test]
    fn reads_environment() {
        let env = |key: &str| match key {
            "SIUMAI_DSP_LOG_LEVEL" => Some("warn".to_string()),
            "SIUMAI_DSP_LOG_FORMAT" => Some("json".to_string()),
            _ => None,
        };
        let config = config_from_env(env).unwrap();
        assert_eq!(config.log_level, tracing::Level::WARN);
        assert_eq!(config.output_format, LogFormat::Json);
        assert!(config.log_file.is_none());

        let bad = |key: &str| (key == "SIUMAI_DSP_LOG_FORMAT").then(|| "xml".to_string());
        assert!(config_from_env(bad).is_err());
    }

    #[test]
    fn production_logs_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SubscriberConfig::production(dir.path().join("dsp.log"));
        assert!(!config.enable_console);
        assert_eq!(config.output_format, LogFormat::Json);
        assert_eq!(config.filter_directive(), "siumai_dsp=warn");
    }
}
