//! Generator and per-call options.

use std::fmt;

use crate::defaults;
use crate::functions::ResultFormatter;
use crate::memory::SharedMemory;
use crate::types::{FunctionCallMode, ModelParams};
use crate::utils::CancelHandle;

/// Program-wide defaults.
#[derive(Clone)]
pub struct GeneratorOptions {
    /// Corrections allowed per step; a step makes at most `max_retries + 1` model calls
    pub max_retries: usize,
    /// Model turns allowed per generation, tool round-trips included
    pub max_steps: usize,
    /// Require output labels verbatim instead of matching them loosely
    pub strict_mode: bool,
    /// Keep failed attempts and correction turns in memory after success
    pub disable_memory_cleanup: bool,
    /// Return the model's reasoning under `thought_field_name`
    pub show_thoughts: bool,
    pub thought_field_name: String,
    pub function_call_mode: FunctionCallMode,
    pub function_result_formatter: Option<ResultFormatter>,
    pub model_params: ModelParams,
    /// Turns kept by the memory a generation creates for itself
    pub memory_limit: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            max_retries: defaults::generation::MAX_RETRIES,
            max_steps: defaults::generation::MAX_STEPS,
            strict_mode: false,
            disable_memory_cleanup: false,
            show_thoughts: false,
            thought_field_name: defaults::prompt::THOUGHT_FIELD_NAME.to_string(),
            function_call_mode: FunctionCallMode::Auto,
            function_result_formatter: None,
            model_params: ModelParams::default(),
            memory_limit: defaults::memory::LIMIT,
        }
    }
}

impl fmt::Debug for GeneratorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorOptions")
            .field("max_retries", &self.max_retries)
            .field("max_steps", &self.max_steps)
            .field("strict_mode", &self.strict_mode)
            .field("disable_memory_cleanup", &self.disable_memory_cleanup)
            .field("show_thoughts", &self.show_thoughts)
            .field("thought_field_name", &self.thought_field_name)
            .field("function_call_mode", &self.function_call_mode)
            .field("custom_formatter", &self.function_result_formatter.is_some())
            .field("model_params", &self.model_params)
            .field("memory_limit", &self.memory_limit)
            .finish()
    }
}

impl GeneratorOptions {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_memory_cleanup_disabled(mut self, disabled: bool) -> Self {
        self.disable_memory_cleanup = disabled;
        self
    }

    pub fn with_show_thoughts(mut self, show: bool) -> Self {
        self.show_thoughts = show;
        self
    }

    pub fn with_thought_field_name(mut self, name: impl Into<String>) -> Self {
        self.thought_field_name = name.into();
        self
    }

    pub fn with_function_call_mode(mut self, mode: FunctionCallMode) -> Self {
        self.function_call_mode = mode;
        self
    }

    pub fn with_function_result_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.function_result_formatter = Some(formatter);
        self
    }

    pub fn with_model_params(mut self, params: ModelParams) -> Self {
        self.model_params = params;
        self
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }
}

/// Per-call overrides. Unset fields fall back to the generator's options.
#[derive(Clone, Default)]
pub struct ForwardOptions {
    pub max_retries: Option<usize>,
    pub max_steps: Option<usize>,
    pub strict_mode: Option<bool>,
    pub disable_memory_cleanup: Option<bool>,
    pub show_thoughts: Option<bool>,
    pub function_call_mode: Option<FunctionCallMode>,
    pub function_result_formatter: Option<ResultFormatter>,
    /// Merged over the generator's parameters field by field
    pub model_params: Option<ModelParams>,
    /// Memory to read history from and record into; a fresh one is used otherwise
    pub memory: Option<SharedMemory>,
    pub cancel: Option<CancelHandle>,
}

impl fmt::Debug for ForwardOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardOptions")
            .field("max_retries", &self.max_retries)
            .field("max_steps", &self.max_steps)
            .field("strict_mode", &self.strict_mode)
            .field("disable_memory_cleanup", &self.disable_memory_cleanup)
            .field("show_thoughts", &self.show_thoughts)
            .field("function_call_mode", &self.function_call_mode)
            .field("custom_formatter", &self.function_result_formatter.is_some())
            .field("model_params", &self.model_params)
            .field("shared_memory", &self.memory.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl ForwardOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = Some(strict);
        self
    }

    pub fn with_memory_cleanup_disabled(mut self, disabled: bool) -> Self {
        self.disable_memory_cleanup = Some(disabled);
        self
    }

    pub fn with_show_thoughts(mut self, show: bool) -> Self {
        self.show_thoughts = Some(show);
        self
    }

    pub fn with_function_call_mode(mut self, mode: FunctionCallMode) -> Self {
        self.function_call_mode = Some(mode);
        self
    }

    pub fn with_function_result_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.function_result_formatter = Some(formatter);
        self
    }

    pub fn with_model_params(mut self, params: ModelParams) -> Self {
        self.model_params = Some(params);
        self
    }

    pub fn with_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Options after applying per-call overrides.
#[derive(Clone)]
pub(crate) struct ResolvedOptions {
    pub max_retries: usize,
    pub max_steps: usize,
    pub strict_mode: bool,
    pub disable_memory_cleanup: bool,
    pub show_thoughts: bool,
    pub thought_field_name: String,
    pub function_call_mode: FunctionCallMode,
    pub function_result_formatter: Option<ResultFormatter>,
    pub model_params: ModelParams,
    pub memory_limit: usize,
    pub memory: Option<SharedMemory>,
    pub cancel: CancelHandle,
}

impl ResolvedOptions {
    pub fn resolve(defaults: &GeneratorOptions, call: ForwardOptions) -> Self {
        let model_params = match call.model_params {
            Some(params) => params.or(&defaults.model_params),
            None => defaults.model_params.clone(),
        };
        Self {
            max_retries: call.max_retries.unwrap_or(defaults.max_retries),
            max_steps: call.max_steps.unwrap_or(defaults.max_steps).max(1),
            strict_mode: call.strict_mode.unwrap_or(defaults.strict_mode),
            disable_memory_cleanup: call
                .disable_memory_cleanup
                .unwrap_or(defaults.disable_memory_cleanup),
            show_thoughts: call.show_thoughts.unwrap_or(defaults.show_thoughts),
            thought_field_name: defaults.thought_field_name.clone(),
            function_call_mode: call
                .function_call_mode
                .unwrap_or_else(|| defaults.function_call_mode.clone()),
            function_result_formatter: call
                .function_result_formatter
                .or_else(|| defaults.function_result_formatter.clone()),
            model_params,
            memory_limit: defaults.memory_limit,
            memory: call.memory,
            cancel: call.cancel.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_options_override_field_by_field() {
        let defaults = GeneratorOptions::default()
            .with_max_retries(5)
            .with_model_params(ModelParams::default().with_temperature(0.1).with_max_tokens(100));
        let call = ForwardOptions::new()
            .with_max_steps(2)
            .with_model_params(ModelParams::default().with_temperature(0.7));
        let resolved = ResolvedOptions::resolve(&defaults, call);
        assert_eq!(resolved.max_retries, 5);
        assert_eq!(resolved.max_steps, 2);
        assert_eq!(resolved.model_params.temperature, Some(0.7));
        assert_eq!(resolved.model_params.max_tokens, Some(100));
        assert!(!resolved.strict_mode);
        assert!(!resolved.cancel.is_cancelled());
    }
}
