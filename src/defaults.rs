//! Default Configuration Values
//!
//! This module centralizes the default values used by the generation engine,
//! the prompt renderer and the conversation memory.

/// Generation loop defaults
pub mod generation {
    /// Number of correction rounds allowed per step before giving up.
    ///
    /// A step makes at most `MAX_RETRIES + 1` model calls.
    pub const MAX_RETRIES: usize = 3;

    /// Maximum number of model turns (tool round-trips included) per generation.
    pub const MAX_STEPS: usize = 25;

    /// Name of the synthetic function used as a structured-output substitute
    /// for services without native JSON schema support.
    pub const FINAL_RESULT_FUNCTION: &str = "__finalResult";
}

/// Prompt rendering defaults
pub mod prompt {
    /// Output field that carries model reasoning when thoughts are requested.
    pub const THOUGHT_FIELD_NAME: &str = "thought";
}

/// Conversation memory defaults
pub mod memory {
    /// Maximum number of turns kept before the oldest are evicted.
    pub const LIMIT: usize = 100;

    /// Tag attached to failed attempts and the correction turns that follow them.
    pub const CORRECTION_TAG: &str = "correction";

    /// Tag attached to function turns whose execution failed, and to the
    /// assistant turn that requested a batch with any failure.
    pub const ERROR_TAG: &str = "error";
}

/// Telemetry span and metric names
pub mod telemetry {
    pub const FORWARD_SPAN: &str = "siumai_dsp.forward";
    pub const FUNCTION_SPAN: &str = "siumai_dsp.function";

    pub const MODEL_CALLS: &str = "siumai_dsp.generation.model_calls";
    pub const CORRECTIONS: &str = "siumai_dsp.generation.corrections";
    pub const GENERATION_DURATION_MS: &str = "siumai_dsp.generation.duration_ms";
    pub const FUNCTION_CALLS: &str = "siumai_dsp.function.calls";
    pub const FUNCTION_ERRORS: &str = "siumai_dsp.function.errors";
    pub const FUNCTION_DURATION_MS: &str = "siumai_dsp.function.duration_ms";
}
