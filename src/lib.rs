//! # siumai-dsp - Signature-Driven Generation
//!
//! Declare what a model call takes and returns as a typed [`Signature`],
//! then let a [`Generator`] render the prompt, call any chat model service,
//! extract and validate the answer, and ask the model to correct itself
//! until the output satisfies the contract.
//!
#![deny(unsafe_code)]

//! ## Features
//!
//! - **Typed Signatures**: a compact DSL (`question -> answer, score:number`) or a builder for nested objects
//! - **Validation Loop**: field validation and custom assertions feed precise corrections back to the model
//! - **Function Calling**: concurrent tool execution with schema-checked arguments, or injected tool fields for services without native support
//! - **Structured Output**: native JSON schema output, with a forced `__finalResult` call as fallback
//! - **Streaming**: incremental output deltas recovered from partial JSON
//! - **Tagged Memory**: conversation history whose correction turns can be removed after success
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use siumai_dsp::prelude::*;
//!
//! let generator = Generator::builder("question -> answer, confidence:number".parse()?)
//!     .assert("confidence must be between 0 and 1", |out| {
//!         out["confidence"].as_f64().is_some_and(|c| (0.0..=1.0).contains(&c))
//!     })
//!     .build()?;
//!
//! let input = ProgramInput::from_value(serde_json::json!({"question": "Capital of France?"}))?;
//! let result = generator.forward(&service, input, ForwardOptions::new()).await?;
//! println!("{}", result.output["answer"]);
//! ```

pub mod defaults;
pub mod error;
pub mod functions;
pub mod generate;
pub mod memory;
pub mod observability;
pub mod prompt;
pub mod signature;
pub mod streaming;
pub mod traits;
pub mod types;
pub mod utils;

pub use error::{LlmError, Result};
pub use generate::{
    Assertion, DeltaAccumulator, ForwardEvent, ForwardOptions, GenerationResult, Generator,
    GeneratorBuilder, GeneratorOptions,
};
pub use signature::{Field, FieldType, Signature};

/// Commonly used items.
pub mod prelude {
    pub use crate::error::{ErrorCategory, FieldError, LlmError, ValidationError};
    pub use crate::functions::{
        Function, FunctionCallError, FunctionContext, FunctionHandler, FunctionRegistry,
    };
    pub use crate::generate::{
        Assertion, DeltaAccumulator, ForwardEvent, ForwardOptions, GenerationResult, Generator,
        GeneratorBuilder, GeneratorOptions, merge_delta,
    };
    pub use crate::memory::{SharedMemory, TaggedMemory};
    pub use crate::observability::{InMemoryExporter, Telemetry, TelemetryExporter};
    pub use crate::prompt::{Example, HistoryTurn, ProgramInput, PromptRenderer};
    pub use crate::signature::{Field, FieldType, Signature};
    pub use crate::traits::{ModelService, ServiceCapabilities};
    pub use crate::types::{
        ChatRequest, ChatResponse, ChatStream, ChatStreamEvent, ChatTurn, FinishReason,
        FunctionCall, FunctionCallMode, FunctionDefinition, ModelParams, Usage,
    };
    pub use crate::utils::CancelHandle;
}
