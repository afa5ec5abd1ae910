//! Signature-driven generation.
//!
//! [`Generator`] owns a signature, optional functions, demonstrations and
//! assertions. [`Generator::forward`] drives the model until the output
//! validates; [`Generator::streaming_forward`] does the same while emitting
//! partial values.

mod assertion;
mod engine;
mod extract;
pub mod options;
mod result;
pub mod stream;

pub use assertion::Assertion;
pub use engine::{Generator, GeneratorBuilder};
pub use options::{ForwardOptions, GeneratorOptions};
pub use result::GenerationResult;
pub use stream::{DeltaAccumulator, ForwardEvent, merge_delta};
