//! Streaming support: partial-JSON repair and the per-call accumulation fold.

pub mod accumulator;
pub mod json_repair;

pub use accumulator::{PartialFunctionCall, StreamState};
pub use json_repair::{
    PartialJson, TruncationMarker, extract_json_block, parse_partial_json, repair_json,
    strip_code_fence,
};
