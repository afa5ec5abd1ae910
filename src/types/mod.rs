//! Core data types exchanged with the model service.
//!
//! - [`chat`]: conversation turns, content parts and pending function calls
//! - [`request`]: the request handed to a [`ModelService`](crate::traits::ModelService)
//! - [`response`]: buffered responses, finish reasons and token usage
//! - [`streaming`]: incremental stream events
//! - [`tools`]: function definitions advertised to the model

pub mod chat;
pub mod request;
pub mod response;
pub mod streaming;
pub mod tools;

pub use chat::*;
pub use request::*;
pub use response::*;
pub use streaming::*;
pub use tools::*;
