//! Collaborator traits consumed by the generation engine.

mod service;

pub use service::{ModelService, ServiceCapabilities};
