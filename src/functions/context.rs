//! Per-step context handed to functions.

use std::sync::{Arc, RwLock};

use crate::types::ModelParams;
use crate::utils::CancelHandle;

/// Model parameters shared between the engine and the functions of one
/// generation. The engine reads them before every model call.
pub type SharedParams = Arc<RwLock<ModelParams>>;

/// What a function can see and influence while it runs.
///
/// Functions of one batch run concurrently against the same parameters;
/// updates are applied in completion order, so the last write wins.
#[derive(Debug, Clone)]
pub struct FunctionContext {
    /// Zero-based model turn that requested the call
    pub step: usize,
    pub trace_id: String,
    /// Id of the call being executed
    pub function_id: Option<String>,
    cancel: CancelHandle,
    params: SharedParams,
}

impl FunctionContext {
    pub fn new(step: usize, trace_id: impl Into<String>, cancel: CancelHandle, params: SharedParams) -> Self {
        Self {
            step,
            trace_id: trace_id.into(),
            function_id: None,
            cancel,
            params,
        }
    }

    /// Detached context with default parameters, for calling functions outside a generation.
    pub fn standalone() -> Self {
        Self::new(
            0,
            uuid::Uuid::new_v4().to_string(),
            CancelHandle::new(),
            Arc::new(RwLock::new(ModelParams::default())),
        )
    }

    pub(crate) fn for_call(&self, function_id: Option<&str>) -> Self {
        Self {
            function_id: function_id.map(str::to_string),
            ..self.clone()
        }
    }

    /// Snapshot of the current model parameters.
    pub fn params(&self) -> ModelParams {
        match self.params.read() {
            Ok(params) => params.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Change the parameters used for the next model call.
    pub fn update_params(&self, update: impl FnOnce(&mut ModelParams)) {
        match self.params.write() {
            Ok(mut params) => update(&mut params),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }

    /// Ask the engine to stop after the current batch.
    pub fn stop(&self, reason: impl Into<String>) {
        self.cancel.cancel_with_reason(reason);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }
}
