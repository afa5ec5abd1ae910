//! Function execution: single calls and concurrent batches.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use super::context::FunctionContext;
use super::fixing::{fixing_instructions, schema_errors};
use super::registry::{Function, FunctionCallError, FunctionHandler, FunctionRegistry};
use crate::defaults;
use crate::error::{FieldError, LlmError};
use crate::memory::TaggedMemory;
use crate::observability::telemetry::{MetricEvent, Telemetry, TelemetryEvent, ToolExecutionEvent};
use crate::types::{ChatTurn, FunctionCall};

/// Turns a handler's return value into the text fed back to the model.
pub type ResultFormatter = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Strings verbatim, anything else as pretty-printed JSON.
pub fn default_formatter(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Formatter and telemetry used by a batch.
#[derive(Clone, Default)]
pub struct ExecutionEnv {
    pub formatter: Option<ResultFormatter>,
    pub telemetry: Telemetry,
    /// Span the per-call events attach to; without one no events are emitted
    pub parent_span: Option<String>,
}

impl ExecutionEnv {
    fn format(&self, value: &Value) -> String {
        match &self.formatter {
            Some(f) => f(value),
            None => default_formatter(value),
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default)]
pub struct FunctionBatch {
    /// Names of every function dispatched in the batch
    pub executed: BTreeSet<String>,
    /// Recoverable failures, in call order
    pub errors: Vec<LlmError>,
}

impl FunctionBatch {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn resolve<'r>(call: &FunctionCall, registry: &'r FunctionRegistry) -> Result<(&'r Function, &'r FunctionHandler), LlmError> {
    if call.name.trim().is_empty() {
        return Err(LlmError::MalformedFunctionCall("function call has no name".into()));
    }
    if call.id.as_deref().is_none_or(|id| id.trim().is_empty()) {
        return Err(LlmError::MalformedFunctionCall(format!(
            "call to '{}' has no id",
            call.name
        )));
    }
    let function = registry
        .get(&call.name)
        .ok_or_else(|| LlmError::FunctionNotFound(call.name.clone()))?;
    let handler = function
        .handler()
        .ok_or_else(|| LlmError::NoHandler(call.name.clone()))?;
    Ok((function, handler))
}

fn argument_error(function: &Function, errors: Vec<FieldError>) -> LlmError {
    let message = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    LlmError::FunctionError {
        function: function.name().to_string(),
        fixing_instructions: fixing_instructions(function.definition(), &errors),
        message,
    }
}

async fn run(
    call: &FunctionCall,
    function: &Function,
    handler: &FunctionHandler,
    ctx: FunctionContext,
) -> (Option<Value>, Result<Value, LlmError>) {
    let args = match call.arguments.to_value() {
        Ok(Value::Null) => Value::Object(Default::default()),
        Ok(args) => args,
        Err(e) => {
            let err = argument_error(
                function,
                vec![FieldError::new("arguments", format!("not valid JSON: {e}"))],
            );
            return (None, Err(err));
        }
    };
    if let Some(validator) = function.validator() {
        let errors = schema_errors(validator, &args);
        if !errors.is_empty() {
            return (Some(args), Err(argument_error(function, errors)));
        }
    }
    let result = handler
        .call(args.clone(), ctx)
        .await
        .map_err(|e| match e {
            FunctionCallError::InvalidArguments(errors) => argument_error(function, errors),
            FunctionCallError::Failed(message) => LlmError::FunctionFailed {
                function: function.name().to_string(),
                message,
            },
        });
    (Some(args), result)
}

/// Execute one call and return its formatted result.
pub async fn execute(
    call: &FunctionCall,
    registry: &FunctionRegistry,
    context: Option<&FunctionContext>,
    formatter: Option<&ResultFormatter>,
) -> Result<String, LlmError> {
    let (function, handler) = resolve(call, registry)?;
    let ctx = context
        .cloned()
        .unwrap_or_else(FunctionContext::standalone)
        .for_call(call.id.as_deref());
    let (_, result) = run(call, function, handler, ctx).await;
    let value = result?;
    Ok(match formatter {
        Some(f) => f(&value),
        None => default_formatter(&value),
    })
}

/// Text of the function turn recorded for a failed call.
pub(crate) fn failure_text(err: &LlmError) -> String {
    match err {
        LlmError::FunctionError {
            message,
            fixing_instructions,
            ..
        } => format!("Error: {message}\n{fixing_instructions}"),
        LlmError::FunctionFailed { message, .. } => format!("Error: {message}"),
        other => format!("Error: {other}"),
    }
}

/// Run every call concurrently and record each outcome as a function turn.
///
/// Unknown functions, missing handlers and calls without an id abort the
/// batch before anything runs. Failures inside handlers stay isolated: the
/// failing call is recorded as an error turn tagged `error` and its siblings
/// complete normally. If the generation was stopped while the batch ran, the
/// results are discarded.
pub async fn process_functions(
    calls: &[FunctionCall],
    registry: &FunctionRegistry,
    memory: &mut TaggedMemory,
    context: &FunctionContext,
    env: &ExecutionEnv,
) -> Result<FunctionBatch, LlmError> {
    let resolved = calls
        .iter()
        .map(|call| resolve(call, registry).map(|(f, h)| (call, f, h)))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(step = context.step, count = calls.len(), "executing function batch");
    let outcomes = join_all(resolved.into_iter().map(|(call, function, handler)| {
        let ctx = context.for_call(call.id.as_deref());
        async move {
            let started = Instant::now();
            let (args, result) = run(call, function, handler, ctx).await;
            (call, args, result, started.elapsed())
        }
    }))
    .await;

    if context.is_cancelled() {
        let reason = context
            .cancel_handle()
            .reason()
            .unwrap_or_else(|| "cancelled".to_string());
        debug!(step = context.step, %reason, "discarding function results after stop");
        return Err(LlmError::Aborted(reason));
    }

    let mut batch = FunctionBatch::default();
    for (call, args, result, elapsed) in outcomes {
        let id = call.id.clone().unwrap_or_default();
        batch.executed.insert(call.name.clone());
        let (text, error) = match result {
            Ok(value) => (env.format(&value), None),
            Err(err) => {
                warn!(function = %call.name, error = %err, "function call failed");
                (failure_text(&err), Some(err))
            }
        };
        record(env, context, call, args, &text, error.as_ref(), elapsed).await;
        match error {
            None => memory.add(ChatTurn::function_result(id, text)),
            Some(err) => {
                memory.add(ChatTurn::function_error(id, text));
                memory.add_tag(defaults::memory::ERROR_TAG);
                batch.errors.push(err);
            }
        }
    }
    Ok(batch)
}

async fn record(
    env: &ExecutionEnv,
    ctx: &FunctionContext,
    call: &FunctionCall,
    args: Option<Value>,
    text: &str,
    error: Option<&LlmError>,
    elapsed: Duration,
) {
    let telemetry = &env.telemetry;
    if !telemetry.is_enabled() {
        return;
    }
    let trace_id = ctx.trace_id.clone();
    telemetry
        .metric(
            MetricEvent::counter(trace_id.clone(), defaults::telemetry::FUNCTION_CALLS, 1.0)
                .with_attribute("function", call.name.clone()),
        )
        .await;
    telemetry
        .metric(
            MetricEvent::histogram(
                trace_id.clone(),
                defaults::telemetry::FUNCTION_DURATION_MS,
                elapsed.as_secs_f64() * 1000.0,
            )
            .with_attribute("function", call.name.clone()),
        )
        .await;
    if error.is_some() {
        telemetry
            .metric(
                MetricEvent::counter(trace_id.clone(), defaults::telemetry::FUNCTION_ERRORS, 1.0)
                    .with_attribute("function", call.name.clone()),
            )
            .await;
    }
    let Some(parent) = &env.parent_span else {
        return;
    };
    let mut event = ToolExecutionEvent::new(
        uuid::Uuid::new_v4().to_string(),
        trace_id,
        call.id.clone(),
        call.name.clone(),
        args,
    )
    .with_parent(parent.clone())
    .with_duration(elapsed);
    event = match error {
        Some(err) => event.with_error(err.to_string()),
        None => event.with_result(text.to_string()),
    };
    telemetry.emit(TelemetryEvent::ToolExecution(event)).await;
}
