//! The generation loop.
//!
//! One call to [`Generator::forward`] renders the prompt, calls the model,
//! extracts and validates the answer, runs assertions, and either succeeds,
//! appends a correction and tries again, or executes requested functions and
//! moves to the next step.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::assertion::{Assertion, first_failure};
use super::extract::{ExtractOptions, extract_json, extract_text, finalize_output, normalize_json};
use super::options::{ForwardOptions, GeneratorOptions, ResolvedOptions};
use super::result::GenerationResult;
use super::stream::{DeltaEmitter, ForwardEvent};
use crate::defaults;
use crate::error::{FieldError, LlmError, ValidationError};
use crate::functions::{
    ExecutionEnv, Function, FunctionContext, FunctionRegistry, SharedParams, process_functions,
};
use crate::memory::TaggedMemory;
use crate::observability::telemetry::{
    GenerationEvent, MetricEvent, SpanEvent, Telemetry, TelemetryEvent,
};
use crate::prompt::{Example, OutputFormat, ProgramInput, PromptRenderer, RenderOptions};
use crate::signature::{Signature, extract_tool_calls};
use crate::streaming::StreamState;
use crate::traits::{ModelService, ServiceCapabilities};
use crate::types::{
    CandidateResult, ChatRequest, ChatResponse, ChatTurn, ContentPart, FinishReason, FunctionCall,
    FunctionCallMode, FunctionDefinition, ResponseFormat, Usage, UserContent,
};
use crate::utils::make_cancellable_stream;

/// How the answer is requested and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputMode {
    /// `Title: value` lines
    Text,
    /// JSON object in the text content
    JsonText,
    /// JSON constrained by the service's structured-output support
    Native,
    /// Arguments of the forced `__finalResult` call
    FinalResult,
}

impl OutputMode {
    fn select(signature: &Signature, caps: ServiceCapabilities) -> Self {
        if !signature.has_structured_output() {
            Self::Text
        } else if caps.structured_outputs {
            Self::Native
        } else if caps.functions {
            Self::FinalResult
        } else {
            Self::JsonText
        }
    }

    fn render_format(self) -> OutputFormat {
        match self {
            Self::Text => OutputFormat::Text,
            Self::JsonText | Self::Native => OutputFormat::Json,
            Self::FinalResult => OutputFormat::FinalResultFunction,
        }
    }
}

/// Per-generation setup derived from the service's capabilities.
struct Plan {
    /// Signature used for rendering and extraction
    signature: Signature,
    mode: OutputMode,
    caps: ServiceCapabilities,
    /// Functions whose parameters were injected as output fields
    injected: Vec<FunctionDefinition>,
    renderer: PromptRenderer,
}

enum Outcome {
    Success(Map<String, Value>),
    Functions {
        calls: Vec<FunctionCall>,
        turn: CandidateResult,
    },
    Correction(LlmError),
}

/// Mutable bookkeeping of one generation.
#[derive(Default)]
struct AttemptState {
    step: usize,
    retries_in_step: usize,
    retries: usize,
    failed_batches: usize,
    model_calls: usize,
    usage: Usage,
    executed: BTreeSet<String>,
}

/// A signature-driven program: renders, calls, validates and corrects.
#[derive(Debug, Clone)]
pub struct Generator {
    signature: Signature,
    registry: FunctionRegistry,
    examples: Vec<Example>,
    assertions: Vec<Assertion>,
    options: GeneratorOptions,
    telemetry: Telemetry,
}

impl Generator {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            registry: FunctionRegistry::new(),
            examples: Vec::new(),
            assertions: Vec::new(),
            options: GeneratorOptions::default(),
            telemetry: Telemetry::disabled(),
        }
    }

    pub fn builder(signature: Signature) -> GeneratorBuilder {
        GeneratorBuilder {
            generator: Self::new(signature),
            functions: Vec::new(),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Run to a validated result.
    pub async fn forward(
        &self,
        service: &dyn ModelService,
        input: impl Into<ProgramInput>,
        options: ForwardOptions,
    ) -> Result<GenerationResult, LlmError> {
        self.run(service, input.into(), options, None).await
    }

    /// Run while streaming partial output.
    ///
    /// The stream yields [`ForwardEvent::Delta`]s as the answer arrives and
    /// ends with [`ForwardEvent::Done`] or an error. It is finite and not
    /// restartable; calling again renders from scratch.
    pub fn streaming_forward<'a>(
        &'a self,
        service: &'a dyn ModelService,
        input: impl Into<ProgramInput>,
        options: ForwardOptions,
    ) -> BoxStream<'a, Result<ForwardEvent, LlmError>> {
        let input = input.into();
        let s = async_stream::stream! {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let run = self.run(service, input, options, Some(tx));
            tokio::pin!(run);
            let outcome = loop {
                tokio::select! {
                    biased;
                    Some(event) = rx.recv() => yield Ok(event),
                    result = &mut run => break result,
                }
            };
            while let Ok(event) = rx.try_recv() {
                yield Ok(event);
            }
            match outcome {
                Ok(result) => yield Ok(ForwardEvent::Done(result)),
                Err(e) => yield Err(e),
            }
        };
        Box::pin(s)
    }

    fn plan(&self, caps: ServiceCapabilities, options: &ResolvedOptions) -> Result<Plan, LlmError> {
        let mode = OutputMode::select(&self.signature, caps);
        let definitions = self.registry.definitions();
        let (signature, injected) = if !caps.functions && !definitions.is_empty() {
            (self.signature.inject_tool_fields(&definitions)?, definitions.clone())
        } else {
            (self.signature.clone(), Vec::new())
        };
        let renderer = PromptRenderer::new(signature.clone())
            .with_functions(definitions)
            .with_examples(self.examples.clone())
            .with_options(RenderOptions {
                output_format: mode.render_format(),
                thought_field_name: options.thought_field_name.clone(),
            });
        Ok(Plan {
            signature,
            mode,
            caps,
            injected,
            renderer,
        })
    }

    async fn run(
        &self,
        service: &dyn ModelService,
        input: ProgramInput,
        options: ForwardOptions,
        deltas: Option<mpsc::UnboundedSender<ForwardEvent>>,
    ) -> Result<GenerationResult, LlmError> {
        let options = ResolvedOptions::resolve(&self.options, options);
        let trace_id = uuid::Uuid::new_v4().to_string();
        let span_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let span = SpanEvent::start(
            span_id.clone(),
            None,
            trace_id.clone(),
            defaults::telemetry::FORWARD_SPAN.to_string(),
        )
        .with_attribute("service", service.name())
        .with_attribute("max_steps", options.max_steps.to_string())
        .with_attribute("max_retries", options.max_retries.to_string())
        .with_attribute("streaming", deltas.is_some().to_string());
        if self.telemetry.is_enabled() {
            self.telemetry.emit(TelemetryEvent::SpanStart(span.clone())).await;
        }
        info!(trace_id = %trace_id, service = service.name(), "starting generation");

        let result = self
            .run_inner(service, input, &options, &trace_id, &span_id, deltas)
            .await;

        let elapsed = started.elapsed();
        match &result {
            Ok(r) => info!(
                trace_id = %trace_id,
                model_calls = r.model_calls,
                steps = r.steps,
                retries = r.retries,
                "generation finished"
            ),
            Err(e) => warn!(trace_id = %trace_id, error = %e, "generation failed"),
        }
        if self.telemetry.is_enabled() {
            let end = match &result {
                Ok(r) => span
                    .end_ok()
                    .with_attribute("model_calls", r.model_calls.to_string())
                    .with_attribute("retries", r.retries.to_string()),
                Err(e) => span.end_error(e.to_string()),
            };
            self.telemetry.emit(TelemetryEvent::SpanEnd(end)).await;
            self.telemetry
                .metric(MetricEvent::histogram(
                    trace_id.clone(),
                    defaults::telemetry::GENERATION_DURATION_MS,
                    elapsed.as_secs_f64() * 1000.0,
                ))
                .await;
        }
        result
    }

    async fn run_inner(
        &self,
        service: &dyn ModelService,
        input: ProgramInput,
        options: &ResolvedOptions,
        trace_id: &str,
        span_id: &str,
        deltas: Option<mpsc::UnboundedSender<ForwardEvent>>,
    ) -> Result<GenerationResult, LlmError> {
        let plan = self.plan(service.capabilities(), options)?;
        let rendered = plan.renderer.render_prompt(&input)?;
        let mut prefix = vec![rendered.system];
        prefix.extend(rendered.examples);

        let mut owned: TaggedMemory;
        let mut guard: tokio::sync::OwnedMutexGuard<TaggedMemory>;
        let memory: &mut TaggedMemory = match options.memory.clone() {
            Some(shared) => {
                guard = shared.lock_owned().await;
                &mut guard
            }
            None => {
                owned = TaggedMemory::new(options.memory_limit);
                &mut owned
            }
        };
        memory.add_all(rendered.turns);

        let mut emitter = deltas.map(|tx| {
            DeltaEmitter::new(
                tx,
                &plan.signature,
                &self.signature,
                plan.mode,
                options.strict_mode,
                &options.thought_field_name,
            )
        });
        let params: SharedParams = Arc::new(RwLock::new(options.model_params.clone()));
        let env = ExecutionEnv {
            formatter: options.function_result_formatter.clone(),
            telemetry: self.telemetry.clone(),
            parent_span: Some(span_id.to_string()),
        };
        let mut state = AttemptState::default();

        loop {
            if options.cancel.is_cancelled() {
                return Err(aborted(options));
            }
            if state.step >= options.max_steps {
                return Err(LlmError::MaxStepsExceeded(options.max_steps));
            }

            let current_params = match params.read() {
                Ok(p) => p.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            let mut turns = prefix.clone();
            turns.extend(memory.history());
            let request = self.build_request(&plan, turns, current_params, options, emitter.is_some())?;
            check_media(&request.turns, plan.caps)?;

            let attempt = state.retries_in_step;
            debug!(step = state.step, attempt, "calling model");
            let call_started = Instant::now();
            let response = match emitter.as_mut() {
                Some(emitter) => {
                    emitter.begin_call();
                    call_streaming(service, request, options, emitter).await
                }
                None => call_buffered(service, request, options).await,
            };
            self.record_call(
                service,
                trace_id,
                span_id,
                &state,
                attempt,
                call_started.elapsed(),
                &response,
            )
            .await;
            let response = response?;

            state.model_calls += 1;
            if let Some(usage) = &response.usage {
                state.usage.merge(usage);
            }
            let candidate = response.results.into_iter().next().unwrap_or_default();
            if candidate.finish_reason == Some(FinishReason::ContentFilter) {
                return Err(LlmError::ContentFiltered(
                    candidate.content.unwrap_or_else(|| "response blocked".to_string()),
                ));
            }

            match self.evaluate(&plan, &candidate, options) {
                Outcome::Success(values) => {
                    if state.retries > 0 && !options.disable_memory_cleanup {
                        match memory.remove_by_tag(defaults::memory::CORRECTION_TAG) {
                            Ok(_) | Err(LlmError::TagNotFound(_)) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    memory.add(ChatTurn::assistant(answer_text(&candidate)));
                    let keep_thought = options
                        .show_thoughts
                        .then_some(options.thought_field_name.as_str());
                    return Ok(GenerationResult {
                        output: finalize_output(&self.signature, values, keep_thought),
                        usage: state.usage,
                        model_calls: state.model_calls,
                        steps: state.step + 1,
                        retries: state.retries,
                        functions_executed: state.executed,
                        finish_reason: candidate.finish_reason,
                        trace_id: trace_id.to_string(),
                    });
                }
                Outcome::Functions { calls, turn } => {
                    debug!(
                        step = state.step,
                        functions = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "model requested functions"
                    );
                    memory.add_result(&turn);
                    let ctx = FunctionContext::new(state.step, trace_id, options.cancel.clone(), params.clone());
                    let batch = process_functions(&calls, &self.registry, memory, &ctx, &env).await?;
                    state.executed.extend(batch.executed.iter().cloned());
                    if batch.has_errors() {
                        // One function turn per call follows the requesting turn.
                        memory.add_tag_from_end(calls.len(), defaults::memory::ERROR_TAG);
                    }
                    if let Some(last_error) = batch.errors.last() {
                        state.failed_batches += 1;
                        if state.failed_batches > options.max_retries {
                            return Err(LlmError::RetryBudgetExhausted {
                                attempts: state.failed_batches,
                                last_error: Box::new(last_error.clone()),
                            });
                        }
                    } else {
                        state.failed_batches = 0;
                    }
                    state.step += 1;
                    state.retries_in_step = 0;
                }
                Outcome::Correction(error) => {
                    if state.retries_in_step >= options.max_retries {
                        return Err(LlmError::RetryBudgetExhausted {
                            attempts: state.retries_in_step + 1,
                            last_error: Box::new(error),
                        });
                    }
                    state.retries_in_step += 1;
                    state.retries += 1;
                    warn!(
                        step = state.step,
                        attempt,
                        error = %error,
                        "output rejected, requesting correction"
                    );
                    memory.add(ChatTurn::assistant(answer_text(&candidate)));
                    memory.add_tag(defaults::memory::CORRECTION_TAG);
                    memory.add(ChatTurn::user(correction_message(&error)));
                    memory.add_tag(defaults::memory::CORRECTION_TAG);
                    self.telemetry
                        .metric(
                            MetricEvent::counter(trace_id.to_string(), defaults::telemetry::CORRECTIONS, 1.0)
                                .with_attribute("category", format!("{:?}", error.category())),
                        )
                        .await;
                }
            }
        }
    }

    fn build_request(
        &self,
        plan: &Plan,
        turns: Vec<ChatTurn>,
        params: crate::types::ModelParams,
        options: &ResolvedOptions,
        stream: bool,
    ) -> Result<ChatRequest, LlmError> {
        let mut request = ChatRequest::new(turns);
        request.params = params;
        request.stream = stream;

        if plan.caps.functions {
            let offer_user_functions =
                !self.registry.is_empty() && options.function_call_mode != FunctionCallMode::None;
            if offer_user_functions {
                request.functions = self.registry.definitions();
            }
            if plan.mode == OutputMode::FinalResult {
                // Schema re-derived on every attempt.
                request.functions.push(final_result_definition(&plan.signature)?);
                request.function_call = Some(if offer_user_functions {
                    FunctionCallMode::Required
                } else {
                    FunctionCallMode::Named(defaults::generation::FINAL_RESULT_FUNCTION.to_string())
                });
            } else if offer_user_functions {
                request.function_call = Some(options.function_call_mode.clone());
            }
        }
        if plan.mode == OutputMode::Native {
            request.response_format = Some(ResponseFormat::JsonSchema {
                name: "output".to_string(),
                schema: plan.signature.output_schema()?,
                strict: true,
            });
        }
        Ok(request)
    }

    fn evaluate(&self, plan: &Plan, candidate: &CandidateResult, options: &ResolvedOptions) -> Outcome {
        // A cut-off answer is never accepted, even when what arrived happens to parse.
        if candidate.finish_reason == Some(FinishReason::Length) {
            return Outcome::Correction(LlmError::FieldValidation(ValidationError::single(
                FieldError::new(
                    "output",
                    "was cut off before it was complete; give the full answer more concisely",
                ),
            )));
        }
        let final_name = defaults::generation::FINAL_RESULT_FUNCTION;
        let (final_calls, user_calls): (Vec<&FunctionCall>, Vec<&FunctionCall>) = candidate
            .function_calls
            .iter()
            .partition(|c| c.name == final_name);
        if !user_calls.is_empty() {
            let calls: Vec<FunctionCall> = user_calls.into_iter().cloned().collect();
            let turn = CandidateResult {
                function_calls: calls.clone(),
                ..candidate.clone()
            };
            return Outcome::Functions { calls, turn };
        }

        let content = candidate.content.as_deref().unwrap_or_default();
        let extracted = match plan.mode {
            OutputMode::Text => extract_text(
                &plan.signature,
                content,
                &ExtractOptions {
                    strict: options.strict_mode,
                    thought_field_name: &options.thought_field_name,
                },
            ),
            OutputMode::JsonText | OutputMode::Native => extract_json(content),
            OutputMode::FinalResult => match final_calls.first() {
                Some(call) => match call.arguments.to_value() {
                    Ok(Value::Object(map)) => Ok(map),
                    _ => Err(ValidationError::single(FieldError::new(
                        "output",
                        format!("the arguments of `{final_name}` must be a JSON object of the output fields"),
                    ))),
                },
                None => extract_json(content).map_err(|_| {
                    ValidationError::single(FieldError::new(
                        "output",
                        format!("call the `{final_name}` function with the output fields as its arguments"),
                    ))
                }),
            },
        };
        let mut values = match extracted {
            Ok(values) => values,
            Err(e) => return Outcome::Correction(LlmError::FieldValidation(e)),
        };
        if plan.mode != OutputMode::Text && !options.strict_mode {
            normalize_json(&plan.signature, &mut values);
        }

        if !plan.injected.is_empty() {
            let calls = extract_tool_calls(&plan.injected, &mut values);
            if !calls.is_empty() {
                let turn = CandidateResult {
                    function_calls: calls.clone(),
                    ..candidate.clone()
                };
                return Outcome::Functions { calls, turn };
            }
        }

        if let Err(e) = plan.signature.validate_output(&values) {
            return Outcome::Correction(LlmError::FieldValidation(e));
        }
        if let Some(message) = first_failure(&self.assertions, &values) {
            return Outcome::Correction(LlmError::AssertionFailed(message));
        }
        if options.show_thoughts {
            if let Some(thought) = candidate.thought.as_ref().filter(|t| !t.is_empty()) {
                values
                    .entry(options.thought_field_name.clone())
                    .or_insert_with(|| Value::String(thought.clone()));
            }
        }
        Outcome::Success(values)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_call(
        &self,
        service: &dyn ModelService,
        trace_id: &str,
        span_id: &str,
        state: &AttemptState,
        attempt: usize,
        elapsed: Duration,
        response: &Result<ChatResponse, LlmError>,
    ) {
        if !self.telemetry.is_enabled() {
            return;
        }
        let mut event = GenerationEvent::new(
            uuid::Uuid::new_v4().to_string(),
            trace_id.to_string(),
            service.name().to_string(),
            state.step,
            attempt,
        )
        .with_parent(span_id)
        .with_duration(elapsed);
        match response {
            Ok(r) => {
                if let Some(usage) = r.usage {
                    event = event.with_usage(usage);
                }
                if let Some(reason) = r.first().and_then(|c| c.finish_reason.clone()) {
                    event = event.with_finish_reason(reason);
                }
                if let Some(model) = &r.model {
                    event = event.with_metadata("model", model.clone());
                }
            }
            Err(e) => event = event.with_error(e.to_string()),
        }
        self.telemetry.emit(TelemetryEvent::Generation(event)).await;
        self.telemetry
            .metric(
                MetricEvent::counter(trace_id.to_string(), defaults::telemetry::MODEL_CALLS, 1.0)
                    .with_attribute("service", service.name()),
            )
            .await;
    }
}

fn aborted(options: &ResolvedOptions) -> LlmError {
    LlmError::Aborted(
        options
            .cancel
            .reason()
            .unwrap_or_else(|| "cancelled".to_string()),
    )
}

async fn call_buffered(
    service: &dyn ModelService,
    request: ChatRequest,
    options: &ResolvedOptions,
) -> Result<ChatResponse, LlmError> {
    tokio::select! {
        biased;
        _ = options.cancel.cancelled() => Err(aborted(options)),
        response = service.chat(request) => response,
    }
}

async fn call_streaming(
    service: &dyn ModelService,
    request: ChatRequest,
    options: &ResolvedOptions,
    emitter: &mut DeltaEmitter<'_>,
) -> Result<ChatResponse, LlmError> {
    let stream = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(aborted(options)),
        stream = service.chat_stream(request) => stream?,
    };
    let mut stream = make_cancellable_stream(stream, &options.cancel);
    let mut state = StreamState::default();
    while let Some(event) = stream.next().await {
        state = state.fold(event?)?;
        emitter.observe(&state);
    }
    if options.cancel.is_cancelled() {
        return Err(aborted(options));
    }
    let usage = state.usage;
    Ok(ChatResponse {
        results: vec![state.into_candidate()],
        usage,
        model: None,
    })
}

fn final_result_definition(signature: &Signature) -> Result<FunctionDefinition, LlmError> {
    Ok(FunctionDefinition::new(
        defaults::generation::FINAL_RESULT_FUNCTION,
        "Return the final answer. The arguments are the output fields.",
        Some(signature.output_schema()?),
    ))
}

/// Text recorded in memory for an answer: the content, or the arguments of
/// the `__finalResult` call when the answer came through it.
fn answer_text(candidate: &CandidateResult) -> String {
    if let Some(content) = candidate.content.as_ref().filter(|c| !c.trim().is_empty()) {
        return content.clone();
    }
    candidate
        .function_calls
        .iter()
        .find(|c| c.name == defaults::generation::FINAL_RESULT_FUNCTION)
        .map(|c| c.arguments.as_text())
        .unwrap_or_default()
}

/// The user turn sent after a rejected answer.
pub(crate) fn correction_message(error: &LlmError) -> String {
    let mut text = String::from(
        "The previous response did not satisfy the requirements. Fix the following issues and answer again in the required format:",
    );
    match error {
        LlmError::FieldValidation(v) => {
            for e in &v.errors {
                text.push_str(&format!("\n- `{}`: {}", e.field, e.message));
            }
        }
        LlmError::AssertionFailed(message) => {
            text.push_str("\n- ");
            text.push_str(message);
        }
        other => {
            text.push_str("\n- ");
            text.push_str(&other.to_string());
        }
    }
    text
}

fn check_media(turns: &[ChatTurn], caps: ServiceCapabilities) -> Result<(), LlmError> {
    for turn in turns {
        let ChatTurn::User {
            content: UserContent::Parts(parts),
        } = turn
        else {
            continue;
        };
        for part in parts {
            let (supported, kind) = match part {
                ContentPart::Text { .. } => continue,
                ContentPart::Image { .. } => (caps.images, "image"),
                ContentPart::Audio { .. } => (caps.audio, "audio"),
                ContentPart::File { .. } => (caps.files, "file"),
            };
            if !supported {
                return Err(LlmError::UnsupportedFeature(format!(
                    "{kind} input is not supported by this model service"
                )));
            }
        }
    }
    Ok(())
}

/// Builder for [`Generator`].
#[derive(Debug)]
pub struct GeneratorBuilder {
    generator: Generator,
    functions: Vec<Function>,
}

impl GeneratorBuilder {
    pub fn function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    pub fn functions(mut self, functions: impl IntoIterator<Item = Function>) -> Self {
        self.functions.extend(functions);
        self
    }

    pub fn example(mut self, example: Example) -> Self {
        self.generator.examples.push(example);
        self
    }

    pub fn examples(mut self, examples: impl IntoIterator<Item = Example>) -> Self {
        self.generator.examples.extend(examples);
        self
    }

    pub fn assertion(mut self, assertion: Assertion) -> Self {
        self.generator.assertions.push(assertion);
        self
    }

    /// Shorthand for [`Assertion::check`].
    pub fn assert(
        self,
        message: impl Into<String>,
        predicate: impl Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.assertion(Assertion::check(message, predicate))
    }

    pub fn options(mut self, options: GeneratorOptions) -> Self {
        self.generator.options = options;
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.generator.telemetry = telemetry;
        self
    }

    /// Register functions and check the setup.
    pub fn build(mut self) -> Result<Generator, LlmError> {
        for function in self.functions {
            self.generator.registry.register(function)?;
        }
        let thought = &self.generator.options.thought_field_name;
        if self.generator.signature.output_field(thought).is_some() {
            debug!(field = %thought, "thought field is also a declared output");
        }
        Ok(self.generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionHandler;
    use crate::memory::SharedMemory;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    struct Scripted {
        caps: ServiceCapabilities,
        responses: Mutex<Vec<ChatResponse>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(caps: ServiceCapabilities, responses: Vec<ChatResponse>) -> Self {
            Self {
                caps,
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelService for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> ServiceCapabilities {
            self.caps
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::ServiceError("script exhausted".into()));
            }
            Ok(responses.remove(0))
        }
    }

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn corrects_invalid_number_then_cleans_memory() {
        let generator = Generator::new(Signature::parse("question -> answer, score:number").unwrap());
        let service = Scripted::new(
            ServiceCapabilities::text_only(),
            vec![
                ChatResponse::text("Answer: Paris\nScore: high"),
                ChatResponse::text("Answer: Paris\nScore: 9").with_usage(Usage::new(10, 2)),
            ],
        );
        let memory: SharedMemory = TaggedMemory::default().shared();
        let result = generator
            .forward(
                &service,
                input(json!({"question": "Capital of France?"})),
                ForwardOptions::new().with_memory(memory.clone()),
            )
            .await
            .unwrap();
        assert_eq!(result.output, input(json!({"answer": "Paris", "score": 9})));
        assert_eq!(result.model_calls, 2);
        assert_eq!(result.retries, 1);
        assert_eq!(result.usage.total_tokens, 12);

        let requests = service.requests();
        let correction = requests[1].turns.last().unwrap().text().unwrap();
        assert!(correction.contains("`score`: must be a number"), "{correction}");
        assert!(logs_contain("requesting correction"));

        let memory = memory.lock().await;
        assert!(!memory.has_tag("correction"));
        assert_eq!(memory.len(), 2);
    }

    #[tokio::test]
    async fn budget_is_strict() {
        let generator = Generator::builder(Signature::parse("q -> n:number").unwrap())
            .options(GeneratorOptions::default().with_max_retries(1))
            .build()
            .unwrap();
        let service = Scripted::new(
            ServiceCapabilities::text_only(),
            vec![
                ChatResponse::text("N: x"),
                ChatResponse::text("N: y"),
                ChatResponse::text("N: 3"),
            ],
        );
        let err = generator
            .forward(&service, input(json!({"q": "?"})), ForwardOptions::new())
            .await
            .unwrap_err();
        match err {
            LlmError::RetryBudgetExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error.field_errors()[0].field, "n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(service.requests().len(), 2);
    }

    #[tokio::test]
    async fn native_structured_output_skips_final_result() {
        let sig = Signature::builder()
            .input(crate::signature::Field::string("q"))
            .output(crate::signature::Field::object("items", vec![crate::signature::Field::string("name")]).array())
            .build()
            .unwrap();
        let generator = Generator::new(sig);
        let service = Scripted::new(
            ServiceCapabilities::full(),
            vec![ChatResponse::text(r#"{"items": [{"name": "a"}]}"#)],
        );
        let result = generator
            .forward(&service, input(json!({"q": "list"})), ForwardOptions::new())
            .await
            .unwrap();
        assert_eq!(result.output["items"], json!([{"name": "a"}]));
        let request = &service.requests()[0];
        assert!(matches!(request.response_format, Some(ResponseFormat::JsonSchema { .. })));
        assert!(request.functions.is_empty());
        assert!(request.function_call.is_none());
    }

    #[tokio::test]
    async fn functions_update_params_for_next_call() {
        let generator = Generator::builder(Signature::parse("q -> answer").unwrap())
            .function(
                Function::new("cool_down", "Lower the temperature").with_handler(
                    FunctionHandler::with_context(|_, ctx| async move {
                        ctx.update_params(|p| p.temperature = Some(0.0));
                        Ok(json!("done"))
                    }),
                ),
            )
            .options(
                GeneratorOptions::default()
                    .with_model_params(crate::types::ModelParams::default().with_temperature(1.0)),
            )
            .build()
            .unwrap();
        let service = Scripted::new(
            ServiceCapabilities::full(),
            vec![
                ChatResponse::function_calls(vec![FunctionCall::raw("c1", "cool_down", "")]),
                ChatResponse::text("Answer: ok"),
            ],
        );
        let result = generator
            .forward(&service, input(json!({"q": "?"})), ForwardOptions::new())
            .await
            .unwrap();
        assert_eq!(result.steps, 2);
        assert!(result.functions_executed.contains("cool_down"));
        let requests = service.requests();
        assert_eq!(requests[0].params.temperature, Some(1.0));
        assert_eq!(requests[1].params.temperature, Some(0.0));
        assert_eq!(requests[0].function_call, Some(FunctionCallMode::Auto));
    }

    #[tokio::test]
    async fn step_budget() {
        let generator = Generator::builder(Signature::parse("q -> answer").unwrap())
            .function(
                Function::new("loop", "Loops").with_handler(FunctionHandler::no_args(|| async {
                    Ok(json!("again"))
                })),
            )
            .options(GeneratorOptions::default().with_max_steps(2))
            .build()
            .unwrap();
        let call = || ChatResponse::function_calls(vec![FunctionCall::raw("c", "loop", "")]);
        let service = Scripted::new(ServiceCapabilities::full(), vec![call(), call(), call()]);
        let err = generator
            .forward(&service, input(json!({"q": "?"})), ForwardOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MaxStepsExceeded(2)));
        assert_eq!(service.requests().len(), 2);
    }

    #[test]
    fn correction_messages_list_every_issue() {
        let err = LlmError::FieldValidation(ValidationError::new(vec![
            FieldError::new("a", "is required"),
            FieldError::new("b", "must be a number"),
        ]));
        let text = correction_message(&err);
        assert!(text.contains("- `a`: is required\n- `b`: must be a number"));
        assert!(correction_message(&LlmError::AssertionFailed("too short".into())).ends_with("- too short"));
    }
}
