//! Streaming output deltas.
//!
//! While a streamed model call is in flight the engine re-extracts the
//! partial answer after every chunk and emits what changed. String fields are
//! sent as appended suffixes, every other field as a full snapshot. Each model
//! call gets a new `version`; a consumer that sees the version change starts
//! over. A string that changes other than by appending also bumps the version,
//! and the next delta is a full snapshot of every visible field.

use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;

use super::engine::OutputMode;
use super::extract::{ExtractOptions, extract_partial_json, extract_partial_text};
use super::result::GenerationResult;
use crate::defaults;
use crate::signature::Signature;
use crate::streaming::StreamState;

/// Event yielded by a streaming generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardEvent {
    /// Output that changed during model call `version`
    Delta { version: u64, delta: Map<String, Value> },
    /// The validated final result; always the last event of a successful stream
    Done(GenerationResult),
}

/// Fold a delta into accumulated values: strings are appended, anything else replaced.
pub fn merge_delta(target: &mut Map<String, Value>, delta: &Map<String, Value>) {
    for (key, value) in delta {
        match (target.get_mut(key), value) {
            (Some(Value::String(existing)), Value::String(suffix)) => existing.push_str(suffix),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Tracks the latest partial output of a stream of [`ForwardEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct DeltaAccumulator {
    version: Option<u64>,
    values: Map<String, Value>,
    done: bool,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &ForwardEvent) {
        match event {
            ForwardEvent::Delta { version, delta } => {
                if self.version != Some(*version) {
                    self.version = Some(*version);
                    self.values.clear();
                }
                merge_delta(&mut self.values, delta);
            }
            ForwardEvent::Done(result) => {
                self.values = result.output.clone();
                self.done = true;
            }
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Emits deltas for one generation.
pub(crate) struct DeltaEmitter<'a> {
    tx: UnboundedSender<ForwardEvent>,
    /// Signature the answer is extracted with (may carry injected tool fields)
    extract_signature: &'a Signature,
    /// Signature whose non-internal outputs are visible to callers
    public_signature: &'a Signature,
    mode: OutputMode,
    strict: bool,
    thought_field_name: &'a str,
    version: u64,
    emitted: Map<String, Value>,
}

impl<'a> DeltaEmitter<'a> {
    pub fn new(
        tx: UnboundedSender<ForwardEvent>,
        extract_signature: &'a Signature,
        public_signature: &'a Signature,
        mode: OutputMode,
        strict: bool,
        thought_field_name: &'a str,
    ) -> Self {
        Self {
            tx,
            extract_signature,
            public_signature,
            mode,
            strict,
            thought_field_name,
            version: 0,
            emitted: Map::new(),
        }
    }

    /// Start a new model call.
    pub fn begin_call(&mut self) {
        self.version += 1;
        self.emitted.clear();
    }

    pub fn observe(&mut self, state: &StreamState) {
        let values = match self.mode {
            OutputMode::Text => extract_partial_text(
                self.extract_signature,
                &state.content,
                &ExtractOptions {
                    strict: self.strict,
                    thought_field_name: self.thought_field_name,
                },
            ),
            OutputMode::JsonText | OutputMode::Native => {
                extract_partial_json(&state.content).unwrap_or_default()
            }
            OutputMode::FinalResult => state
                .calls
                .values()
                .find(|c| c.name == defaults::generation::FINAL_RESULT_FUNCTION)
                .and_then(|c| c.partial_arguments())
                .and_then(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default(),
        };
        let delta = self.diff(&values);
        if !delta.is_empty() {
            // A dropped receiver only means nobody is listening any more.
            let _ = self.tx.send(ForwardEvent::Delta {
                version: self.version,
                delta,
            });
        }
    }

    fn diff(&mut self, values: &Map<String, Value>) -> Map<String, Value> {
        if self.rewrites_sent_text(values) {
            self.version += 1;
            self.emitted.clear();
        }
        let mut delta = Map::new();
        for field in self.public_signature.output_fields() {
            if field.is_internal {
                continue;
            }
            let Some(next) = values.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            match (self.emitted.get(&field.name), next) {
                (Some(Value::String(prev)), Value::String(now)) if now.starts_with(prev.as_str()) => {
                    if now.len() > prev.len() {
                        delta.insert(field.name.clone(), Value::String(now[prev.len()..].to_string()));
                        self.emitted.insert(field.name.clone(), next.clone());
                    }
                }
                (Some(prev), now) if prev == now => {}
                _ => {
                    delta.insert(field.name.clone(), next.clone());
                    self.emitted.insert(field.name.clone(), next.clone());
                }
            }
        }
        delta
    }

    /// Whether a string already sent no longer prefixes its current value.
    fn rewrites_sent_text(&self, values: &Map<String, Value>) -> bool {
        self.emitted.iter().any(|(name, sent)| match (sent, values.get(name)) {
            (Value::String(prev), Some(Value::String(now))) => !now.starts_with(prev.as_str()),
            _ => false,
        })
    }
}
