// # Sequence Data Model
//
// Declarative workflow definitions (sequences, movements, beats), the
// handler surface invoked by the executor, and the request/context types
// that flow through admission and execution.
//
// A sequence is immutable once registered; re-registration under the same
// name replaces the previous binding atomically.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::EventBus;
use crate::delegator::ConflictResolution;
use crate::error::Result;

/// Scheduling priority of a sequence request.
///
/// `Chained` is a scheduling hint: run immediately after the currently
/// executing chain completes, ahead of ordinary `Normal` arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Normal,
    Chained,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::Chained => write!(f, "CHAINED"),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Timing discipline of a beat relative to the previous beat's settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timing {
    /// Invoke within the current cooperative turn.
    Immediate,
    /// Invoke only after the previous beat's handler settled.
    AfterBeat,
    /// Invoke after the given delay from the previous beat's completion.
    Delayed(u64),
}

impl Default for Timing {
    fn default() -> Self {
        Timing::Immediate
    }
}

/// Per-beat policy applied when a handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategy {
    /// Terminate the sequence.
    Stop,
    /// Record the error under the payload's `_errors` list and proceed.
    Continue,
    /// Terminate the sequence, flagged as a controlled abort.
    AbortSequence,
}

impl Default for ErrorStrategy {
    fn default() -> Self {
        ErrorStrategy::Stop
    }
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStrategy::Stop => write!(f, "stop"),
            ErrorStrategy::Continue => write!(f, "continue"),
            ErrorStrategy::AbortSequence => write!(f, "abort-sequence"),
        }
    }
}

/// Informational loudness marking on a beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dynamics {
    Pianissimo,
    Piano,
    MezzoPiano,
    MezzoForte,
    Forte,
    Fortissimo,
}

impl Default for Dynamics {
    fn default() -> Self {
        Dynamics::MezzoForte
    }
}

/// Informational grouping of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceCategory {
    UserInteraction,
    DataOperation,
    SystemMaintenance,
    General,
}

impl Default for SequenceCategory {
    fn default() -> Self {
        SequenceCategory::General
    }
}

/// How the current beat was scheduled, surfaced to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionType {
    Immediate,
    Consecutive,
}

/// Atomic scheduled unit: binds a logical event to a handler with a timing
/// discipline and an error policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beat {
    /// 1-based index within the movement; must equal its position.
    pub beat: u32,
    /// Logical topic name, emitted on the bus when the beat completes.
    pub event: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dynamics: Dynamics,
    #[serde(default)]
    pub timing: Timing,
    /// Static payload merged under the runtime payload before the handler.
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error_handling: ErrorStrategy,
}

impl Beat {
    pub fn new(beat: u32, event: impl Into<String>) -> Self {
        Self {
            beat,
            event: event.into(),
            title: String::new(),
            description: String::new(),
            dynamics: Dynamics::default(),
            timing: Timing::default(),
            data: Value::Null,
            error_handling: ErrorStrategy::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_error_handling(mut self, strategy: ErrorStrategy) -> Self {
        self.error_handling = strategy;
        self
    }
}

/// Ordered grouping of beats; purely organizational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub beats: Vec<Beat>,
}

impl Movement {
    pub fn new(name: impl Into<String>, beats: Vec<Beat>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            beats,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Named declarative workflow: ordered movements of ordered beats.
///
/// The `name` is the registry key, dotted `<Domain>.<action>-symphony`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key: String,
    pub tempo: u32,
    #[serde(default)]
    pub category: SequenceCategory,
    pub movements: Vec<Movement>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, movements: Vec<Movement>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            key: String::new(),
            tempo: 120,
            category: SequenceCategory::default(),
            movements,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_tempo(mut self, tempo: u32) -> Self {
        self.tempo = tempo;
        self
    }

    pub fn with_category(mut self, category: SequenceCategory) -> Self {
        self.category = category;
        self
    }

    /// Total beats across all movements.
    pub fn beat_count(&self) -> usize {
        self.movements.iter().map(|m| m.beats.len()).sum()
    }
}

/// Context passed to every handler invocation.
///
/// `payload` is a snapshot of the accumulating payload at invocation time;
/// mutation happens by shallow merge of the handler's returned mapping.
#[derive(Clone)]
pub struct HandlerContext {
    pub sequence_name: String,
    pub symphony_name: String,
    pub request_id: String,
    pub instance_id: String,
    pub resource_id: String,
    pub priority: Priority,
    pub execution_type: ExecutionType,
    pub movement_index: usize,
    /// 1-based beat number within the current movement.
    pub beat_index: u32,
    pub payload: Value,
    pub bus: Arc<EventBus>,
}

impl HandlerContext {
    /// Render the context as a bus payload (camelCase keys, bus excluded).
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "sequenceName": self.sequence_name,
            "symphonyName": self.symphony_name,
            "requestId": self.request_id,
            "instanceId": self.instance_id,
            "resourceId": self.resource_id,
            "priority": self.priority,
            "executionType": self.execution_type,
            "movement": self.movement_index,
            "beat": self.beat_index,
            "payload": self.payload,
        })
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("sequence_name", &self.sequence_name)
            .field("request_id", &self.request_id)
            .field("movement_index", &self.movement_index)
            .field("beat_index", &self.beat_index)
            .finish()
    }
}

/// Handler bound to a beat event. Returning `Some(mapping)` merges the
/// mapping into the accumulating payload.
#[async_trait]
pub trait BeatHandler: Send + Sync {
    async fn handle(&self, data: Value, ctx: &HandlerContext) -> Result<Option<Value>>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> BeatHandler for FnHandler<F>
where
    F: Fn(Value, &HandlerContext) -> Result<Option<Value>> + Send + Sync,
{
    async fn handle(&self, data: Value, ctx: &HandlerContext) -> Result<Option<Value>> {
        (self.0)(data, ctx)
    }
}

struct FutureHandler<F>(F);

#[async_trait]
impl<F> BeatHandler for FutureHandler<F>
where
    F: Fn(Value, HandlerContext) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync,
{
    async fn handle(&self, data: Value, ctx: &HandlerContext) -> Result<Option<Value>> {
        (self.0)(data, ctx.clone()).await
    }
}

/// Mapping from beat event names to handlers. A beat whose event has no
/// entry is a pure bus emission: no-op body, event still emitted.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn BeatHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: impl Into<String>, handler: Arc<dyn BeatHandler>) {
        self.handlers.insert(event.into(), handler);
    }

    /// Bind a synchronous closure to an event.
    pub fn on<F>(mut self, event: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, &HandlerContext) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.insert(event, Arc::new(FnHandler(f)));
        self
    }

    /// Bind a future-returning closure to an event.
    pub fn on_async<F>(mut self, event: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, HandlerContext) -> BoxFuture<'static, Result<Option<Value>>>
            + Send
            + Sync
            + 'static,
    {
        self.insert(event, Arc::new(FutureHandler(f)));
        self
    }

    pub fn get(&self, event: &str) -> Option<&Arc<dyn BeatHandler>> {
        self.handlers.get(event)
    }

    pub fn events(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("events", &self.handlers.len())
            .finish()
    }
}

/// One admitted request for a sequence. Created by the orchestrator,
/// consumed exactly once by the executor.
#[derive(Debug, Clone)]
pub struct SequenceRequest {
    pub sequence_name: String,
    pub data: Value,
    pub priority: Priority,
    pub request_id: String,
    pub queued_at: Instant,
    pub instance_id: String,
    pub symphony_name: String,
    pub resource_id: String,
    pub conflict_resolution: ConflictResolution,
    pub sequence_hash: u64,
}

/// Outcome of a `play` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStartResult {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SequenceStartResult {
    pub fn accepted(request_id: String) -> Self {
        Self {
            request_id,
            success: true,
            is_duplicate: false,
            reason: None,
        }
    }

    pub fn duplicate(request_id: String) -> Self {
        Self {
            request_id,
            success: false,
            is_duplicate: true,
            reason: Some("duplicate-request".to_string()),
        }
    }

    pub fn failed(request_id: String, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            is_duplicate: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_display() {
        assert_eq!(Priority::High.to_string(), "HIGH");
        assert_eq!(Priority::Normal.to_string(), "NORMAL");
        assert_eq!(Priority::Chained.to_string(), "CHAINED");
    }

    #[test]
    fn test_error_strategy_serde_names() {
        let json = serde_json::to_value(ErrorStrategy::AbortSequence).unwrap();
        assert_eq!(json, "abort-sequence");
        let parsed: ErrorStrategy = serde_json::from_value(serde_json::json!("continue")).unwrap();
        assert_eq!(parsed, ErrorStrategy::Continue);
    }

    #[test]
    fn test_sequence_builder_and_beat_count() {
        let sequence = Sequence::new(
            "Canvas.drop-symphony",
            vec![
                Movement::new("prepare", vec![Beat::new(1, "canvas:prepare")]),
                Movement::new(
                    "apply",
                    vec![Beat::new(1, "canvas:apply"), Beat::new(2, "canvas:finish")],
                ),
            ],
        )
        .with_tempo(90)
        .with_category(SequenceCategory::UserInteraction);

        assert_eq!(sequence.beat_count(), 3);
        assert_eq!(sequence.tempo, 90);
    }

    #[tokio::test]
    async fn test_handler_table_dispatch() {
        let table = HandlerTable::new().on("ping", |data, _ctx| {
            Ok(Some(serde_json::json!({ "echo": data["value"] })))
        });

        let ctx = HandlerContext {
            sequence_name: "Demo.ping-symphony".into(),
            symphony_name: "Demo".into(),
            request_id: "r1".into(),
            instance_id: "i1".into(),
            resource_id: "Demo".into(),
            priority: Priority::Normal,
            execution_type: ExecutionType::Immediate,
            movement_index: 0,
            beat_index: 1,
            payload: Value::Null,
            bus: EventBus::new(),
        };

        let handler = table.get("ping").expect("handler registered");
        let result = handler
            .handle(serde_json::json!({ "value": 7 }), &ctx)
            .await
            .unwrap();
        assert_eq!(result, Some(serde_json::json!({ "echo": 7 })));
        assert!(table.get("missing").is_none());
    }
}
