// # Sequence Executor
//
// Drives exactly one admitted request to its terminal event, walking
// movements and beats in declaration order and honoring each beat's timing
// discipline and error policy. Lifecycle topics are emitted on the bus at
// every transition; the beat's own event is emitted when it completes.
//
// Only one sequence executes at a time process-wide. Cancellation is
// cooperative: an override flags the running instance, the current beat is
// never preempted, and the flag is observed at the beat's settlement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::bus::{topics, EventBus};
use crate::model::{ErrorStrategy, HandlerTable, Sequence, SequenceRequest, Timing};
use crate::utilities::create_execution_context;

/// Terminal state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Cancelled,
}

/// What the drainer receives when a run settles.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub reason: Option<String>,
    pub payload: Value,
    pub runtime: Duration,
}

// Cooperative cancellation flag for the running instance. Set once by the
// orchestrator on override, observed between beat settlements.
#[derive(Debug, Default)]
struct CancelFlag {
    reason: Mutex<Option<String>>,
}

impl CancelFlag {
    fn request(&self, reason: &str) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
    }

    fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

struct ActiveSequence {
    instance_id: String,
    cancel: Arc<CancelFlag>,
}

pub struct SequenceExecutor {
    running: AtomicBool,
    active: Mutex<Option<ActiveSequence>>,
}

impl SequenceExecutor {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flag the running instance for cooperative cancellation. Returns
    /// false when `instance_id` is not currently executing.
    pub fn request_cancellation(&self, instance_id: &str, reason: &str) -> bool {
        let active = self.active.lock();
        match active.as_ref() {
            Some(current) if current.instance_id == instance_id => {
                current.cancel.request(reason);
                debug!(instance = instance_id, reason, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Run one request to its terminal event. Never returns an error; every
    /// failure mode is folded into the outcome and the emitted topics.
    pub async fn run(
        &self,
        request: SequenceRequest,
        sequence: Arc<Sequence>,
        handlers: HandlerTable,
        bus: Arc<EventBus>,
    ) -> ExecutionOutcome {
        let cancel = Arc::new(CancelFlag::default());
        self.running.store(true, Ordering::SeqCst);
        *self.active.lock() = Some(ActiveSequence {
            instance_id: request.instance_id.clone(),
            cancel: Arc::clone(&cancel),
        });

        let outcome = self.drive(&request, &sequence, &handlers, &bus, &cancel).await;

        *self.active.lock() = None;
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn drive(
        &self,
        request: &SequenceRequest,
        sequence: &Sequence,
        handlers: &HandlerTable,
        bus: &Arc<EventBus>,
        cancel: &Arc<CancelFlag>,
    ) -> ExecutionOutcome {
        let started_at = Instant::now();
        let mut payload = match &request.data {
            Value::Object(_) => request.data.clone(),
            _ => Value::Object(Map::new()),
        };

        bus.emit(
            topics::SEQUENCE_STARTED,
            json!({
                "sequenceName": request.sequence_name,
                "requestId": request.request_id,
                "instanceId": request.instance_id,
            }),
        );

        for (movement_index, movement) in sequence.movements.iter().enumerate() {
            bus.emit(
                topics::MOVEMENT_STARTED,
                json!({
                    "sequenceName": request.sequence_name,
                    "requestId": request.request_id,
                    "movement": movement.name,
                    "movementIndex": movement_index,
                }),
            );

            for beat in &movement.beats {
                if let Some(reason) = cancel.reason() {
                    return self.cancelled(request, bus, payload, started_at, reason);
                }

                if let Timing::Delayed(delay_ms) = beat.timing {
                    sleep(Duration::from_millis(delay_ms)).await;
                }

                bus.emit(
                    topics::BEAT_STARTED,
                    json!({
                        "sequenceName": request.sequence_name,
                        "requestId": request.request_id,
                        "beat": beat.beat,
                        "event": beat.event,
                    }),
                );

                // Static beat data sits under the accumulating payload.
                merge_under(&mut payload, &beat.data);

                let ctx = create_execution_context(
                    request,
                    Arc::clone(bus),
                    movement_index,
                    beat.beat,
                    beat.timing,
                    payload.clone(),
                );

                let result = match handlers.get(&beat.event) {
                    Some(handler) => handler.handle(payload.clone(), &ctx).await,
                    // No handler: pure bus emission with a no-op body.
                    None => Ok(None),
                };

                match result {
                    Ok(returned) => {
                        if let Some(Value::Object(map)) = &returned {
                            merge_over(&mut payload, map);
                        }
                        let result_value = returned.unwrap_or(Value::Null);
                        bus.emit(
                            topics::BEAT_COMPLETED,
                            json!({
                                "sequenceName": request.sequence_name,
                                "requestId": request.request_id,
                                "beat": beat.beat,
                                "event": beat.event,
                                "result": result_value,
                            }),
                        );

                        let mut event_payload = ctx.to_payload();
                        if let Value::Object(map) = &mut event_payload {
                            map.insert("payload".into(), payload.clone());
                            map.insert("result".into(), result_value);
                        }
                        bus.emit(&beat.event, event_payload);
                    }
                    Err(err) => {
                        warn!(
                            sequence = %request.sequence_name,
                            beat = beat.beat,
                            event = %beat.event,
                            error = %err,
                            "beat handler failed"
                        );
                        bus.emit(
                            topics::BEAT_FAILED,
                            json!({
                                "sequenceName": request.sequence_name,
                                "requestId": request.request_id,
                                "beat": beat.beat,
                                "event": beat.event,
                                "error": err.to_string(),
                            }),
                        );

                        match beat.error_handling {
                            ErrorStrategy::Continue => {
                                record_beat_error(&mut payload, beat.beat, &beat.event, &err);
                            }
                            ErrorStrategy::Stop => {
                                return self.failed(
                                    request,
                                    bus,
                                    payload,
                                    started_at,
                                    err.to_string(),
                                    false,
                                );
                            }
                            ErrorStrategy::AbortSequence => {
                                return self.failed(
                                    request,
                                    bus,
                                    payload,
                                    started_at,
                                    err.to_string(),
                                    true,
                                );
                            }
                        }
                    }
                }

                // Settlement point: a flag raised while the handler ran is
                // honored before the next beat starts.
                if let Some(reason) = cancel.reason() {
                    return self.cancelled(request, bus, payload, started_at, reason);
                }
            }
        }

        let runtime = started_at.elapsed();
        bus.emit(
            topics::SEQUENCE_COMPLETED,
            json!({
                "sequenceName": request.sequence_name,
                "requestId": request.request_id,
                "runtimeMs": runtime.as_millis() as u64,
            }),
        );
        ExecutionOutcome {
            status: ExecutionStatus::Completed,
            reason: None,
            payload,
            runtime,
        }
    }

    fn failed(
        &self,
        request: &SequenceRequest,
        bus: &Arc<EventBus>,
        payload: Value,
        started_at: Instant,
        reason: String,
        aborted: bool,
    ) -> ExecutionOutcome {
        bus.emit(
            topics::SEQUENCE_FAILED,
            json!({
                "sequenceName": request.sequence_name,
                "requestId": request.request_id,
                "reason": reason,
                "aborted": aborted,
            }),
        );
        ExecutionOutcome {
            status: ExecutionStatus::Failed,
            reason: Some(reason),
            payload,
            runtime: started_at.elapsed(),
        }
    }

    fn cancelled(
        &self,
        request: &SequenceRequest,
        bus: &Arc<EventBus>,
        payload: Value,
        started_at: Instant,
        reason: String,
    ) -> ExecutionOutcome {
        bus.emit(
            topics::SEQUENCE_CANCELLED,
            json!({
                "sequenceName": request.sequence_name,
                "requestId": request.request_id,
                "reason": reason,
            }),
        );
        ExecutionOutcome {
            status: ExecutionStatus::Cancelled,
            reason: Some(reason),
            payload,
            runtime: started_at.elapsed(),
        }
    }
}

impl Default for SequenceExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// Insert `defaults` keys absent from `payload`; existing keys win.
fn merge_under(payload: &mut Value, defaults: &Value) {
    let Value::Object(defaults) = defaults else {
        return;
    };
    if !payload.is_object() {
        *payload = Value::Object(Map::new());
    }
    if let Value::Object(target) = payload {
        for (key, value) in defaults {
            target.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

// Shallow merge where `updates` keys replace existing ones.
fn merge_over(payload: &mut Value, updates: &Map<String, Value>) {
    if !payload.is_object() {
        *payload = Value::Object(Map::new());
    }
    if let Value::Object(target) = payload {
        for (key, value) in updates {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn record_beat_error(
    payload: &mut Value,
    beat: u32,
    event: &str,
    err: &crate::error::ConductorError,
) {
    if !payload.is_object() {
        *payload = Value::Object(Map::new());
    }
    if let Value::Object(target) = payload {
        let errors = target
            .entry("_errors".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = errors {
            list.push(json!({
                "beat": beat,
                "event": event,
                "error": err.to_string(),
            }));
        }
    }
}
