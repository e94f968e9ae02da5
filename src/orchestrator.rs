// # Sequence Orchestrator
//
// Owns the admission pipeline and the queue drainer. Admission validates,
// deduplicates, arbitrates resource conflicts, enqueues, and kicks the
// drainer when the executor is idle; the drainer pops requests one at a
// time and hands them to the executor, so execution is strictly serialized
// process-wide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{topics, EventBus};
use crate::delegator::{ConflictResolution, ResourceDelegator};
use crate::error::{ConductorError, Result};
use crate::executor::{ExecutionStatus, SequenceExecutor};
use crate::model::{Priority, SequenceRequest, SequenceStartResult};
use crate::queue::{ExecutionQueue, QueuedRequestInfo};
use crate::registry::SequenceRegistry;
use crate::statistics::{StatisticsManager, StatisticsSnapshot};
use crate::utilities::{
    create_sequence_instance_id, extract_resource_id, extract_symphony_name,
};
use crate::validator::SequenceValidator;

pub struct SequenceOrchestrator {
    bus: Arc<EventBus>,
    registry: Arc<SequenceRegistry>,
    validator: Arc<SequenceValidator>,
    delegator: Arc<ResourceDelegator>,
    statistics: Arc<StatisticsManager>,
    executor: Arc<SequenceExecutor>,
    queue: Mutex<ExecutionQueue>,
    drain_scheduled: AtomicBool,
}

impl SequenceOrchestrator {
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<SequenceRegistry>,
        validator: Arc<SequenceValidator>,
        delegator: Arc<ResourceDelegator>,
        statistics: Arc<StatisticsManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            registry,
            validator,
            delegator,
            statistics,
            executor: Arc::new(SequenceExecutor::new()),
            queue: Mutex::new(ExecutionQueue::new()),
            drain_scheduled: AtomicBool::new(false),
        })
    }

    /// Admit a request for `name`. Admission is synchronous; execution is
    /// deferred to the drainer on the next cooperative turn.
    pub fn start_sequence(
        self: &Arc<Self>,
        name: &str,
        data: Value,
        priority: Priority,
    ) -> Result<SequenceStartResult> {
        if self.registry.get(name).is_none() {
            self.bus.emit(
                topics::SEQUENCE_FAILED,
                json!({ "sequenceName": name, "reason": "sequence-not-found" }),
            );
            return Err(ConductorError::SequenceNotFound(name.to_string()));
        }

        let check = self.validator.deduplicate_request(name, &data, priority);
        if check.is_duplicate {
            let request_id = format!("{}-duplicate", Uuid::new_v4());
            warn!(sequence = name, "duplicate request absorbed");
            self.statistics.record_duplicate();
            self.bus.emit(
                topics::SEQUENCE_CANCELLED,
                json!({
                    "sequenceName": name,
                    "requestId": request_id,
                    "reason": "duplicate-request",
                }),
            );
            return Ok(SequenceStartResult::duplicate(request_id));
        }
        // Recorded before any further admission work so a back-to-back
        // double invocation hits the window.
        self.validator.record_request_hash(check.hash);

        let symphony_name = extract_symphony_name(name).to_string();
        let resource_id = extract_resource_id(name, &data);
        let instance_id = create_sequence_instance_id(name, &data);

        let conflict =
            self.delegator
                .check_conflict(&resource_id, &instance_id, &symphony_name, priority);
        match conflict.resolution {
            ConflictResolution::Reject => {
                self.bus.emit(
                    topics::SEQUENCE_FAILED,
                    json!({
                        "sequenceName": name,
                        "reason": conflict.reason,
                        "resourceId": resource_id,
                    }),
                );
                return Err(ConductorError::ResourceRejected {
                    resource_id,
                    reason: conflict.reason,
                });
            }
            ConflictResolution::Override => {
                if let Some(incumbent) = &conflict.incumbent {
                    if self.executor.request_cancellation(incumbent, "preempted") {
                        info!(
                            resource = %resource_id,
                            incumbent = %incumbent,
                            "running owner flagged for preemption"
                        );
                    }
                }
                self.delegator
                    .acquire(&resource_id, &instance_id, &symphony_name, priority);
            }
            ConflictResolution::Allow => {
                self.delegator
                    .acquire(&resource_id, &instance_id, &symphony_name, priority);
            }
            // Ownership transfers when the request reaches the queue head.
            ConflictResolution::Queue => {}
        }

        let request = SequenceRequest {
            sequence_name: name.to_string(),
            data,
            priority,
            request_id: Uuid::new_v4().to_string(),
            queued_at: Instant::now(),
            instance_id,
            symphony_name,
            resource_id,
            conflict_resolution: conflict.resolution,
            sequence_hash: check.hash,
        };
        let request_id = request.request_id.clone();

        self.statistics.record_sequence_queued();
        let queue_length = {
            let mut queue = self.queue.lock();
            queue.enqueue(request);
            queue.len()
        };

        if !self.executor.is_running() {
            self.schedule_drain();
        }

        self.bus.emit(
            topics::SEQUENCE_QUEUED,
            json!({
                "sequenceName": name,
                "requestId": request_id,
                "priority": priority,
                "queueLength": queue_length,
            }),
        );

        Ok(SequenceStartResult::accepted(request_id))
    }

    // Kick the drainer on the next cooperative turn, at most once.
    fn schedule_drain(self: &Arc<Self>) {
        if !self.drain_scheduled.swap(true, Ordering::SeqCst) {
            let orchestrator = Arc::clone(self);
            tokio::spawn(async move {
                orchestrator.process_queue().await;
            });
        }
    }

    /// Drain the queue, executing one sequence at a time until empty. The
    /// drainer never propagates an error; every failure is folded into bus
    /// events and statistics and draining continues.
    pub async fn process_queue(self: Arc<Self>) {
        loop {
            if self.executor.is_running() {
                self.drain_scheduled.store(false, Ordering::SeqCst);
                return;
            }

            let Some(request) = self.queue.lock().dequeue() else {
                self.drain_scheduled.store(false, Ordering::SeqCst);
                // A request admitted between the empty check and the flag
                // reset must not be stranded.
                let refill = !self.queue.lock().is_empty();
                if refill && !self.drain_scheduled.swap(true, Ordering::SeqCst) {
                    continue;
                }
                return;
            };

            let Some(sequence) = self.registry.get(&request.sequence_name) else {
                warn!(
                    sequence = %request.sequence_name,
                    request = %request.request_id,
                    "sequence unregistered between admission and drain"
                );
                self.statistics.record_error();
                self.bus.emit(
                    topics::SEQUENCE_FAILED,
                    json!({
                        "sequenceName": request.sequence_name,
                        "requestId": request.request_id,
                        "reason": "missing-at-drain",
                    }),
                );
                // Admission-time ownership must not outlive the request.
                self.delegator
                    .release(&request.resource_id, &request.instance_id);
                continue;
            };

            // Queue-resolved requests take ownership here, at the head.
            self.delegator.acquire(
                &request.resource_id,
                &request.instance_id,
                &request.symphony_name,
                request.priority,
            );

            self.statistics.record_queue_wait(request.queued_at.elapsed());
            self.statistics.record_sequence_started();

            let handlers = self
                .registry
                .handlers(&request.sequence_name)
                .unwrap_or_default();
            let resource_id = request.resource_id.clone();
            let instance_id = request.instance_id.clone();

            debug!(
                sequence = %request.sequence_name,
                request = %request.request_id,
                "drain: executing"
            );
            let outcome = self
                .executor
                .run(request, sequence, handlers, Arc::clone(&self.bus))
                .await;

            self.delegator.release(&resource_id, &instance_id);
            match outcome.status {
                ExecutionStatus::Completed => {
                    self.statistics.record_sequence_completed(outcome.runtime)
                }
                ExecutionStatus::Failed => self.statistics.record_error(),
                ExecutionStatus::Cancelled => self.statistics.record_cancelled(),
            }
        }
    }

    pub fn is_executing(&self) -> bool {
        self.executor.is_running()
    }

    pub fn queue_snapshot(&self) -> Vec<QueuedRequestInfo> {
        self.queue.lock().snapshot()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<SequenceRegistry> {
        &self.registry
    }

    pub fn delegator(&self) -> &Arc<ResourceDelegator> {
        &self.delegator
    }
}
