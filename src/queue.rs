// Priority FIFO over admitted sequence requests.
//
// Three bands: HIGH drains ahead of NORMAL; CHAINED is placed at the head
// of NORMAL (behind other waiting CHAINED requests) so the drainer picks it
// immediately after the currently executing chain settles. Order within a
// band is arrival order.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::model::{Priority, SequenceRequest};

/// Introspection view of one queued request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequestInfo {
    pub sequence_name: String,
    pub request_id: String,
    pub priority: Priority,
    pub waited_ms: u64,
}

#[derive(Debug, Default)]
pub struct ExecutionQueue {
    high: VecDeque<SequenceRequest>,
    normal: VecDeque<SequenceRequest>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, request: SequenceRequest) {
        match request.priority {
            Priority::High => self.high.push_back(request),
            Priority::Normal => self.normal.push_back(request),
            Priority::Chained => {
                // Head of NORMAL, preserving arrival order among the
                // chained requests already waiting there.
                let insert_at = self
                    .normal
                    .iter()
                    .position(|queued| queued.priority != Priority::Chained)
                    .unwrap_or(self.normal.len());
                self.normal.insert(insert_at, request);
            }
        }
    }

    pub fn dequeue(&mut self) -> Option<SequenceRequest> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn peek(&self) -> Option<&SequenceRequest> {
        self.high.front().or_else(|| self.normal.front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    /// Snapshot in drain order.
    pub fn snapshot(&self) -> Vec<QueuedRequestInfo> {
        self.high
            .iter()
            .chain(self.normal.iter())
            .map(|request| QueuedRequestInfo {
                sequence_name: request.sequence_name.clone(),
                request_id: request.request_id.clone(),
                priority: request.priority,
                waited_ms: request.queued_at.elapsed().as_millis() as u64,
            })
            .collect()
    }
}
