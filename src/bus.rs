// # Event Bus
//
// Process-wide topic pub/sub shared by the orchestration core and its
// clients. Lifecycle events and plugin beat events travel over the same bus.
//
// ## Semantics
//
// - Topics are dot/colon segmented strings.
// - A subscription pattern ending in `*` matches any topic sharing the
//   prefix before the `*`; any other pattern matches literally.
// - Dispatch is synchronous, in subscription order across all patterns.
// - A failing listener never prevents later listeners from running: the
//   error is captured, logged, and reported on `bus:listener-error`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::Result;

// Stable topic names emitted by the orchestration core. The `sequence:`,
// `movement:`, `beat:` and `bus:` prefixes are reserved; plugin beat events
// must not collide with them.
pub mod topics {
    pub const SEQUENCE_QUEUED: &str = "sequence:queued";
    pub const SEQUENCE_STARTED: &str = "sequence:started";
    pub const SEQUENCE_COMPLETED: &str = "sequence:completed";
    pub const SEQUENCE_FAILED: &str = "sequence:failed";
    pub const SEQUENCE_CANCELLED: &str = "sequence:cancelled";
    pub const MOVEMENT_STARTED: &str = "movement:started";
    pub const BEAT_STARTED: &str = "beat:started";
    pub const BEAT_COMPLETED: &str = "beat:completed";
    pub const BEAT_FAILED: &str = "beat:failed";
    pub const LISTENER_ERROR: &str = "bus:listener-error";

    /// Prefixes reserved for lifecycle topics.
    pub const RESERVED_PREFIXES: [&str; 4] = ["sequence:", "movement:", "beat:", "bus:"];
}

/// An event delivered to bus listeners. `topic` carries the concrete topic
/// so wildcard subscribers can tell deliveries apart.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
}

/// Listener callback. Returning an error reports the failure on
/// `bus:listener-error` without affecting other listeners.
pub type Listener = Arc<dyn Fn(&BusEvent) -> Result<()> + Send + Sync>;

/// Identifies one subscription. Subscribing the same closure twice yields
/// two independent subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct SubscriberEntry {
    id: SubscriptionId,
    pattern: String,
    listener: Listener,
}

/// Handle returned by the facade; detaches its listener on `unsubscribe`.
pub struct Subscription {
    bus: Arc<EventBus>,
    id: SubscriptionId,
}

impl Subscription {
    pub fn new(bus: Arc<EventBus>, id: SubscriptionId) -> Self {
        Self { bus, id }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) -> bool {
        self.bus.unsubscribe(self.id)
    }
}

pub struct EventBus {
    // Insertion-ordered so dispatch follows subscription order.
    subscribers: RwLock<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // Register a listener for all topics matching `pattern`.
    pub fn subscribe(&self, pattern: &str, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut subscribers = self.subscribers.write();
        subscribers.push(SubscriberEntry {
            id,
            pattern: pattern.to_string(),
            listener,
        });
        debug!(pattern, subscription = id.0, "bus subscription added");
        id
    }

    // Convenience wrapper taking a plain closure.
    pub fn subscribe_fn<F>(&self, pattern: &str, f: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(pattern, Arc::new(f))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|entry| entry.id != id);
        subscribers.len() != before
    }

    // Deliver `payload` to every listener whose pattern matches `topic`,
    // synchronously and in subscription order. Listeners run outside the
    // subscriber lock so they may subscribe, unsubscribe, or emit.
    pub fn emit(&self, topic: &str, payload: Value) {
        let matched: Vec<Listener> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|entry| Self::matches(&entry.pattern, topic))
                .map(|entry| Arc::clone(&entry.listener))
                .collect()
        };

        if matched.is_empty() {
            return;
        }

        let event = BusEvent {
            topic: topic.to_string(),
            payload,
        };

        for listener in matched {
            if let Err(err) = listener(&event) {
                warn!(topic, error = %err, "bus listener failed");
                // Never re-emit on the original topic; failures of the
                // error topic's own listeners are only logged.
                if topic != topics::LISTENER_ERROR {
                    self.emit(
                        topics::LISTENER_ERROR,
                        json!({ "topic": topic, "error": err.to_string() }),
                    );
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    fn matches(pattern: &str, topic: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => topic.starts_with(prefix),
            None => pattern == topic,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
