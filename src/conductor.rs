// # MusicalConductor Facade
//
// The public entry point over the orchestration core: sequence playback,
// bus subscription, plugin registration, and introspection. A process-wide
// instance is available through `global()`, but construction is fully
// parameterizable so tests never need the global.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus, Subscription};
use crate::delegator::ResourceDelegator;
use crate::error::Result;
use crate::model::{HandlerTable, Priority, Sequence, SequenceStartResult};
use crate::orchestrator::SequenceOrchestrator;
use crate::queue::QueuedRequestInfo;
use crate::registry::SequenceRegistry;
use crate::statistics::{StatisticsManager, StatisticsSnapshot, DEFAULT_SAMPLE_WINDOW};
use crate::validator::SequenceValidator;

/// Conductor construction parameters.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Dedup window for idempotent admission, in milliseconds.
    pub dedup_window_ms: u64,
    /// Resources that reject rather than queue contending requests.
    pub strict_resources: HashSet<String>,
    /// Samples retained per statistics distribution.
    pub stats_sample_window: usize,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: crate::dedup::DEFAULT_WINDOW_MS,
            strict_resources: HashSet::new(),
            stats_sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

/// A `{sequence, handlers}` pair produced by a plugin module.
#[derive(Debug)]
pub struct SequencePlugin {
    pub sequence: Sequence,
    pub handlers: HandlerTable,
}

/// Acknowledgement returned by `register_plugin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRegistration {
    pub registered: bool,
    pub name: String,
}

pub struct MusicalConductor {
    bus: Arc<EventBus>,
    registry: Arc<SequenceRegistry>,
    orchestrator: Arc<SequenceOrchestrator>,
}

static GLOBAL: Lazy<MusicalConductor> =
    Lazy::new(|| MusicalConductor::new(ConductorConfig::default()));

/// The process-wide conductor instance.
pub fn global() -> &'static MusicalConductor {
    &GLOBAL
}

impl MusicalConductor {
    pub fn new(config: ConductorConfig) -> Self {
        Self::with_bus(EventBus::new(), config)
    }

    /// Construct around an injected bus (shared with other subsystems).
    pub fn with_bus(bus: Arc<EventBus>, config: ConductorConfig) -> Self {
        let validator = Arc::new(SequenceValidator::new(Duration::from_millis(
            config.dedup_window_ms,
        )));
        let registry = Arc::new(SequenceRegistry::new(Arc::clone(&validator)));
        let delegator = Arc::new(ResourceDelegator::with_strict_resources(
            config.strict_resources,
        ));
        let statistics = Arc::new(StatisticsManager::new(config.stats_sample_window));
        let orchestrator = SequenceOrchestrator::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            validator,
            delegator,
            statistics,
        );
        Self {
            bus,
            registry,
            orchestrator,
        }
    }

    /// Request execution of `<domain>.<sequence_name>` at NORMAL priority.
    pub fn play(&self, domain: &str, sequence_name: &str, data: Value) -> SequenceStartResult {
        self.play_with_priority(domain, sequence_name, data, Priority::Normal)
    }

    /// Request execution at an explicit priority. Admission failures are
    /// surfaced in the result; observers see the matching bus event.
    pub fn play_with_priority(
        &self,
        domain: &str,
        sequence_name: &str,
        data: Value,
        priority: Priority,
    ) -> SequenceStartResult {
        let name = if sequence_name.contains('.') {
            sequence_name.to_string()
        } else {
            format!("{}.{}", domain, sequence_name)
        };

        match self.orchestrator.start_sequence(&name, data, priority) {
            Ok(result) => result,
            Err(err) => {
                warn!(sequence = %name, error = %err, "play rejected");
                SequenceStartResult::failed(Uuid::new_v4().to_string(), err.to_string())
            }
        }
    }

    /// Subscribe to bus topics; patterns ending in `*` match by prefix.
    pub fn subscribe<F>(&self, pattern: &str, listener: F) -> Subscription
    where
        F: Fn(&BusEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.bus.subscribe_fn(pattern, listener);
        Subscription::new(Arc::clone(&self.bus), id)
    }

    /// Register a plugin's sequence and handlers, replacing any prior
    /// binding for the same sequence name.
    pub fn register_plugin(&self, plugin: SequencePlugin) -> Result<PluginRegistration> {
        let name = plugin.sequence.name.clone();
        self.registry.register(plugin.sequence, plugin.handlers)?;
        Ok(PluginRegistration {
            registered: true,
            name,
        })
    }

    pub fn unregister_plugin(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        self.orchestrator.statistics()
    }

    pub fn get_queue_snapshot(&self) -> Vec<QueuedRequestInfo> {
        self.orchestrator.queue_snapshot()
    }

    pub fn get_registered_sequences(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn is_executing(&self) -> bool {
        self.orchestrator.is_executing()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}
