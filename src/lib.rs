// MusicalConductor - in-process orchestration runtime
//
// Turns high-level workflow intents into strictly serialized,
// resource-aware executions of declarative sequences. Sequences are ordered
// movements of beats; each beat binds a logical event to a handler with a
// timing discipline and an error policy. The process-wide event bus is the
// only side-channel to the outside world.

pub mod bus;
pub mod conductor;
pub mod dedup;
pub mod delegator;
pub mod error;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod statistics;
pub mod utilities;
pub mod validator;

pub use bus::{topics, BusEvent, EventBus, Subscription, SubscriptionId};
pub use conductor::{global, ConductorConfig, MusicalConductor, PluginRegistration, SequencePlugin};
pub use delegator::{ConflictCheck, ConflictResolution, ResourceDelegator};
pub use error::{ConductorError, Result};
pub use executor::{ExecutionOutcome, ExecutionStatus, SequenceExecutor};
pub use model::{
    Beat, BeatHandler, Dynamics, ErrorStrategy, ExecutionType, HandlerContext, HandlerTable,
    Movement, Priority, Sequence, SequenceCategory, SequenceRequest, SequenceStartResult, Timing,
};
pub use orchestrator::SequenceOrchestrator;
pub use queue::{ExecutionQueue, QueuedRequestInfo};
pub use registry::SequenceRegistry;
pub use statistics::{Counters, DistributionSnapshot, StatisticsManager, StatisticsSnapshot};
pub use validator::{DeduplicationCheck, SequenceValidator};
