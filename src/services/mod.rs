//! Service layer: the hive subsystems.

pub mod autosave;
pub mod collective_memory;
pub mod consensus;
pub mod coordinator;
pub mod events;
pub mod message_bus;
pub mod queen;
pub mod session_manager;
pub mod swarm;
pub mod tool_memory;

pub use autosave::{AutoSaveMiddleware, FlushSummary, PendingChange};
pub use collective_memory::{CollectiveMemory, MemoryMetrics, SearchOptions, StoredMemory};
pub use consensus::{ConsensusEngine, ConsensusOutcome};
pub use coordinator::{
    Coordinator, SpawnOptions, SpawnOutcome, SwarmMetricsReport, SwarmStatusReport,
};
pub use events::{EventBus, HiveEvent, SequencedEvent};
pub use message_bus::{BusHandle, MessageBus};
pub use queen::{
    DecisionOutcome, ExecutionPlan, ObjectiveAnalysis, Phase, QueenCoordinator, Strategy,
};
pub use session_manager::{SessionManager, SessionProcessInfo};
pub use swarm::{SwarmCore, SwarmCoreConfig, SwarmMetrics};
pub use tool_memory::ToolMemoryStore;
