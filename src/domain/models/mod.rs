//! Domain models for the hive-mind coordinator.

pub mod agent;
pub mod config;
pub mod decision;
pub mod memory;
pub mod message;
pub mod session;
pub mod swarm;
pub mod task;

pub use agent::{Agent, AgentPerformance, AgentRole, AgentStatus, WorkerType};
pub use config::{
    AutosaveConfig, ConsensusConfig, DatabaseConfig, HiveConfig, LoggingConfig, MemoryConfig,
    MessagingConfig,
};
pub use decision::{ConsensusAlgo, Decision, DecisionStatus};
pub use memory::{MemoryEntry, MemorySearchHit, MemoryType};
pub use message::{GossipState, MessageEnvelope, MessageType, Protocol, BROADCAST_ADDR};
pub use session::{Checkpoint, LogLevel, Session, SessionLog, SessionStatus};
pub use swarm::{QueenType, Swarm, SwarmStatus, Topology};
pub use task::{Task, TaskComplexity, TaskMetadata, TaskStatus};
