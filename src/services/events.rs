//! Typed event bus for the hive.
//!
//! Components announce state changes as `HiveEvent`s on a broadcast channel
//! with monotonically increasing sequence numbers. Subscribers have explicit
//! lifetimes: dropping the receiver unsubscribes. The auto-save middleware
//! is the primary consumer, converting events into checkpoint changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Monotonically increasing sequence number assigned on publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State-change events announced by the hive components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HiveEvent {
    TaskCreated {
        task_id: Uuid,
        swarm_id: Uuid,
        priority: u8,
    },
    TaskAssigned {
        task_id: Uuid,
        agent_id: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
        agent_id: Uuid,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Uuid,
        error: String,
        retry_count: u32,
        will_retry: bool,
    },
    WorkerSpawned {
        agent_id: Uuid,
        swarm_id: Uuid,
        worker_type: String,
    },
    WorkerIdle {
        agent_id: Uuid,
    },
    WorkerOffline {
        agent_id: String,
    },
    DecisionReached {
        decision_id: Uuid,
        topic: String,
        result: Option<String>,
        confidence: f64,
    },
    ConsensusReached {
        decision_id: Uuid,
        winner: String,
    },
    MemoryStored {
        namespace: String,
        key: String,
    },
    MemoryEvicted {
        namespace: String,
        key: String,
    },
    SessionPaused {
        session_id: Uuid,
    },
    SessionResumed {
        session_id: Uuid,
    },
    SessionStopped {
        session_id: Uuid,
    },
    MessageDropped {
        envelope_id: Uuid,
    },
}

impl HiveEvent {
    /// Discriminant name, used for change grouping in checkpoints.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::WorkerSpawned { .. } => "agent_spawned",
            Self::WorkerIdle { .. } => "worker_idle",
            Self::WorkerOffline { .. } => "worker_offline",
            Self::DecisionReached { .. } => "decision_reached",
            Self::ConsensusReached { .. } => "consensus_reached",
            Self::MemoryStored { .. } => "memory_stored",
            Self::MemoryEvicted { .. } => "memory_evicted",
            Self::SessionPaused { .. } => "session_paused",
            Self::SessionResumed { .. } => "session_resumed",
            Self::SessionStopped { .. } => "session_stopped",
            Self::MessageDropped { .. } => "message_dropped",
        }
    }
}

/// A published event with its assigned sequence and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub event: HiveEvent,
}

/// Broadcast-based event distribution with sequence numbering.
pub struct EventBus {
    sender: broadcast::Sender<SequencedEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    /// Create a bus with the given channel capacity. Slow subscribers that
    /// fall more than `capacity` events behind observe a lag error, not a
    /// blocked publisher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event, assigning the next sequence number.
    pub fn publish(&self, event: HiveEvent) -> SequenceNumber {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        let sequenced = SequencedEvent {
            sequence,
            timestamp: Utc::now(),
            event,
        };
        // No subscribers is fine; the event is simply unobserved.
        let _ = self.sender.send(sequenced);
        sequence
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SequencedEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Next sequence number to be assigned.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
