//! Session domain model.
//!
//! A session binds a swarm to a resumable lifecycle: checkpoints, append-only
//! logs, and tracked child process ids. At most one session per swarm is
//! active or paused at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::swarm::SwarmStatus;

/// Session lifecycle status. Mirrors the paired swarm status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Stopped,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "stopped" => Some(Self::Stopped),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Sessions in these states still own live resources.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }
}

impl From<SessionStatus> for SwarmStatus {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Active => Self::Active,
            SessionStatus::Paused => Self::Paused,
            SessionStatus::Stopped => Self::Stopped,
            SessionStatus::Completed => Self::Completed,
        }
    }
}

/// A resumable run record for one swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: Uuid,
    /// Owning swarm
    pub swarm_id: Uuid,
    /// Denormalized swarm name for listings
    pub swarm_name: String,
    /// Objective snapshot
    pub objective: String,
    /// Current lifecycle status
    pub status: SessionStatus,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// Set iff status is paused
    pub paused_at: Option<DateTime<Utc>>,
    /// Set on the most recent resume
    pub resumed_at: Option<DateTime<Utc>>,
    /// Recomputed from durable task counts on read
    pub completion_percentage: f64,
    /// Latest checkpoint payload (overwritten on each save)
    pub checkpoint_data: Option<serde_json::Value>,
    /// Opaque caller metadata
    pub metadata: serde_json::Value,
    /// PID of the process that created the session
    pub parent_pid: i32,
    /// Tracked child process ids
    pub child_pids: HashSet<i32>,
}

impl Session {
    /// Create an active session owned by the current process.
    pub fn new(
        swarm_id: Uuid,
        swarm_name: impl Into<String>,
        objective: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            swarm_name: swarm_name.into(),
            objective: objective.into(),
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            paused_at: None,
            resumed_at: None,
            completion_percentage: 0.0,
            checkpoint_data: None,
            metadata,
            parent_pid: std::process::id() as i32,
            child_pids: HashSet::new(),
        }
    }

    /// Apply a status change, maintaining the paused_at invariant.
    pub fn apply_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        match status {
            SessionStatus::Paused => self.paused_at = Some(Utc::now()),
            SessionStatus::Active => {
                self.paused_at = None;
            }
            _ => {}
        }
    }
}

/// Append-only snapshot of selected state, keyed by session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier
    pub id: Uuid,
    /// Owning session
    pub session_id: Uuid,
    /// Checkpoint name (e.g. `auto-save-1712345678901`)
    pub name: String,
    /// Opaque snapshot payload
    pub data: serde_json::Value,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(session_id: Uuid, name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            name: name.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// Severity of a session log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Append-only audit row for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    /// Unique identifier
    pub id: Uuid,
    /// Owning session
    pub session_id: Uuid,
    /// When logged
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
    /// Agent the row concerns, if any
    pub agent_id: Option<Uuid>,
    /// Structured payload, if any
    pub data: Option<serde_json::Value>,
}

impl SessionLog {
    pub fn new(session_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            agent_id: None,
            data: None,
        }
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
