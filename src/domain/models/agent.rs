//! Agent domain model.
//!
//! Every swarm has exactly one queen and any number of typed workers.
//! Worker performance feeds the assignment scoring in the swarm core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Specialization of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    Coordinator,
    Researcher,
    Coder,
    Analyst,
    Tester,
    Architect,
    Reviewer,
    Optimizer,
    Documenter,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Researcher => "researcher",
            Self::Coder => "coder",
            Self::Analyst => "analyst",
            Self::Tester => "tester",
            Self::Architect => "architect",
            Self::Reviewer => "reviewer",
            Self::Optimizer => "optimizer",
            Self::Documenter => "documenter",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coordinator" => Some(Self::Coordinator),
            "researcher" => Some(Self::Researcher),
            "coder" => Some(Self::Coder),
            "analyst" => Some(Self::Analyst),
            "tester" => Some(Self::Tester),
            "architect" => Some(Self::Architect),
            "reviewer" => Some(Self::Reviewer),
            "optimizer" => Some(Self::Optimizer),
            "documenter" => Some(Self::Documenter),
            _ => None,
        }
    }

    /// All worker types eligible for task assignment.
    pub fn all() -> &'static [WorkerType] {
        &[
            Self::Coordinator,
            Self::Researcher,
            Self::Coder,
            Self::Analyst,
            Self::Tester,
            Self::Architect,
            Self::Reviewer,
            Self::Optimizer,
            Self::Documenter,
        ]
    }

    /// Keywords a task description is matched against when scoring this type.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Coordinator => &["coordinate", "plan", "organize", "manage"],
            Self::Researcher => &["research", "investigate", "explore", "find", "study"],
            Self::Coder => &["implement", "code", "build", "develop", "fix", "logic"],
            Self::Analyst => &["analyze", "data", "metrics", "report", "measure"],
            Self::Tester => &["test", "tests", "verify", "validate", "check", "qa"],
            Self::Architect => &["design", "architecture", "structure", "schema", "endpoints"],
            Self::Reviewer => &["review", "audit", "inspect", "assess"],
            Self::Optimizer => &["optimize", "performance", "improve", "refactor", "tune"],
            Self::Documenter => &["document", "write", "describe", "explain", "readme"],
        }
    }

    /// Fixed multiplier applied to the assignment score.
    pub fn type_weight(&self) -> f64 {
        match self {
            Self::Researcher => 1.2,
            Self::Analyst => 1.1,
            Self::Architect => 1.3,
            Self::Optimizer => 1.4,
            Self::Documenter => 0.9,
            Self::Coordinator | Self::Coder | Self::Tester | Self::Reviewer => 1.0,
        }
    }

    /// Default capability set recorded on spawn.
    pub fn default_capabilities(&self) -> HashSet<String> {
        self.keywords().iter().map(|k| (*k).to_string()).collect()
    }
}

/// Role within a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Queen,
    Worker,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queen => "queen",
            Self::Worker => "worker",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queen" => Some(Self::Queen),
            "worker" => Some(Self::Worker),
            _ => None,
        }
    }
}

/// Live status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Busy,
    Offline,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "active" => Some(Self::Active),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Rolling execution statistics for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    /// Moving average of task duration in milliseconds
    pub avg_task_time_ms: f64,
    /// Success rate in [0, 1]
    pub success_rate: f64,
}

impl Default for AgentPerformance {
    fn default() -> Self {
        Self {
            avg_task_time_ms: 0.0,
            success_rate: 1.0,
        }
    }
}

impl AgentPerformance {
    /// Fold a completed task duration into the moving average:
    /// `new_avg = (old_avg * (n - 1) + duration) / n` with `n` the new
    /// completion count.
    pub fn record_completion(&mut self, duration_ms: f64, completed_count: u64) {
        let n = completed_count.max(1) as f64;
        self.avg_task_time_ms = (self.avg_task_time_ms * (n - 1.0) + duration_ms) / n;
    }

    /// Fold an outcome into the weighted success rate. Successes pull the
    /// rate towards 1, failures towards 0, each with weight 1/n.
    pub fn record_outcome(&mut self, succeeded: bool, total_attempts: u64) {
        let n = total_attempts.max(1) as f64;
        let outcome = if succeeded { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + outcome) / n;
    }
}

/// An agent bound to a swarm for the swarm's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: Uuid,
    /// Owning swarm
    pub swarm_id: Uuid,
    /// Human-readable name
    pub name: String,
    /// Specialization
    pub worker_type: WorkerType,
    /// Queen or worker
    pub role: AgentRole,
    /// Live status
    pub status: AgentStatus,
    /// Capability tags
    pub capabilities: HashSet<String>,
    /// Rolling execution statistics
    pub performance: AgentPerformance,
    /// Lifetime completed-task counter
    pub tasks_completed: u64,
    /// Lifetime attempt counter (completions + failures)
    pub tasks_attempted: u64,
    /// Currently bound task, if busy
    pub current_task_id: Option<Uuid>,
    /// When spawned
    pub spawned_at: DateTime<Utc>,
}

impl Agent {
    /// Spawn a worker of the given type into a swarm.
    pub fn worker(swarm_id: Uuid, worker_type: WorkerType, index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            name: format!("{}-{}", worker_type.as_str(), index),
            worker_type,
            role: AgentRole::Worker,
            status: AgentStatus::Idle,
            capabilities: worker_type.default_capabilities(),
            performance: AgentPerformance::default(),
            tasks_completed: 0,
            tasks_attempted: 0,
            current_task_id: None,
            spawned_at: Utc::now(),
        }
    }

    /// Spawn the queen for a swarm.
    pub fn queen(swarm_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            name: "queen".to_string(),
            worker_type: WorkerType::Coordinator,
            role: AgentRole::Queen,
            status: AgentStatus::Active,
            capabilities: WorkerType::Coordinator.default_capabilities(),
            performance: AgentPerformance::default(),
            tasks_completed: 0,
            tasks_attempted: 0,
            current_task_id: None,
            spawned_at: Utc::now(),
        }
    }

    /// Whether this agent can accept a new task.
    pub fn is_available(&self) -> bool {
        self.role == AgentRole::Worker && self.status == AgentStatus::Idle
    }
}
