//! Task domain model.
//!
//! Tasks are discrete units of work assigned to workers by the swarm core.
//! Estimation heuristics run at creation time so assignment and autoscaling
//! can reason about queue pressure without re-parsing descriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is queued, no worker bound yet
    Pending,
    /// A worker has been selected but execution has not started
    Assigned,
    /// Worker is executing
    InProgress,
    /// Finished successfully
    Completed,
    /// Permanently failed
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            // Pending -> Failed covers exhausted retries of a task that was
            // returned to the queue.
            Self::Pending => &[Self::Assigned, Self::Failed],
            Self::Assigned => &[Self::InProgress, Self::Pending],
            Self::InProgress => &[Self::Completed, Self::Failed, Self::Pending],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Estimated complexity bucket, derived from fixed indicator keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Low,
    Medium,
    High,
}

impl Default for TaskComplexity {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// First matching bucket from the fixed indicator map; `Low` otherwise.
    pub fn classify(description: &str) -> Self {
        const HIGH: &[&str] = &["refactor", "migrate", "redesign", "architecture", "overhaul"];
        const MEDIUM: &[&str] = &["implement", "create", "build", "integrate", "optimize", "design"];
        let lower = description.to_lowercase();
        if HIGH.iter().any(|k| lower.contains(k)) {
            Self::High
        } else if MEDIUM.iter().any(|k| lower.contains(k)) {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Estimation metadata computed at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Complexity bucket
    pub complexity: TaskComplexity,
    /// Keyword-derived duration estimate in milliseconds
    pub estimated_duration_ms: u64,
    /// Opaque caller-provided extras; unknown fields round-trip intact
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            complexity: TaskComplexity::default(),
            estimated_duration_ms: 0,
            extra: serde_json::Map::new(),
        }
    }
}

const BASE_DURATION_MS: u64 = 5_000;
const MAX_DURATION_MS: u64 = 60_000;

/// Keyword-bucket duration estimate: simple verbs +1, medium +2, complex +3,
/// summed and multiplied by 5000 ms, clipped to 60 s. A description with no
/// matching keyword estimates 0 ms.
pub fn estimate_duration_ms(description: &str) -> u64 {
    const SIMPLE: &[&str] = &["list", "show", "display", "get", "read"];
    const MEDIUM: &[&str] = &["create", "update", "modify", "change", "build"];
    const COMPLEX: &[&str] = &["analyze", "optimize", "refactor", "implement", "design"];

    let lower = description.to_lowercase();
    let mut buckets: u64 = 0;
    for word in lower.split(|c: char| !c.is_ascii_alphanumeric()) {
        if SIMPLE.contains(&word) {
            buckets += 1;
        } else if MEDIUM.contains(&word) {
            buckets += 2;
        } else if COMPLEX.contains(&word) {
            buckets += 3;
        }
    }
    (buckets * BASE_DURATION_MS).min(MAX_DURATION_MS)
}

/// A discrete unit of work executed by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Owning swarm
    pub swarm_id: Uuid,
    /// Bound worker, present iff status is assigned/in_progress (or terminal)
    pub assigned_agent_id: Option<Uuid>,
    /// What to do
    pub description: String,
    /// Priority 1 (lowest) to 10 (highest)
    pub priority: u8,
    /// Current status
    pub status: TaskStatus,
    /// Estimation metadata
    pub metadata: TaskMetadata,
    /// Retry counter for recoverable failures
    pub retry_count: u32,
    /// Result payload on success
    pub result: Option<serde_json::Value>,
    /// Error message on failure
    pub error: Option<String>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// Set iff status is completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with estimation metadata derived from the
    /// description.
    pub fn new(swarm_id: Uuid, description: impl Into<String>, priority: u8) -> Self {
        let description = description.into();
        let metadata = TaskMetadata {
            complexity: TaskComplexity::classify(&description),
            estimated_duration_ms: estimate_duration_ms(&description),
            extra: serde_json::Map::new(),
        };
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            assigned_agent_id: None,
            description,
            priority: priority.clamp(1, 10),
            status: TaskStatus::Pending,
            metadata,
            retry_count: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Attach caller metadata (builder method).
    pub fn with_extra(mut self, extra: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata.extra = extra;
        self
    }

    /// Transition to a new status, maintaining the completed_at invariant.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "cannot transition task from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        match new_status {
            TaskStatus::Completed => self.completed_at = Some(Utc::now()),
            TaskStatus::Pending => {
                self.assigned_agent_id = None;
                self.completed_at = None;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation_defaults() {
        let task = Task::new(Uuid::new_v4(), "Implement business logic", 6);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 6);
        assert!(task.assigned_agent_id.is_none());
        assert_eq!(task.metadata.complexity, TaskComplexity::Medium);
    }

    #[test]
    fn test_priority_clamped() {
        let task = Task::new(Uuid::new_v4(), "x", 0);
        assert_eq!(task.priority, 1);
        let task = Task::new(Uuid::new_v4(), "x", 99);
        assert_eq!(task.priority, 10);
    }

    #[test]
    fn test_duration_estimation_buckets() {
        // "list" is a simple keyword: 1 bucket -> 5s
        assert_eq!(estimate_duration_ms("list the files"), 5_000);
        // "create" medium: 2 buckets -> 10s
        assert_eq!(estimate_duration_ms("create a user"), 10_000);
        // "analyze" complex + "create" medium: 5 buckets -> 25s
        assert_eq!(estimate_duration_ms("analyze and create things"), 25_000);
        // no keyword: zero buckets, zero estimate
        assert_eq!(estimate_duration_ms("hello world"), 0);
    }

    #[test]
    fn test_duration_clipped_to_max() {
        let busy = "analyze optimize refactor implement design analyze optimize";
        assert_eq!(estimate_duration_ms(busy), 60_000);
    }

    #[test]
    fn test_complexity_classification() {
        assert_eq!(TaskComplexity::classify("refactor the parser"), TaskComplexity::High);
        assert_eq!(TaskComplexity::classify("implement login"), TaskComplexity::Medium);
        assert_eq!(TaskComplexity::classify("list users"), TaskComplexity::Low);
    }

    #[test]
    fn test_completed_at_invariant() {
        let mut task = Task::new(Uuid::new_v4(), "build", 5);
        assert!(task.completed_at.is_none());
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::InProgress).unwrap();
        assert!(task.completed_at.is_none());
        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_retry_returns_to_pending_and_clears_binding() {
        let mut task = Task::new(Uuid::new_v4(), "build", 5);
        task.assigned_agent_id = Some(Uuid::new_v4());
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::InProgress).unwrap();
        task.transition_to(TaskStatus::Pending).unwrap();
        assert!(task.assigned_agent_id.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut task = Task::new(Uuid::new_v4(), "build", 5);
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::InProgress).unwrap();
        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.transition_to(TaskStatus::Pending).is_err());
        assert!(task.transition_to(TaskStatus::InProgress).is_err());
    }
}
