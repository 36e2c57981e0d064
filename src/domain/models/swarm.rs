//! Swarm domain model.
//!
//! A swarm is a group of agents (one queen plus workers) bound to a single
//! objective. Swarm status mirrors the owning session's lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queen coordination policy for a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueenType {
    /// Long-horizon planning; prefers scalable/maintainable options.
    Strategic,
    /// Short-horizon execution; follows worker majorities, prefers quick wins.
    Tactical,
    /// Learns from past decisions on related topics.
    Adaptive,
}

impl Default for QueenType {
    fn default() -> Self {
        Self::Strategic
    }
}

impl QueenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategic => "strategic",
            Self::Tactical => "tactical",
            Self::Adaptive => "adaptive",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strategic" => Some(Self::Strategic),
            "tactical" => Some(Self::Tactical),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }

    /// Weight of the queen's vote when tallying decisions.
    pub fn decision_weight(&self) -> f64 {
        match self {
            Self::Strategic => 3.0,
            Self::Tactical => 2.0,
            Self::Adaptive => 2.5,
        }
    }

    /// Consensus threshold used by consensus-driven execution phases.
    pub fn consensus_threshold(&self) -> f64 {
        match self {
            Self::Strategic => 0.6,
            Self::Tactical => 0.5,
            Self::Adaptive => 0.55,
        }
    }
}

/// Communication topology of the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Mesh,
    Hierarchical,
    Ring,
    Star,
}

impl Default for Topology {
    fn default() -> Self {
        Self::Hierarchical
    }
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Hierarchical => "hierarchical",
            Self::Ring => "ring",
            Self::Star => "star",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mesh" => Some(Self::Mesh),
            "hierarchical" => Some(Self::Hierarchical),
            "ring" => Some(Self::Ring),
            "star" => Some(Self::Star),
            _ => None,
        }
    }
}

/// Lifecycle status shared by swarms and sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Active,
    Paused,
    Stopped,
    Completed,
}

impl Default for SwarmStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl SwarmStatus {
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

    /// Whether the swarm can still make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A group of agents working on one objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swarm {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable name
    pub name: String,
    /// The objective this swarm pursues
    pub objective: String,
    /// Queen coordination policy
    pub queen_type: QueenType,
    /// Current lifecycle status
    pub status: SwarmStatus,
    /// Communication topology
    pub topology: Topology,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Swarm {
    /// Create a new active swarm. Name is auto-derived from the objective.
    pub fn new(objective: impl Into<String>, queen_type: QueenType) -> Self {
        let objective = objective.into();
        let name = derive_name(&objective);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            objective,
            queen_type,
            status: SwarmStatus::Active,
            topology: Topology::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set topology (builder method).
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }
}

/// Derive a short swarm name from the objective string.
fn derive_name(objective: &str) -> String {
    let words: Vec<&str> = objective.split_whitespace().take(4).collect();
    if words.is_empty() {
        return "hive".to_string();
    }
    let mut name = words.join("-").to_lowercase();
    name.retain(|c| c.is_ascii_alphanumeric() || c == '-');
    format!("hive-{}", name)
}
