//! Decision domain model.
//!
//! A decision records one consensus round: the topic, the candidate options,
//! every collected vote, and the tallied outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Vote-tallying algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusAlgo {
    /// Plain argmax; reached when the winner's share meets the quorum.
    Majority,
    /// The queen's vote carries +2 weight before the argmax.
    Weighted,
    /// Byzantine-style: winner must take at least two thirds of validators.
    Byzantine,
}

impl Default for ConsensusAlgo {
    fn default() -> Self {
        Self::Majority
    }
}

impl ConsensusAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Majority => "majority",
            Self::Weighted => "weighted",
            Self::Byzantine => "byzantine",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "majority" => Some(Self::Majority),
            "weighted" => Some(Self::Weighted),
            "byzantine" => Some(Self::Byzantine),
            _ => None,
        }
    }

    /// Default quorum fraction for this algorithm.
    pub fn default_quorum(&self) -> f64 {
        match self {
            Self::Majority | Self::Byzantine => 0.67,
            Self::Weighted => 0.5,
        }
    }
}

/// Lifecycle of a decision row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Voting,
    Completed,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voting => "voting",
            Self::Completed => "completed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "voting" => Some(Self::Voting),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// One consensus round and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Unique identifier
    pub id: Uuid,
    /// Owning swarm
    pub swarm_id: Uuid,
    /// What is being decided
    pub topic: String,
    /// Candidate options
    pub options: Vec<String>,
    /// voter id -> chosen option
    pub votes: HashMap<String, String>,
    /// Tallying algorithm
    pub algorithm: ConsensusAlgo,
    /// Winner's share of the vote, in [0, 1]
    pub confidence: f64,
    /// Winning option, `None` while voting or when no consensus was reached
    pub result: Option<String>,
    /// Lifecycle status
    pub status: DecisionStatus,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl Decision {
    /// Open a new decision for voting.
    pub fn new(
        swarm_id: Uuid,
        topic: impl Into<String>,
        options: Vec<String>,
        algorithm: ConsensusAlgo,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            topic: topic.into(),
            options,
            votes: HashMap::new(),
            algorithm,
            confidence: 0.0,
            result: None,
            status: DecisionStatus::Voting,
            created_at: Utc::now(),
        }
    }

    /// Record one voter's choice; later votes from the same voter overwrite.
    pub fn record_vote(&mut self, voter_id: impl Into<String>, option: impl Into<String>) {
        self.votes.insert(voter_id.into(), option.into());
    }

    /// Close the decision with a tallied outcome.
    pub fn complete(&mut self, result: Option<String>, confidence: f64) {
        self.result = result;
        self.confidence = confidence.clamp(0.0, 1.0);
        self.status = DecisionStatus::Completed;
    }
}
