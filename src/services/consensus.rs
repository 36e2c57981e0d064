//! Consensus engine: bounded vote collection under majority, weighted, or
//! Byzantine-style quorum rules.
//!
//! A round broadcasts a propose envelope, installs a per-validator vote slot
//! with an individual timeout, tallies whatever arrived, and broadcasts the
//! result. A validator that never votes is recorded as a null vote; null
//! votes can never win. The round always settles within the configured
//! timeout plus scheduling overhead.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::domain::models::{
    ConsensusAlgo, ConsensusConfig, Decision, MemoryType, MessageType,
};
use crate::domain::ports::Store;

use super::collective_memory::CollectiveMemory;
use super::events::{EventBus, HiveEvent};
use super::message_bus::MessageBus;

/// Byzantine agreement needs two thirds of all validators.
const BYZANTINE_QUORUM: f64 = 0.67;
/// Extra weight granted to the queen's vote on the weighted path.
const QUEEN_VOTE_BONUS: f64 = 2.0;

/// Result of one consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub proposal: String,
    pub validators: Vec<String>,
    /// validator -> vote; `None` records a timeout
    pub votes: HashMap<String, Option<String>>,
    pub vote_count: usize,
    pub winner: Option<String>,
    pub consensus_reached: bool,
    pub confidence: f64,
    pub quorum: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Vote collector and tallier for a swarm.
pub struct ConsensusEngine {
    bus: Arc<MessageBus>,
    store: Arc<dyn Store>,
    memory: Arc<CollectiveMemory>,
    events: Arc<EventBus>,
    config: ConsensusConfig,
    pending: Mutex<HashMap<(Uuid, String), oneshot::Sender<String>>>,
}

impl ConsensusEngine {
    pub fn new(
        bus: Arc<MessageBus>,
        store: Arc<dyn Store>,
        memory: Arc<CollectiveMemory>,
        events: Arc<EventBus>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            bus,
            store,
            memory,
            events,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver one validator's vote into an open round. Votes for unknown or
    /// already-settled rounds are ignored; only the first vote per validator
    /// counts.
    pub async fn submit_vote(&self, consensus_id: Uuid, validator: &str, vote: &str) {
        let sender = self
            .pending
            .lock()
            .await
            .remove(&(consensus_id, validator.to_string()));
        match sender {
            Some(tx) => {
                let _ = tx.send(vote.to_string());
            }
            None => {
                tracing::debug!(%consensus_id, validator, "vote for unknown or settled slot ignored");
            }
        }
    }

    /// Run one consensus round. When `validators` is omitted, every online
    /// agent on the bus votes. `queen_id` marks the validator whose vote the
    /// weighted algorithm boosts.
    pub async fn consensus(
        &self,
        swarm_id: Uuid,
        proposal: &str,
        options: &[String],
        validators: Option<Vec<String>>,
        queen_id: Option<&str>,
    ) -> anyhow::Result<ConsensusOutcome> {
        let validators = match validators {
            Some(validators) => validators,
            None => self.bus.online_agents().await,
        };

        let mut decision = Decision::new(
            swarm_id,
            proposal,
            options.to_vec(),
            self.config.algorithm,
        );
        let consensus_id = decision.id;

        // Install the per-validator slots before the round becomes visible
        // (decision row, propose broadcast) so an instant vote cannot race
        // the registration.
        let mut slots = Vec::with_capacity(validators.len());
        {
            let mut pending = self.pending.lock().await;
            for validator in &validators {
                let (tx, rx) = oneshot::channel();
                pending.insert((consensus_id, validator.clone()), tx);
                slots.push((validator.clone(), rx));
            }
        }

        if let Err(e) = self.store.insert_decision(&decision).await {
            let mut pending = self.pending.lock().await;
            pending.retain(|(id, _), _| *id != consensus_id);
            return Err(e.into());
        }

        self.bus
            .broadcast(
                "consensus",
                MessageType::Consensus,
                json!({
                    "phase": "propose",
                    "consensus_id": consensus_id,
                    "proposal": proposal,
                    "options": options,
                }),
            )
            .await
            .ok();

        // Each validator gets the full timeout; the waits run concurrently,
        // so the round settles within one timeout overall.
        let timeout = std::time::Duration::from_millis(self.config.timeout_ms);
        let collected = join_all(slots.into_iter().map(|(validator, rx)| async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(vote)) => (validator, Some(vote)),
                _ => (validator, None),
            }
        }))
        .await;

        // Drop any slots that never resolved.
        {
            let mut pending = self.pending.lock().await;
            pending.retain(|(id, _), _| *id != consensus_id);
        }

        let votes: HashMap<String, Option<String>> = collected.into_iter().collect();
        for (validator, vote) in &votes {
            if vote.is_none() {
                tracing::warn!(%consensus_id, validator, "consensus.timeout: null vote recorded");
            }
        }

        let outcome = self.tally(proposal, &validators, votes, queen_id);

        decision.votes = outcome
            .votes
            .iter()
            .filter_map(|(v, opt)| opt.clone().map(|o| (v.clone(), o)))
            .collect();
        decision.complete(outcome.winner.clone(), outcome.confidence);
        self.store.update_decision(&decision).await?;

        self.memory
            .store(
                &swarm_id.to_string(),
                &format!("consensus_{consensus_id}"),
                &serde_json::to_value(&outcome)?,
                MemoryType::Consensus,
                "consensus",
            )
            .await?;

        self.bus
            .broadcast(
                "consensus",
                MessageType::Consensus,
                json!({
                    "phase": "result",
                    "consensus_id": consensus_id,
                    "winner": outcome.winner,
                    "consensus_reached": outcome.consensus_reached,
                }),
            )
            .await
            .ok();

        self.events.publish(HiveEvent::DecisionReached {
            decision_id: consensus_id,
            topic: proposal.to_string(),
            result: outcome.winner.clone(),
            confidence: outcome.confidence,
        });
        if outcome.consensus_reached {
            if let Some(winner) = &outcome.winner {
                self.events.publish(HiveEvent::ConsensusReached {
                    decision_id: consensus_id,
                    winner: winner.clone(),
                });
            }
        }

        Ok(outcome)
    }

    /// Tally non-null votes under the configured algorithm.
    fn tally(
        &self,
        proposal: &str,
        validators: &[String],
        votes: HashMap<String, Option<String>>,
        queen_id: Option<&str>,
    ) -> ConsensusOutcome {
        let vote_count = votes.values().filter(|v| v.is_some()).count();
        let total_validators = validators.len().max(1) as f64;

        let mut weights: HashMap<&str, f64> = HashMap::new();
        for (validator, vote) in &votes {
            let Some(option) = vote else { continue };
            let weight = match (self.config.algorithm, queen_id) {
                (ConsensusAlgo::Weighted, Some(queen)) if validator == queen => {
                    1.0 + QUEEN_VOTE_BONUS
                }
                _ => 1.0,
            };
            *weights.entry(option.as_str()).or_insert(0.0) += weight;
        }

        let leader = weights
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(option, weight)| ((*option).to_string(), *weight));

        let (winner, consensus_reached, confidence) = match self.config.algorithm {
            ConsensusAlgo::Majority => match leader {
                Some((option, weight)) => {
                    let share = weight / total_validators;
                    (Some(option), share >= self.config.quorum, share)
                }
                None => (None, false, 0.0),
            },
            ConsensusAlgo::Weighted => match leader {
                Some((option, weight)) => {
                    let share = weight / (total_validators + QUEEN_VOTE_BONUS);
                    (Some(option), share >= self.config.quorum, share)
                }
                None => (None, false, 0.0),
            },
            ConsensusAlgo::Byzantine => match leader {
                Some((option, weight)) => {
                    let share = weight / total_validators;
                    if share >= BYZANTINE_QUORUM {
                        (Some(option), true, share)
                    } else {
                        tracing::warn!(
                            proposal,
                            share,
                            "consensus.quorum_failed: no_consensus"
                        );
                        (None, false, 0.0)
                    }
                }
                None => (None, false, 0.0),
            },
        };

        ConsensusOutcome {
            proposal: proposal.to_string(),
            validators: validators.to_vec(),
            votes,
            vote_count,
            winner,
            consensus_reached,
            confidence,
            quorum: match self.config.algorithm {
                ConsensusAlgo::Byzantine => BYZANTINE_QUORUM,
                _ => self.config.quorum,
            },
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MemoryConfig, MessagingConfig, QueenType, Swarm};
    use crate::infrastructure::database::InMemoryStore;

    struct Fixture {
        engine: Arc<ConsensusEngine>,
        store: Arc<dyn Store>,
        swarm_id: Uuid,
    }

    async fn fixture(algorithm: ConsensusAlgo, quorum: f64, timeout_ms: u64) -> Fixture {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let events = Arc::new(EventBus::default());
        let memory = Arc::new(CollectiveMemory::new(
            Arc::clone(&store),
            MemoryConfig::default(),
            Arc::clone(&events),
        ));
        let bus = Arc::new(MessageBus::new(
            MessagingConfig::default(),
            Arc::clone(&events),
        ));
        let swarm = Swarm::new("decide things", QueenType::Strategic);
        store.create_swarm(&swarm).await.unwrap();

        let engine = Arc::new(ConsensusEngine::new(
            bus,
            Arc::clone(&store),
            memory,
            events,
            ConsensusConfig {
                algorithm,
                quorum,
                timeout_ms,
            },
        ));
        Fixture {
            engine,
            store,
            swarm_id: swarm.id,
        }
    }

    fn spawn_votes(engine: &Arc<ConsensusEngine>, votes: Vec<(&str, &str)>) {
        let engine = Arc::clone(engine);
        let votes: Vec<(String, String)> = votes
            .into_iter()
            .map(|(v, o)| (v.to_string(), o.to_string()))
            .collect();
        tokio::spawn(async move {
            // Let the round install its slots first.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let pending = engine.pending.lock().await;
            let open: Vec<Uuid> = pending.keys().map(|(id, _)| *id).collect();
            drop(pending);
            for consensus_id in open {
                for (validator, option) in &votes {
                    engine.submit_vote(consensus_id, validator, option).await;
                }
                break;
            }
        });
    }

    #[tokio::test]
    async fn test_majority_below_default_quorum() {
        let fx = fixture(ConsensusAlgo::Majority, 0.67, 1_000).await;
        let validators: Vec<String> = (1..=5).map(|i| format!("w{i}")).collect();

        spawn_votes(
            &fx.engine,
            vec![
                ("w1", "microservices"),
                ("w2", "microservices"),
                ("w3", "modular"),
                ("w4", "microservices"),
                ("w5", "monolith"),
            ],
        );

        let outcome = fx
            .engine
            .consensus(
                fx.swarm_id,
                "Architecture pattern",
                &["monolith".into(), "microservices".into(), "modular".into()],
                Some(validators),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.winner.as_deref(), Some("microservices"));
        assert_eq!(outcome.vote_count, 5);
        assert!((outcome.confidence - 0.6).abs() < 1e-9);
        // 0.6 < default 0.67 quorum
        assert!(!outcome.consensus_reached);
    }

    #[tokio::test]
    async fn test_majority_meets_lower_quorum() {
        let fx = fixture(ConsensusAlgo::Majority, 0.5, 1_000).await;
        let validators: Vec<String> = (1..=5).map(|i| format!("w{i}")).collect();

        spawn_votes(
            &fx.engine,
            vec![
                ("w1", "microservices"),
                ("w2", "microservices"),
                ("w3", "modular"),
                ("w4", "microservices"),
                ("w5", "monolith"),
            ],
        );

        let outcome = fx
            .engine
            .consensus(
                fx.swarm_id,
                "Architecture pattern",
                &["monolith".into(), "microservices".into(), "modular".into()],
                Some(validators),
                None,
            )
            .await
            .unwrap();

        assert!(outcome.consensus_reached);
        assert!((outcome.confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_byzantine_no_consensus_with_timeout() {
        let fx = fixture(ConsensusAlgo::Byzantine, 0.67, 200).await;
        let validators: Vec<String> = (1..=4).map(|i| format!("v{i}")).collect();

        // v4 never votes and times out.
        spawn_votes(&fx.engine, vec![("v1", "A"), ("v2", "B"), ("v3", "C")]);

        let started = std::time::Instant::now();
        let outcome = fx
            .engine
            .consensus(
                fx.swarm_id,
                "Split vote",
                &["A".into(), "B".into(), "C".into()],
                Some(validators),
                None,
            )
            .await
            .unwrap();

        assert!(outcome.winner.is_none());
        assert!(!outcome.consensus_reached);
        assert!((outcome.confidence - 0.0).abs() < f64::EPSILON);
        assert_eq!(outcome.vote_count, 3);
        assert_eq!(outcome.votes["v4"], None);
        // Terminates within timeout plus overhead, not timeout per validator.
        assert!(started.elapsed() < std::time::Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_byzantine_reaches_two_thirds() {
        let fx = fixture(ConsensusAlgo::Byzantine, 0.67, 1_000).await;
        let validators: Vec<String> = (1..=3).map(|i| format!("v{i}")).collect();

        spawn_votes(&fx.engine, vec![("v1", "A"), ("v2", "A"), ("v3", "B")]);

        let outcome = fx
            .engine
            .consensus(
                fx.swarm_id,
                "Two thirds",
                &["A".into(), "B".into()],
                Some(validators),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.winner.as_deref(), Some("A"));
        assert!(outcome.consensus_reached);
    }

    #[tokio::test]
    async fn test_weighted_queen_vote_tips_and_normalizes() {
        let fx = fixture(ConsensusAlgo::Weighted, 0.5, 1_000).await;
        let validators = vec!["queen".to_string(), "w1".to_string(), "w2".to_string()];

        spawn_votes(
            &fx.engine,
            vec![("queen", "alpha"), ("w1", "beta"), ("w2", "beta")],
        );

        let outcome = fx
            .engine
            .consensus(
                fx.swarm_id,
                "Weighted",
                &["alpha".into(), "beta".into()],
                Some(validators),
                Some("queen"),
            )
            .await
            .unwrap();

        // Queen's 3 beats the workers' 2; denominator is validators + 2.
        assert_eq!(outcome.winner.as_deref(), Some("alpha"));
        assert!((outcome.confidence - 3.0 / 5.0).abs() < 1e-9);
        assert!(outcome.consensus_reached);
    }

    #[tokio::test]
    async fn test_all_timeouts_yield_no_winner() {
        let fx = fixture(ConsensusAlgo::Majority, 0.5, 100).await;
        let validators = vec!["v1".to_string(), "v2".to_string()];

        let outcome = fx
            .engine
            .consensus(
                fx.swarm_id,
                "Silence",
                &["A".into()],
                Some(validators),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.vote_count, 0);
        assert!(outcome.winner.is_none());
        assert!(!outcome.consensus_reached);
    }

    #[tokio::test]
    async fn test_decision_row_persisted_and_completed() {
        let fx = fixture(ConsensusAlgo::Majority, 0.5, 500).await;
        let validators = vec!["v1".to_string(), "v2".to_string()];

        spawn_votes(&fx.engine, vec![("v1", "A"), ("v2", "A")]);
        let outcome = fx
            .engine
            .consensus(fx.swarm_id, "Persist me", &["A".into()], Some(validators), None)
            .await
            .unwrap();
        assert!(outcome.consensus_reached);

        let decisions = fx.store.list_decisions(fx.swarm_id).await.unwrap();
        assert_eq!(decisions.len(), 1);
        let decision = &decisions[0];
        assert_eq!(decision.status, crate::domain::models::DecisionStatus::Completed);
        assert_eq!(decision.result.as_deref(), Some("A"));
        assert_eq!(decision.votes.len(), 2);
        assert!(decision.confidence >= 0.5);
    }

    #[tokio::test]
    async fn test_late_vote_is_ignored() {
        let fx = fixture(ConsensusAlgo::Majority, 0.5, 100).await;
        let validators = vec!["v1".to_string()];

        let outcome = fx
            .engine
            .consensus(fx.swarm_id, "Late", &["A".into()], Some(validators), None)
            .await
            .unwrap();
        assert_eq!(outcome.vote_count, 0);

        // The round settled; a late vote must be a no-op.
        fx.engine.submit_vote(Uuid::new_v4(), "v1", "A").await;
        assert!(fx.engine.pending.lock().await.is_empty());
    }
}
