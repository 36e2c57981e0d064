//! In-process fallback implementation of the `Store` port.
//!
//! Used when the embedded database cannot be opened. Semantics match the
//! SQLite store, including paired session/swarm transitions and memory
//! ordering rules, but nothing survives the process.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    Agent, AgentRole, AgentStatus, Checkpoint, Decision, MemoryEntry, MemoryType, Session,
    SessionLog, SessionStatus, Swarm, SwarmStatus, Task, TaskStatus,
};
use crate::domain::ports::{Store, StoreResult};

#[derive(Default)]
struct Tables {
    swarms: HashMap<Uuid, Swarm>,
    agents: HashMap<Uuid, Agent>,
    tasks: HashMap<Uuid, Task>,
    sessions: HashMap<Uuid, Session>,
    checkpoints: Vec<Checkpoint>,
    logs: Vec<SessionLog>,
    memory: HashMap<(String, String), MemoryEntry>,
    decisions: HashMap<Uuid, Decision>,
}

/// Volatile store with the same contract as the SQLite store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Op("store is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_swarm(&self, swarm: &Swarm) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        if tables.swarms.contains_key(&swarm.id) {
            return Err(StoreError::Op(format!("swarm {} already exists", swarm.id)));
        }
        tables.swarms.insert(swarm.id, swarm.clone());
        Ok(())
    }

    async fn get_swarm(&self, id: Uuid) -> StoreResult<Option<Swarm>> {
        self.check_open()?;
        Ok(self.tables.read().await.swarms.get(&id).cloned())
    }

    async fn update_swarm_status(&self, id: Uuid, status: SwarmStatus) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let swarm = tables
            .swarms
            .get_mut(&id)
            .ok_or_else(|| StoreError::RowNotFound(format!("swarm {id}")))?;
        swarm.status = status;
        swarm.updated_at = Utc::now();
        Ok(())
    }

    async fn list_swarms(&self) -> StoreResult<Vec<Swarm>> {
        self.check_open()?;
        let mut swarms: Vec<Swarm> = self.tables.read().await.swarms.values().cloned().collect();
        swarms.sort_by_key(|s| s.created_at);
        Ok(swarms)
    }

    async fn create_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        if tables.agents.contains_key(&agent.id) {
            return Err(StoreError::Op(format!("agent {} already exists", agent.id)));
        }
        tables.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        self.check_open()?;
        Ok(self.tables.read().await.agents.get(&id).cloned())
    }

    async fn update_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let slot = tables
            .agents
            .get_mut(&agent.id)
            .ok_or_else(|| StoreError::RowNotFound(format!("agent {}", agent.id)))?;
        *slot = agent.clone();
        Ok(())
    }

    async fn list_agents(&self, swarm_id: Uuid) -> StoreResult<Vec<Agent>> {
        self.check_open()?;
        let mut agents: Vec<Agent> = self
            .tables
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.swarm_id == swarm_id)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.spawned_at);
        Ok(agents)
    }

    async fn reset_workers_idle(&self, swarm_id: Uuid) -> StoreResult<u64> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let mut reset = 0;
        for agent in tables.agents.values_mut() {
            if agent.swarm_id == swarm_id && agent.role != AgentRole::Queen {
                agent.status = AgentStatus::Idle;
                agent.current_task_id = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn create_task(&self, task: &Task) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        if tables.tasks.contains_key(&task.id) {
            return Err(StoreError::Op(format!("task {} already exists", task.id)));
        }
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        self.check_open()?;
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn update_task(&self, task: &Task) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let slot = tables
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::RowNotFound(format!("task {}", task.id)))?;
        *slot = task.clone();
        Ok(())
    }

    async fn list_tasks(
        &self,
        swarm_id: Uuid,
        status: Option<TaskStatus>,
    ) -> StoreResult<Vec<Task>> {
        self.check_open()?;
        let mut tasks: Vec<Task> = self
            .tables
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.swarm_id == swarm_id && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(tasks)
    }

    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(StoreError::Op(format!("session {} already exists", session.id)));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        self.check_open()?;
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let slot = tables
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::RowNotFound(format!("session {}", session.id)))?;
        *slot = session.clone();
        Ok(())
    }

    async fn list_sessions(
        &self,
        statuses: Option<&[SessionStatus]>,
    ) -> StoreResult<Vec<Session>> {
        self.check_open()?;
        let mut sessions: Vec<Session> = self
            .tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| statuses.is_none_or(|wanted| wanted.contains(&s.status)))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn transition_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> StoreResult<Session> {
        self.check_open()?;
        // Single write guard stands in for the SQLite transaction: the
        // session and swarm rows change together or not at all.
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::RowNotFound(format!("session {session_id}")))?;
        session.status = status;
        session.updated_at = now;
        match status {
            SessionStatus::Paused => session.paused_at = Some(now),
            SessionStatus::Active => {
                session.paused_at = None;
                session.resumed_at = Some(now);
            }
            SessionStatus::Stopped | SessionStatus::Completed => session.paused_at = None,
        }
        let updated = session.clone();

        let swarm_id = updated.swarm_id;
        if let Some(swarm) = tables.swarms.get_mut(&swarm_id) {
            swarm.status = status.into();
            swarm.updated_at = now;
        }

        Ok(updated)
    }

    async fn set_checkpoint_data(
        &self,
        session_id: Uuid,
        data: &serde_json::Value,
    ) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::RowNotFound(format!("session {session_id}")))?;
        session.checkpoint_data = Some(data.clone());
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        tables.sessions.remove(&session_id);
        tables.checkpoints.retain(|c| c.session_id != session_id);
        tables.logs.retain(|l| l.session_id != session_id);
        Ok(())
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.check_open()?;
        self.tables.write().await.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    async fn list_checkpoints(&self, session_id: Uuid) -> StoreResult<Vec<Checkpoint>> {
        self.check_open()?;
        Ok(self
            .tables
            .read()
            .await
            .checkpoints
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn append_log(&self, log: &SessionLog) -> StoreResult<()> {
        self.check_open()?;
        self.tables.write().await.logs.push(log.clone());
        Ok(())
    }

    async fn list_logs(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<SessionLog>> {
        self.check_open()?;
        let tables = self.tables.read().await;
        let mut logs: Vec<SessionLog> = tables
            .logs
            .iter()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(logs.into_iter().skip(offset).take(limit).collect())
    }

    async fn upsert_memory(&self, entry: &MemoryEntry) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let key = (entry.namespace.clone(), entry.key.clone());
        match tables.memory.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                // created_at and created_by survive updates, matching the
                // SQLite upsert.
                let existing = slot.get_mut();
                let created_at = existing.created_at;
                let created_by = existing.created_by.clone();
                *existing = entry.clone();
                existing.created_at = created_at;
                existing.created_by = created_by;
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }
        Ok(())
    }

    async fn retrieve_memory(
        &self,
        namespace: &str,
        key: &str,
    ) -> StoreResult<Option<MemoryEntry>> {
        self.check_open()?;
        Ok(self
            .tables
            .read()
            .await
            .memory
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn search_memory_like(
        &self,
        namespace: &str,
        pattern: &str,
        limit: usize,
    ) -> StoreResult<Vec<MemoryEntry>> {
        self.check_open()?;
        let needle = pattern.to_lowercase();
        let tables = self.tables.read().await;
        let mut hits: Vec<MemoryEntry> = tables
            .memory
            .values()
            .filter(|e| e.namespace == namespace)
            .filter(|e| {
                e.key.to_lowercase().contains(&needle)
                    || e.value.to_lowercase().contains(&needle)
                    || e.entry_type.as_str().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn update_access(&self, namespace: &str, key: &str) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        if let Some(entry) = tables
            .memory
            .get_mut(&(namespace.to_string(), key.to_string()))
        {
            entry.accessed_at = Utc::now();
            entry.access_count += 1;
        }
        Ok(())
    }

    async fn delete_memory(&self, namespace: &str, key: &str) -> StoreResult<()> {
        self.check_open()?;
        self.tables
            .write()
            .await
            .memory
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn delete_expired_by_type(
        &self,
        namespace: Option<&str>,
        entry_type: MemoryType,
        ttl: Duration,
    ) -> StoreResult<u64> {
        self.check_open()?;
        let cutoff = Utc::now() - ttl;
        let mut tables = self.tables.write().await;
        let before = tables.memory.len();
        tables.memory.retain(|_, e| {
            !(e.entry_type == entry_type
                && e.accessed_at < cutoff
                && namespace.is_none_or(|ns| e.namespace == ns))
        });
        Ok((before - tables.memory.len()) as u64)
    }

    async fn least_recently_accessed(
        &self,
        namespace: Option<&str>,
        limit: usize,
        exclude_types: &[MemoryType],
    ) -> StoreResult<Vec<MemoryEntry>> {
        self.check_open()?;
        let tables = self.tables.read().await;
        let mut entries: Vec<MemoryEntry> = tables
            .memory
            .values()
            .filter(|e| namespace.is_none_or(|ns| e.namespace == ns))
            .filter(|e| !exclude_types.contains(&e.entry_type))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.accessed_at
                .cmp(&b.accessed_at)
                .then(a.access_count.cmp(&b.access_count))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    async fn total_memory_size(&self) -> StoreResult<u64> {
        self.check_open()?;
        Ok(self
            .tables
            .read()
            .await
            .memory
            .values()
            .map(|e| e.size_bytes)
            .sum())
    }

    async fn list_memory(&self, namespace: &str) -> StoreResult<Vec<MemoryEntry>> {
        self.check_open()?;
        let mut entries: Vec<MemoryEntry> = self
            .tables
            .read()
            .await
            .memory
            .values()
            .filter(|e| e.namespace == namespace)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn insert_decision(&self, decision: &Decision) -> StoreResult<()> {
        self.check_open()?;
        self.tables
            .write()
            .await
            .decisions
            .insert(decision.id, decision.clone());
        Ok(())
    }

    async fn update_decision(&self, decision: &Decision) -> StoreResult<()> {
        self.check_open()?;
        let mut tables = self.tables.write().await;
        let slot = tables
            .decisions
            .get_mut(&decision.id)
            .ok_or_else(|| StoreError::RowNotFound(format!("decision {}", decision.id)))?;
        *slot = decision.clone();
        Ok(())
    }

    async fn get_decision(&self, id: Uuid) -> StoreResult<Option<Decision>> {
        self.check_open()?;
        Ok(self.tables.read().await.decisions.get(&id).cloned())
    }

    async fn list_decisions(&self, swarm_id: Uuid) -> StoreResult<Vec<Decision>> {
        self.check_open()?;
        let mut decisions: Vec<Decision> = self
            .tables
            .read()
            .await
            .decisions
            .values()
            .filter(|d| d.swarm_id == swarm_id)
            .cloned()
            .collect();
        decisions.sort_by_key(|d| d.created_at);
        Ok(decisions)
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QueenType;

    #[tokio::test]
    async fn test_close_is_idempotent_and_fails_writes() {
        let store = InMemoryStore::new();
        store.close().await;
        store.close().await;

        let swarm = Swarm::new("objective", QueenType::Strategic);
        let err = store.create_swarm(&swarm).await.unwrap_err();
        assert_eq!(err.kind(), "store.op");
    }

    #[tokio::test]
    async fn test_transition_updates_swarm_and_session_together() {
        let store = InMemoryStore::new();
        let swarm = Swarm::new("objective", QueenType::Strategic);
        store.create_swarm(&swarm).await.unwrap();
        let session = Session::new(swarm.id, &swarm.name, &swarm.objective, serde_json::json!({}));
        store.create_session(&session).await.unwrap();

        let updated = store
            .transition_session(session.id, SessionStatus::Paused)
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Paused);
        assert!(updated.paused_at.is_some());

        let swarm = store.get_swarm(swarm.id).await.unwrap().unwrap();
        assert_eq!(swarm.status, SwarmStatus::Paused);
    }
}
