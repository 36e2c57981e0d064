//! Persistence store port.
//!
//! One trait covers every durable table so the SQLite store and the
//! in-memory fallback are interchangeable. All mutators funnel through a
//! `Store`; components hold in-memory projections that re-synchronize from
//! it on resume.

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    Agent, Checkpoint, Decision, MemoryEntry, MemoryType, Session, SessionLog, SessionStatus,
    Swarm, SwarmStatus, Task, TaskStatus,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Typed, transactional interface over the durable tables of the hive.
///
/// Single-statement writes are atomic; multi-table updates (session status
/// plus swarm status) execute in one transaction. `close` is idempotent.
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Swarms
    // ------------------------------------------------------------------

    async fn create_swarm(&self, swarm: &Swarm) -> StoreResult<()>;

    async fn get_swarm(&self, id: Uuid) -> StoreResult<Option<Swarm>>;

    async fn update_swarm_status(&self, id: Uuid, status: SwarmStatus) -> StoreResult<()>;

    async fn list_swarms(&self) -> StoreResult<Vec<Swarm>>;

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    async fn create_agent(&self, agent: &Agent) -> StoreResult<()>;

    async fn get_agent(&self, id: Uuid) -> StoreResult<Option<Agent>>;

    /// Overwrite the full agent row (status, performance, counters, binding).
    async fn update_agent(&self, agent: &Agent) -> StoreResult<()>;

    async fn list_agents(&self, swarm_id: Uuid) -> StoreResult<Vec<Agent>>;

    /// Reset every non-queen agent of the swarm to idle with no bound task.
    async fn reset_workers_idle(&self, swarm_id: Uuid) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    async fn create_task(&self, task: &Task) -> StoreResult<()>;

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>>;

    async fn update_task(&self, task: &Task) -> StoreResult<()>;

    async fn list_tasks(
        &self,
        swarm_id: Uuid,
        status: Option<TaskStatus>,
    ) -> StoreResult<Vec<Task>>;

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    async fn create_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>>;

    /// Overwrite the full session row.
    async fn update_session(&self, session: &Session) -> StoreResult<()>;

    /// List sessions, optionally filtered to the given statuses.
    async fn list_sessions(
        &self,
        statuses: Option<&[SessionStatus]>,
    ) -> StoreResult<Vec<Session>>;

    /// Atomically update the session status and the paired swarm status in
    /// one transaction, maintaining the `paused_at`/`resumed_at` invariants.
    async fn transition_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> StoreResult<Session>;

    /// Overwrite the latest checkpoint payload on the session row.
    async fn set_checkpoint_data(
        &self,
        session_id: Uuid,
        data: &serde_json::Value,
    ) -> StoreResult<()>;

    /// Remove a session row and its checkpoints and logs (used by archival).
    async fn delete_session(&self, session_id: Uuid) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Checkpoints (append-only)
    // ------------------------------------------------------------------

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()>;

    async fn list_checkpoints(&self, session_id: Uuid) -> StoreResult<Vec<Checkpoint>>;

    // ------------------------------------------------------------------
    // Session logs (append-only)
    // ------------------------------------------------------------------

    async fn append_log(&self, log: &SessionLog) -> StoreResult<()>;

    /// Paginated log read, newest first.
    async fn list_logs(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<SessionLog>>;

    // ------------------------------------------------------------------
    // Memory (hot path; implementations keep these prepared)
    // ------------------------------------------------------------------

    async fn upsert_memory(&self, entry: &MemoryEntry) -> StoreResult<()>;

    async fn retrieve_memory(
        &self,
        namespace: &str,
        key: &str,
    ) -> StoreResult<Option<MemoryEntry>>;

    /// Substring match on key, value, or type; ordered by
    /// `(access_count desc, confidence desc)`.
    async fn search_memory_like(
        &self,
        namespace: &str,
        pattern: &str,
        limit: usize,
    ) -> StoreResult<Vec<MemoryEntry>>;

    /// Touch `accessed_at` and increment `access_count`.
    async fn update_access(&self, namespace: &str, key: &str) -> StoreResult<()>;

    async fn delete_memory(&self, namespace: &str, key: &str) -> StoreResult<()>;

    /// Delete entries of the given type whose last access is older than the
    /// TTL. `namespace = None` sweeps every namespace. Returns rows deleted.
    async fn delete_expired_by_type(
        &self,
        namespace: Option<&str>,
        entry_type: MemoryType,
        ttl: Duration,
    ) -> StoreResult<u64>;

    /// Entries ordered by `(accessed_at asc, access_count asc)`, excluding
    /// the given types.
    async fn least_recently_accessed(
        &self,
        namespace: Option<&str>,
        limit: usize,
        exclude_types: &[MemoryType],
    ) -> StoreResult<Vec<MemoryEntry>>;

    /// Sum of `size_bytes` across all memory rows.
    async fn total_memory_size(&self) -> StoreResult<u64>;

    /// Every entry in a namespace (co-access scans).
    async fn list_memory(&self, namespace: &str) -> StoreResult<Vec<MemoryEntry>>;

    // ------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------

    async fn insert_decision(&self, decision: &Decision) -> StoreResult<()>;

    async fn update_decision(&self, decision: &Decision) -> StoreResult<()>;

    async fn get_decision(&self, id: Uuid) -> StoreResult<Option<Decision>>;

    async fn list_decisions(&self, swarm_id: Uuid) -> StoreResult<Vec<Decision>>;

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Whether rows survive process restarts (false for the in-memory
    /// fallback; archival is refused there).
    fn is_persistent(&self) -> bool;

    /// Close the store. Idempotent; later writes fail with `store.op`.
    async fn close(&self);
}
