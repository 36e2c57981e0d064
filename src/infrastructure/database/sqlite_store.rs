//! SQLite implementation of the `Store` port.
//!
//! Row mapping is explicit: identifiers are TEXT uuids, timestamps are
//! INTEGER epoch-milliseconds, and structured columns (capabilities,
//! metadata, votes) are JSON text so unknown fields written by newer
//! versions round-trip intact.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    Agent, AgentPerformance, AgentRole, AgentStatus, Checkpoint, ConsensusAlgo, Decision,
    DecisionStatus, LogLevel, MemoryEntry, MemoryType, Session, SessionLog, SessionStatus, Swarm,
    SwarmStatus, Task, TaskComplexity, TaskMetadata, TaskStatus, WorkerType,
};
use crate::domain::ports::{Store, StoreResult};

use super::connection::DatabaseConnection;

/// Durable store over the embedded SQLite database.
pub struct SqliteStore {
    conn: DatabaseConnection,
}

impl SqliteStore {
    /// Open the store at the given path, running migrations and the schema
    /// evolution pass.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("cannot create {parent:?}: {e}")))?;
            }
        }
        let conn = DatabaseConnection::new(&format!("sqlite:{path}")).await?;
        conn.migrate().await?;
        Ok(Self { conn })
    }

    /// Open an in-process database, mainly for tests. A single pooled
    /// connection keeps one coherent `:memory:` database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = DatabaseConnection::new_with_pool_size("sqlite::memory:", 1).await?;
        conn.migrate().await?;
        Ok(Self { conn })
    }

    fn pool(&self) -> &SqlitePool {
        self.conn.pool()
    }
}

// ----------------------------------------------------------------------
// Column conversion helpers
// ----------------------------------------------------------------------

fn ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ms(value: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| StoreError::Serialization(format!("invalid timestamp: {value}")))
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Serialization(format!("invalid uuid: {e}")))
}

fn parse_enum<T>(value: &str, parser: fn(&str) -> Option<T>, what: &str) -> Result<T, StoreError> {
    parser(value).ok_or_else(|| StoreError::Serialization(format!("invalid {what}: {value}")))
}

fn swarm_from_row(row: &SqliteRow) -> Result<Swarm, StoreError> {
    Ok(Swarm {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        objective: row.try_get("objective")?,
        queen_type: parse_enum(
            &row.try_get::<String, _>("queen_type")?,
            crate::domain::models::QueenType::from_str,
            "queen_type",
        )?,
        status: parse_enum(
            &row.try_get::<String, _>("status")?,
            SwarmStatus::from_str,
            "swarm status",
        )?,
        topology: parse_enum(
            &row.try_get::<String, _>("topology")?,
            crate::domain::models::Topology::from_str,
            "topology",
        )?,
        created_at: from_ms(row.try_get("created_at")?)?,
        updated_at: from_ms(row.try_get("updated_at")?)?,
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, StoreError> {
    let capabilities: HashSet<String> =
        serde_json::from_str(&row.try_get::<String, _>("capabilities")?)?;
    let current_task_id = row
        .try_get::<Option<String>, _>("current_task_id")?
        .map(|s| parse_uuid(&s))
        .transpose()?;
    Ok(Agent {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        swarm_id: parse_uuid(&row.try_get::<String, _>("swarm_id")?)?,
        name: row.try_get("name")?,
        worker_type: parse_enum(
            &row.try_get::<String, _>("worker_type")?,
            WorkerType::from_str,
            "worker_type",
        )?,
        role: parse_enum(&row.try_get::<String, _>("role")?, AgentRole::from_str, "role")?,
        status: parse_enum(
            &row.try_get::<String, _>("status")?,
            AgentStatus::from_str,
            "agent status",
        )?,
        capabilities,
        performance: AgentPerformance {
            avg_task_time_ms: row.try_get("avg_task_time_ms")?,
            success_rate: row.try_get("success_rate")?,
        },
        tasks_completed: row.try_get::<i64, _>("tasks_completed")? as u64,
        tasks_attempted: row.try_get::<i64, _>("tasks_attempted")? as u64,
        current_task_id,
        spawned_at: from_ms(row.try_get("spawned_at")?)?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let assigned_agent_id = row
        .try_get::<Option<String>, _>("assigned_agent_id")?
        .map(|s| parse_uuid(&s))
        .transpose()?;
    let extra: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&row.try_get::<String, _>("metadata")?)?;
    let result = row
        .try_get::<Option<String>, _>("result")?
        .map(|s| serde_json::from_str(&s))
        .transpose()?;
    let completed_at = row
        .try_get::<Option<i64>, _>("completed_at")?
        .map(from_ms)
        .transpose()?;
    Ok(Task {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        swarm_id: parse_uuid(&row.try_get::<String, _>("swarm_id")?)?,
        assigned_agent_id,
        description: row.try_get("description")?,
        priority: row.try_get::<i64, _>("priority")? as u8,
        status: parse_enum(
            &row.try_get::<String, _>("status")?,
            TaskStatus::from_str,
            "task status",
        )?,
        metadata: TaskMetadata {
            complexity: parse_enum(
                &row.try_get::<String, _>("complexity")?,
                TaskComplexity::from_str,
                "complexity",
            )?,
            estimated_duration_ms: row.try_get::<i64, _>("estimated_duration_ms")? as u64,
            extra,
        },
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        result,
        error: row.try_get("error")?,
        created_at: from_ms(row.try_get("created_at")?)?,
        completed_at,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<Session, StoreError> {
    let child_pids: HashSet<i32> =
        serde_json::from_str(&row.try_get::<String, _>("child_pids")?)?;
    let checkpoint_data = row
        .try_get::<Option<String>, _>("checkpoint_data")?
        .map(|s| serde_json::from_str(&s))
        .transpose()?;
    let paused_at = row
        .try_get::<Option<i64>, _>("paused_at")?
        .map(from_ms)
        .transpose()?;
    let resumed_at = row
        .try_get::<Option<i64>, _>("resumed_at")?
        .map(from_ms)
        .transpose()?;
    Ok(Session {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        swarm_id: parse_uuid(&row.try_get::<String, _>("swarm_id")?)?,
        swarm_name: row.try_get("swarm_name")?,
        objective: row.try_get("objective")?,
        status: parse_enum(
            &row.try_get::<String, _>("status")?,
            SessionStatus::from_str,
            "session status",
        )?,
        created_at: from_ms(row.try_get("created_at")?)?,
        updated_at: from_ms(row.try_get("updated_at")?)?,
        paused_at,
        resumed_at,
        completion_percentage: row.try_get("completion_percentage")?,
        checkpoint_data,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
        parent_pid: row.try_get::<i64, _>("parent_pid")? as i32,
        child_pids,
    })
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint, StoreError> {
    Ok(Checkpoint {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        session_id: parse_uuid(&row.try_get::<String, _>("session_id")?)?,
        name: row.try_get("name")?,
        data: serde_json::from_str(&row.try_get::<String, _>("data")?)?,
        created_at: from_ms(row.try_get("created_at")?)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<SessionLog, StoreError> {
    let agent_id = row
        .try_get::<Option<String>, _>("agent_id")?
        .map(|s| parse_uuid(&s))
        .transpose()?;
    let data = row
        .try_get::<Option<String>, _>("data")?
        .map(|s| serde_json::from_str(&s))
        .transpose()?;
    Ok(SessionLog {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        session_id: parse_uuid(&row.try_get::<String, _>("session_id")?)?,
        timestamp: from_ms(row.try_get("timestamp")?)?,
        level: parse_enum(&row.try_get::<String, _>("level")?, LogLevel::from_str, "log level")?,
        message: row.try_get("message")?,
        agent_id,
        data,
    })
}

fn memory_from_row(row: &SqliteRow) -> Result<MemoryEntry, StoreError> {
    Ok(MemoryEntry {
        namespace: row.try_get("namespace")?,
        key: row.try_get("key")?,
        value: row.try_get("value")?,
        entry_type: parse_enum(
            &row.try_get::<String, _>("entry_type")?,
            MemoryType::from_str,
            "memory type",
        )?,
        confidence: row.try_get("confidence")?,
        created_by: row.try_get("created_by")?,
        created_at: from_ms(row.try_get("created_at")?)?,
        accessed_at: from_ms(row.try_get("accessed_at")?)?,
        access_count: row.try_get::<i64, _>("access_count")? as u64,
        compressed: row.try_get::<i64, _>("compressed")? != 0,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
    })
}

fn decision_from_row(row: &SqliteRow) -> Result<Decision, StoreError> {
    let options: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("options")?)?;
    let votes: HashMap<String, String> =
        serde_json::from_str(&row.try_get::<String, _>("votes")?)?;
    Ok(Decision {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        swarm_id: parse_uuid(&row.try_get::<String, _>("swarm_id")?)?,
        topic: row.try_get("topic")?,
        options,
        votes,
        algorithm: parse_enum(
            &row.try_get::<String, _>("algorithm")?,
            ConsensusAlgo::from_str,
            "consensus algorithm",
        )?,
        confidence: row.try_get("confidence")?,
        result: row.try_get("result")?,
        status: parse_enum(
            &row.try_get::<String, _>("status")?,
            DecisionStatus::from_str,
            "decision status",
        )?,
        created_at: from_ms(row.try_get("created_at")?)?,
    })
}

// ----------------------------------------------------------------------
// Store implementation
// ----------------------------------------------------------------------

#[async_trait]
impl Store for SqliteStore {
    async fn create_swarm(&self, swarm: &Swarm) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO swarms (id, name, objective, queen_type, status, topology, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(swarm.id.to_string())
        .bind(&swarm.name)
        .bind(&swarm.objective)
        .bind(swarm.queen_type.as_str())
        .bind(swarm.status.as_str())
        .bind(swarm.topology.as_str())
        .bind(ms(swarm.created_at))
        .bind(ms(swarm.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_swarm(&self, id: Uuid) -> StoreResult<Option<Swarm>> {
        let row = sqlx::query("SELECT * FROM swarms WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(swarm_from_row).transpose()
    }

    async fn update_swarm_status(&self, id: Uuid, status: SwarmStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE swarms SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(ms(Utc::now()))
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("swarm {id}")));
        }
        Ok(())
    }

    async fn list_swarms(&self) -> StoreResult<Vec<Swarm>> {
        let rows = sqlx::query("SELECT * FROM swarms ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(swarm_from_row).collect()
    }

    async fn create_agent(&self, agent: &Agent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO agents (id, swarm_id, name, worker_type, role, status, capabilities,
                                 avg_task_time_ms, success_rate, tasks_completed, tasks_attempted,
                                 current_task_id, spawned_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(agent.id.to_string())
        .bind(agent.swarm_id.to_string())
        .bind(&agent.name)
        .bind(agent.worker_type.as_str())
        .bind(agent.role.as_str())
        .bind(agent.status.as_str())
        .bind(serde_json::to_string(&agent.capabilities)?)
        .bind(agent.performance.avg_task_time_ms)
        .bind(agent.performance.success_rate)
        .bind(agent.tasks_completed as i64)
        .bind(agent.tasks_attempted as i64)
        .bind(agent.current_task_id.map(|id| id.to_string()))
        .bind(ms(agent.spawned_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn update_agent(&self, agent: &Agent) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE agents SET status = ?, capabilities = ?, avg_task_time_ms = ?,
                               success_rate = ?, tasks_completed = ?, tasks_attempted = ?,
                               current_task_id = ?
             WHERE id = ?",
        )
        .bind(agent.status.as_str())
        .bind(serde_json::to_string(&agent.capabilities)?)
        .bind(agent.performance.avg_task_time_ms)
        .bind(agent.performance.success_rate)
        .bind(agent.tasks_completed as i64)
        .bind(agent.tasks_attempted as i64)
        .bind(agent.current_task_id.map(|id| id.to_string()))
        .bind(agent.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("agent {}", agent.id)));
        }
        Ok(())
    }

    async fn list_agents(&self, swarm_id: Uuid) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE swarm_id = ? ORDER BY spawned_at")
            .bind(swarm_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(agent_from_row).collect()
    }

    async fn reset_workers_idle(&self, swarm_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE agents SET status = 'idle', current_task_id = NULL
             WHERE swarm_id = ? AND role != 'queen'",
        )
        .bind(swarm_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_task(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tasks (id, swarm_id, assigned_agent_id, description, priority, status,
                                complexity, estimated_duration_ms, metadata, retry_count, result,
                                error, created_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.swarm_id.to_string())
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(&task.description)
        .bind(i64::from(task.priority))
        .bind(task.status.as_str())
        .bind(task.metadata.complexity.as_str())
        .bind(task.metadata.estimated_duration_ms as i64)
        .bind(serde_json::to_string(&task.metadata.extra)?)
        .bind(i64::from(task.retry_count))
        .bind(task.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&task.error)
        .bind(ms(task.created_at))
        .bind(task.completed_at.map(ms))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_task(&self, task: &Task) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET assigned_agent_id = ?, status = ?, retry_count = ?, result = ?,
                              error = ?, completed_at = ?
             WHERE id = ?",
        )
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(task.status.as_str())
        .bind(i64::from(task.retry_count))
        .bind(task.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&task.error)
        .bind(task.completed_at.map(ms))
        .bind(task.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    async fn list_tasks(
        &self,
        swarm_id: Uuid,
        status: Option<TaskStatus>,
    ) -> StoreResult<Vec<Task>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM tasks WHERE swarm_id = ? AND status = ?
                     ORDER BY priority DESC, created_at",
                )
                .bind(swarm_id.to_string())
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM tasks WHERE swarm_id = ? ORDER BY priority DESC, created_at")
                    .bind(swarm_id.to_string())
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(task_from_row).collect()
    }

    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, swarm_id, swarm_name, objective, status, created_at,
                                   updated_at, paused_at, resumed_at, completion_percentage,
                                   checkpoint_data, metadata, parent_pid, child_pids)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.swarm_id.to_string())
        .bind(&session.swarm_name)
        .bind(&session.objective)
        .bind(session.status.as_str())
        .bind(ms(session.created_at))
        .bind(ms(session.updated_at))
        .bind(session.paused_at.map(ms))
        .bind(session.resumed_at.map(ms))
        .bind(session.completion_percentage)
        .bind(session.checkpoint_data.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&session.metadata)?)
        .bind(i64::from(session.parent_pid))
        .bind(serde_json::to_string(&session.child_pids)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, updated_at = ?, paused_at = ?, resumed_at = ?,
                                 completion_percentage = ?, checkpoint_data = ?, metadata = ?,
                                 child_pids = ?
             WHERE id = ?",
        )
        .bind(session.status.as_str())
        .bind(ms(session.updated_at))
        .bind(session.paused_at.map(ms))
        .bind(session.resumed_at.map(ms))
        .bind(session.completion_percentage)
        .bind(session.checkpoint_data.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&session.metadata)?)
        .bind(serde_json::to_string(&session.child_pids)?)
        .bind(session.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    async fn list_sessions(
        &self,
        statuses: Option<&[SessionStatus]>,
    ) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        let sessions: Result<Vec<Session>, StoreError> =
            rows.iter().map(session_from_row).collect();
        let mut sessions = sessions?;
        if let Some(wanted) = statuses {
            sessions.retain(|s| wanted.contains(&s.status));
        }
        Ok(sessions)
    }

    async fn transition_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> StoreResult<Session> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::RowNotFound(format!("session {session_id}")))?;
        let mut session = session_from_row(&row)?;

        let now = Utc::now();
        session.status = status;
        session.updated_at = now;
        match status {
            SessionStatus::Paused => session.paused_at = Some(now),
            // Transitioning to active is always a resume; creation inserts
            // the row already active without passing through here.
            SessionStatus::Active => {
                session.paused_at = None;
                session.resumed_at = Some(now);
            }
            SessionStatus::Stopped | SessionStatus::Completed => session.paused_at = None,
        }

        sqlx::query(
            "UPDATE sessions SET status = ?, updated_at = ?, paused_at = ?, resumed_at = ?
             WHERE id = ?",
        )
        .bind(session.status.as_str())
        .bind(ms(session.updated_at))
        .bind(session.paused_at.map(ms))
        .bind(session.resumed_at.map(ms))
        .bind(session.id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE swarms SET status = ?, updated_at = ? WHERE id = ?")
            .bind(SwarmStatus::from(status).as_str())
            .bind(ms(now))
            .bind(session.swarm_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn set_checkpoint_data(
        &self,
        session_id: Uuid,
        data: &serde_json::Value,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET checkpoint_data = ?, updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(data)?)
        .bind(ms(Utc::now()))
        .bind(session_id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM session_logs WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM session_checkpoints WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO session_checkpoints (id, session_id, name, data, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.session_id.to_string())
        .bind(&checkpoint.name)
        .bind(serde_json::to_string(&checkpoint.data)?)
        .bind(ms(checkpoint.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_checkpoints(&self, session_id: Uuid) -> StoreResult<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT * FROM session_checkpoints WHERE session_id = ? ORDER BY created_at",
        )
        .bind(session_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(checkpoint_from_row).collect()
    }

    async fn append_log(&self, log: &SessionLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO session_logs (id, session_id, timestamp, level, message, agent_id, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id.to_string())
        .bind(log.session_id.to_string())
        .bind(ms(log.timestamp))
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(log.agent_id.map(|id| id.to_string()))
        .bind(log.data.as_ref().map(serde_json::to_string).transpose()?)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_logs(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<SessionLog>> {
        let rows = sqlx::query(
            "SELECT * FROM session_logs WHERE session_id = ?
             ORDER BY timestamp DESC LIMIT ? OFFSET ?",
        )
        .bind(session_id.to_string())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn upsert_memory(&self, entry: &MemoryEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO memory_entries (namespace, key, value, entry_type, confidence,
                                         created_by, created_at, accessed_at, access_count,
                                         compressed, size_bytes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (namespace, key) DO UPDATE SET
                value = excluded.value,
                entry_type = excluded.entry_type,
                confidence = excluded.confidence,
                accessed_at = excluded.accessed_at,
                access_count = excluded.access_count,
                compressed = excluded.compressed,
                size_bytes = excluded.size_bytes",
        )
        .bind(&entry.namespace)
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.entry_type.as_str())
        .bind(entry.confidence)
        .bind(&entry.created_by)
        .bind(ms(entry.created_at))
        .bind(ms(entry.accessed_at))
        .bind(entry.access_count as i64)
        .bind(i64::from(entry.compressed))
        .bind(entry.size_bytes as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn retrieve_memory(
        &self,
        namespace: &str,
        key: &str,
    ) -> StoreResult<Option<MemoryEntry>> {
        let row = sqlx::query("SELECT * FROM memory_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(memory_from_row).transpose()
    }

    async fn search_memory_like(
        &self,
        namespace: &str,
        pattern: &str,
        limit: usize,
    ) -> StoreResult<Vec<MemoryEntry>> {
        let like = format!("%{pattern}%");
        let rows = sqlx::query(
            "SELECT * FROM memory_entries
             WHERE namespace = ? AND (key LIKE ? OR value LIKE ? OR entry_type LIKE ?)
             ORDER BY access_count DESC, confidence DESC
             LIMIT ?",
        )
        .bind(namespace)
        .bind(&like)
        .bind(&like)
        .bind(&like)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(memory_from_row).collect()
    }

    async fn update_access(&self, namespace: &str, key: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE memory_entries SET accessed_at = ?, access_count = access_count + 1
             WHERE namespace = ? AND key = ?",
        )
        .bind(ms(Utc::now()))
        .bind(namespace)
        .bind(key)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete_memory(&self, namespace: &str, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM memory_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn delete_expired_by_type(
        &self,
        namespace: Option<&str>,
        entry_type: MemoryType,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let cutoff = ms(Utc::now() - ttl);
        let result = match namespace {
            Some(namespace) => {
                sqlx::query(
                    "DELETE FROM memory_entries
                     WHERE namespace = ? AND entry_type = ? AND accessed_at < ?",
                )
                .bind(namespace)
                .bind(entry_type.as_str())
                .bind(cutoff)
                .execute(self.pool())
                .await?
            }
            None => {
                sqlx::query("DELETE FROM memory_entries WHERE entry_type = ? AND accessed_at < ?")
                    .bind(entry_type.as_str())
                    .bind(cutoff)
                    .execute(self.pool())
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn least_recently_accessed(
        &self,
        namespace: Option<&str>,
        limit: usize,
        exclude_types: &[MemoryType],
    ) -> StoreResult<Vec<MemoryEntry>> {
        // exclude_types values come from the closed enum, safe to inline.
        let exclusion = if exclude_types.is_empty() {
            String::new()
        } else {
            let quoted: Vec<String> = exclude_types
                .iter()
                .map(|t| format!("'{}'", t.as_str()))
                .collect();
            format!("AND entry_type NOT IN ({})", quoted.join(", "))
        };

        let rows = match namespace {
            Some(namespace) => {
                let statement = format!(
                    "SELECT * FROM memory_entries WHERE namespace = ? {exclusion}
                     ORDER BY accessed_at ASC, access_count ASC LIMIT ?"
                );
                sqlx::query(&statement)
                    .bind(namespace)
                    .bind(limit as i64)
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                let statement = format!(
                    "SELECT * FROM memory_entries WHERE 1=1 {exclusion}
                     ORDER BY accessed_at ASC, access_count ASC LIMIT ?"
                );
                sqlx::query(&statement)
                    .bind(limit as i64)
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(memory_from_row).collect()
    }

    async fn total_memory_size(&self) -> StoreResult<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(size_bytes), 0) FROM memory_entries")
                .fetch_one(self.pool())
                .await?;
        Ok(row.0 as u64)
    }

    async fn list_memory(&self, namespace: &str) -> StoreResult<Vec<MemoryEntry>> {
        let rows = sqlx::query("SELECT * FROM memory_entries WHERE namespace = ? ORDER BY key")
            .bind(namespace)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(memory_from_row).collect()
    }

    async fn insert_decision(&self, decision: &Decision) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO decisions (id, swarm_id, topic, options, votes, algorithm, confidence,
                                    result, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(decision.id.to_string())
        .bind(decision.swarm_id.to_string())
        .bind(&decision.topic)
        .bind(serde_json::to_string(&decision.options)?)
        .bind(serde_json::to_string(&decision.votes)?)
        .bind(decision.algorithm.as_str())
        .bind(decision.confidence)
        .bind(&decision.result)
        .bind(decision.status.as_str())
        .bind(ms(decision.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn update_decision(&self, decision: &Decision) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE decisions SET votes = ?, confidence = ?, result = ?, status = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(&decision.votes)?)
        .bind(decision.confidence)
        .bind(&decision.result)
        .bind(decision.status.as_str())
        .bind(decision.id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("decision {}", decision.id)));
        }
        Ok(())
    }

    async fn get_decision(&self, id: Uuid) -> StoreResult<Option<Decision>> {
        let row = sqlx::query("SELECT * FROM decisions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn list_decisions(&self, swarm_id: Uuid) -> StoreResult<Vec<Decision>> {
        let rows = sqlx::query("SELECT * FROM decisions WHERE swarm_id = ? ORDER BY created_at")
            .bind(swarm_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(decision_from_row).collect()
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.conn.close().await;
    }
}
