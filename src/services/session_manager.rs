//! Session lifecycle management.
//!
//! Owns the session table plus its append-only checkpoints and logs.
//! Transitions pair the session status with the owning swarm's status in one
//! store transaction, and every transition leaves a durable log row.
//! Checkpoints are mirrored to JSON files under the sessions directory for
//! disaster recovery.

use chrono::{Duration, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::error::{SessionError, StoreError};
use crate::domain::models::{
    Checkpoint, LogLevel, Session, SessionLog, SessionStatus, TaskStatus,
};
use crate::domain::ports::Store;

use super::events::{EventBus, HiveEvent};

/// A live session with its still-alive tracked children.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProcessInfo {
    pub session: Session,
    pub live_children: Vec<i32>,
}

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionManagerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

type Result<T> = std::result::Result<T, SessionManagerError>;

/// Manager for session records, checkpoints, child PIDs, and transitions.
pub struct SessionManager {
    store: Arc<dyn Store>,
    sessions_dir: PathBuf,
    archive_dir: PathBuf,
    events: Arc<EventBus>,
}

impl SessionManager {
    /// Create the manager, ensuring the on-disk session directories exist.
    pub fn new(
        store: Arc<dyn Store>,
        sessions_dir: PathBuf,
        archive_dir: PathBuf,
        events: Arc<EventBus>,
    ) -> Self {
        for dir in [&sessions_dir, &archive_dir] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot create sessions directory");
            }
        }
        Self {
            store,
            sessions_dir,
            archive_dir,
            events,
        }
    }

    // ------------------------------------------------------------------
    // Creation and lookup
    // ------------------------------------------------------------------

    /// Create a session for a swarm, recording the current process as the
    /// parent.
    pub async fn create_session(
        &self,
        swarm_id: Uuid,
        swarm_name: &str,
        objective: &str,
        metadata: serde_json::Value,
    ) -> Result<Session> {
        let session = Session::new(swarm_id, swarm_name, objective, metadata);
        self.store.create_session(&session).await?;
        self.log(session.id, LogLevel::Info, "Session created").await;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id).into())
    }

    pub async fn list_sessions(
        &self,
        statuses: Option<&[SessionStatus]>,
    ) -> Result<Vec<Session>> {
        Ok(self.store.list_sessions(statuses).await?)
    }

    // ------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------

    /// Append a named checkpoint, overwrite the session's latest checkpoint
    /// payload, and mirror the snapshot to
    /// `<sessions_dir>/<session_id>-<name>.json`.
    pub async fn save_checkpoint(
        &self,
        session_id: Uuid,
        name: &str,
        data: serde_json::Value,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(session_id, name, data.clone());
        self.store.append_checkpoint(&checkpoint).await?;
        self.store.set_checkpoint_data(session_id, &data).await?;

        // The disk mirror is best-effort; losing it never fails the save.
        let path = self.sessions_dir.join(format!("{session_id}-{name}.json"));
        match serde_json::to_string_pretty(&checkpoint) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&path, text) {
                    tracing::warn!(path = %path.display(), error = %e, "checkpoint mirror write failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "checkpoint mirror serialization failed");
            }
        }

        self.log(
            session_id,
            LogLevel::Info,
            format!("Checkpoint saved: {name}"),
        )
        .await;
        Ok(checkpoint)
    }

    pub async fn list_checkpoints(&self, session_id: Uuid) -> Result<Vec<Checkpoint>> {
        Ok(self.store.list_checkpoints(session_id).await?)
    }

    // ------------------------------------------------------------------
    // Child process tracking
    // ------------------------------------------------------------------

    pub async fn add_child_pid(&self, session_id: Uuid, pid: i32) -> Result<()> {
        let mut session = self.get_session(session_id).await?;
        if session.child_pids.insert(pid) {
            session.updated_at = Utc::now();
            self.store.update_session(&session).await?;
        }
        Ok(())
    }

    /// Remove a tracked child. A closed store makes this a warning-level
    /// no-op rather than an error, since removal races with shutdown.
    pub async fn remove_child_pid(&self, session_id: Uuid, pid: i32) -> Result<()> {
        let session = match self.store.get_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return Err(SessionError::NotFound(session_id).into()),
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    pid,
                    error = %e,
                    "child pid removal skipped, store unavailable"
                );
                return Ok(());
            }
        };

        let mut session = session;
        if session.child_pids.remove(&pid) {
            session.updated_at = Utc::now();
            if let Err(e) = self.store.update_session(&session).await {
                tracing::warn!(
                    session_id = %session_id,
                    pid,
                    error = %e,
                    "child pid removal skipped, store unavailable"
                );
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    /// Pause an active session. Pausing an already-paused session is a
    /// no-op.
    pub async fn pause_session(&self, session_id: Uuid) -> Result<Session> {
        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Paused {
            return Ok(session);
        }
        if session.status != SessionStatus::Active {
            return Err(SessionError::InvalidTransition(format!(
                "cannot pause a {} session",
                session.status.as_str()
            ))
            .into());
        }

        let session = self
            .store
            .transition_session(session_id, SessionStatus::Paused)
            .await?;
        self.log(session_id, LogLevel::Info, "Session paused").await;
        self.events.publish(HiveEvent::SessionPaused { session_id });
        Ok(session)
    }

    /// Resume a paused or stopped session: session and swarm go active in
    /// one transaction, a fresh `resumed_at` is recorded, and every
    /// non-queen agent resets to idle.
    pub async fn resume_session(&self, session_id: Uuid) -> Result<Session> {
        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Active {
            return Ok(session);
        }
        if session.status == SessionStatus::Completed {
            return Err(SessionError::InvalidTransition(
                "cannot resume a completed session".to_string(),
            )
            .into());
        }

        let session = self
            .store
            .transition_session(session_id, SessionStatus::Active)
            .await?;
        self.store.reset_workers_idle(session.swarm_id).await?;
        self.log(session_id, LogLevel::Info, "Session resumed").await;
        self.events.publish(HiveEvent::SessionResumed { session_id });
        Ok(session)
    }

    /// Stop a session: terminate tracked children (best-effort), then move
    /// session and swarm to stopped. Stopping twice is a no-op that still
    /// guarantees no tracked child survives.
    pub async fn stop_session(&self, session_id: Uuid) -> Result<Session> {
        let mut session = self.get_session(session_id).await?;

        let children: Vec<i32> = session.child_pids.iter().copied().collect();
        for pid in children {
            terminate_child(pid).await;
            session.child_pids.remove(&pid);
        }
        session.updated_at = Utc::now();
        self.store.update_session(&session).await?;

        if session.status == SessionStatus::Stopped {
            return Ok(session);
        }

        let session = self
            .store
            .transition_session(session_id, SessionStatus::Stopped)
            .await?;
        self.log(session_id, LogLevel::Info, "Session stopped").await;
        self.events.publish(HiveEvent::SessionStopped { session_id });
        Ok(session)
    }

    /// Mark a session completed with a final completion percentage.
    pub async fn complete_session(&self, session_id: Uuid) -> Result<Session> {
        let mut session = self
            .store
            .transition_session(session_id, SessionStatus::Completed)
            .await?;
        session.completion_percentage = 100.0;
        self.store.update_session(&session).await?;
        self.log(session_id, LogLevel::Info, "Session completed").await;
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Process supervision
    // ------------------------------------------------------------------

    /// Live sessions with their child PID sets filtered to processes that
    /// are still alive.
    pub async fn active_sessions_with_process_info(&self) -> Result<Vec<SessionProcessInfo>> {
        let sessions = self
            .store
            .list_sessions(Some(&[SessionStatus::Active, SessionStatus::Paused]))
            .await?;
        Ok(sessions
            .into_iter()
            .map(|session| {
                let live_children = session
                    .child_pids
                    .iter()
                    .copied()
                    .filter(|pid| pid_alive(*pid))
                    .collect();
                SessionProcessInfo {
                    session,
                    live_children,
                }
            })
            .collect())
    }

    /// Stop every live session whose parent process has died. Returns the
    /// number of sessions transitioned.
    pub async fn cleanup_orphaned_processes(&self) -> Result<usize> {
        let sessions = self
            .store
            .list_sessions(Some(&[SessionStatus::Active, SessionStatus::Paused]))
            .await?;
        let mut cleaned = 0;
        for session in sessions {
            if !pid_alive(session.parent_pid) {
                self.store
                    .transition_session(session.id, SessionStatus::Stopped)
                    .await?;
                self.log(
                    session.id,
                    LogLevel::Warning,
                    format!("Orphaned session stopped (parent pid {} dead)", session.parent_pid),
                )
                .await;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    // ------------------------------------------------------------------
    // Archival
    // ------------------------------------------------------------------

    /// Dump completed sessions older than the cutoff to the archive
    /// directory and remove them from the hot tables. Returns the number
    /// archived; the in-memory store reports 0 without touching anything.
    pub async fn archive_sessions(&self, days_old: i64) -> Result<usize> {
        if !self.store.is_persistent() {
            tracing::warn!("session archival skipped: in-memory store");
            return Ok(0);
        }

        let cutoff = Utc::now() - Duration::days(days_old);
        let sessions = self
            .store
            .list_sessions(Some(&[SessionStatus::Completed]))
            .await?;

        let mut archived = 0;
        for session in sessions {
            if session.updated_at >= cutoff {
                continue;
            }
            let checkpoints = self.store.list_checkpoints(session.id).await?;
            let logs = self.store.list_logs(session.id, 100_000, 0).await?;
            let dump = json!({
                "session": session,
                "checkpoints": checkpoints,
                "logs": logs,
            });

            let path = self.archive_dir.join(format!("{}.json", session.id));
            let text = serde_json::to_string_pretty(&dump)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            std::fs::write(&path, text)
                .map_err(|e| StoreError::Op(format!("archive write failed: {e}")))?;

            self.store.delete_session(session.id).await?;
            archived += 1;
        }
        Ok(archived)
    }

    // ------------------------------------------------------------------
    // Logs and completion
    // ------------------------------------------------------------------

    /// Paginated log read, newest first.
    pub async fn session_logs(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionLog>> {
        Ok(self.store.list_logs(session_id, limit, offset).await?)
    }

    /// Convenience: the newest `n` log rows.
    pub async fn recent_logs(&self, session_id: Uuid, n: usize) -> Result<Vec<SessionLog>> {
        self.session_logs(session_id, n, 0).await
    }

    /// Completion percentage recomputed from durable task counts. The
    /// stored value is not overwritten here.
    pub async fn completion_percentage(&self, swarm_id: Uuid) -> Result<f64> {
        let tasks = self.store.list_tasks(swarm_id, None).await?;
        if tasks.is_empty() {
            return Ok(0.0);
        }
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        Ok((completed as f64 / tasks.len() as f64 * 100.0).round())
    }

    async fn log(&self, session_id: Uuid, level: LogLevel, message: impl Into<String>) {
        let row = SessionLog::new(session_id, level, message);
        if let Err(e) = self.store.append_log(&row).await {
            tracing::warn!(session_id = %session_id, error = %e, "session log write failed");
        }
    }
}

/// Probe whether a process exists.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Graceful-then-forceful child termination. Errors are logged, never
/// raised.
pub async fn terminate_child(pid: i32) {
    if !pid_alive(pid) {
        return;
    }
    let target = Pid::from_raw(pid);
    if let Err(e) = kill(target, Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "SIGTERM failed");
        return;
    }
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    if pid_alive(pid) {
        if let Err(e) = kill(target, Signal::SIGKILL) {
            tracing::warn!(pid, error = %e, "SIGKILL failed");
        }
    }
}
