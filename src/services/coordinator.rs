//! The coordinator: one value owning the store, the shared services, and
//! every live swarm, with deterministic and idempotent teardown.
//!
//! Host surfaces (the CLI, tests) talk to the hive exclusively through this
//! type; nothing in the crate installs process-wide state on its own.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::{
    AgentRole, HiveConfig, QueenType, Session, Swarm, TaskStatus, WorkerType,
};
use crate::domain::ports::{Store, WorkerRunner};
use crate::infrastructure::database::open_store;

use super::autosave::AutoSaveMiddleware;
use super::collective_memory::{CollectiveMemory, MaintenanceHandle};
use super::consensus::ConsensusEngine;
use super::events::EventBus;
use super::message_bus::{BusHandle, MessageBus};
use super::queen::{ExecutionPlan, ObjectiveAnalysis, QueenCoordinator};
use super::session_manager::{SessionManager, SessionProcessInfo};
use super::swarm::{SwarmCore, SwarmCoreConfig, SwarmMetrics};

/// Options for `spawn`.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub queen_type: Option<QueenType>,
    pub max_workers: Option<usize>,
    /// Explicit worker types; derived from the analysis when empty.
    pub worker_types: Vec<WorkerType>,
    /// Skip signal handler installation (hosted/test environments).
    pub non_interactive: bool,
}

/// Result of spawning a swarm.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    pub swarm_id: Uuid,
    pub session_id: Uuid,
    pub analysis: ObjectiveAnalysis,
    pub plan: ExecutionPlan,
    pub workers_spawned: usize,
}

/// Aggregate per-swarm status for the host CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmStatusReport {
    pub swarm_id: Uuid,
    pub name: String,
    pub objective: String,
    pub status: String,
    pub agents_total: usize,
    pub agents_idle: usize,
    pub agents_busy: usize,
    pub tasks_total: usize,
    pub tasks_pending: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub completion_percentage: f64,
}

/// Aggregate per-swarm metrics for the host CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMetricsReport {
    pub swarm_id: Uuid,
    pub name: String,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    /// Mean worker success rate in [0, 1]
    pub success_rate: f64,
    /// Live throughput, when the swarm runs in this process
    pub throughput_per_minute: f64,
}

struct SwarmHandle {
    core: Arc<SwarmCore>,
    consensus: Arc<ConsensusEngine>,
    autosave: Arc<AutoSaveMiddleware>,
    session_id: Uuid,
}

/// Owner of the hive's shared state and lifecycles.
pub struct Coordinator {
    config: HiveConfig,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    memory: Arc<CollectiveMemory>,
    session_manager: Arc<SessionManager>,
    bus: Arc<MessageBus>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
    bus_handle: Mutex<Option<BusHandle>>,
    swarms: Mutex<HashMap<Uuid, SwarmHandle>>,
    closed: AtomicBool,
}

impl Coordinator {
    /// Open (or fall back for) the store and wire up the shared services.
    pub async fn new(config: HiveConfig) -> Self {
        let store = open_store(&config.database.path).await;
        Self::with_store(config, store)
    }

    /// Build against an explicit store (tests, in-memory hosts).
    pub fn with_store(config: HiveConfig, store: Arc<dyn Store>) -> Self {
        let events = Arc::new(EventBus::default());
        let memory = Arc::new(CollectiveMemory::new(
            Arc::clone(&store),
            config.memory.clone(),
            Arc::clone(&events),
        ));
        let session_manager = Arc::new(SessionManager::new(
            Arc::clone(&store),
            config.sessions_dir(),
            config.archive_dir(),
            Arc::clone(&events),
        ));
        let bus = Arc::new(MessageBus::new(
            config.messaging.clone(),
            Arc::clone(&events),
        ));

        Self {
            config,
            store,
            events,
            memory,
            session_manager,
            bus,
            maintenance: Mutex::new(None),
            bus_handle: Mutex::new(None),
            swarms: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Start background maintenance (memory flush/GC, bus drain,
    /// heartbeats). Idempotent.
    pub async fn start(&self) {
        let mut maintenance = self.maintenance.lock().await;
        if maintenance.is_none() {
            *maintenance = Some(Arc::clone(&self.memory).start_maintenance());
        }
        let mut bus_handle = self.bus_handle.lock().await;
        if bus_handle.is_none() {
            *bus_handle = Some(Arc::clone(&self.bus).start());
        }
    }

    /// Create the working directory layout and a default `config.json`.
    /// One-time; an existing config is left untouched.
    pub fn init_workspace(config: &HiveConfig) -> anyhow::Result<bool> {
        std::fs::create_dir_all(config.sessions_dir())?;
        std::fs::create_dir_all(config.archive_dir())?;
        let config_path = std::path::Path::new(&config.data_dir).join("config.json");
        if config_path.exists() {
            return Ok(false);
        }
        std::fs::write(&config_path, serde_json::to_string_pretty(config)?)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Spawn
    // ------------------------------------------------------------------

    /// Analyze the objective, create the swarm with its queen and workers,
    /// open a session, and attach the auto-save middleware.
    pub async fn spawn(
        &self,
        objective: &str,
        runner: Arc<dyn WorkerRunner>,
        options: SpawnOptions,
    ) -> anyhow::Result<SpawnOutcome> {
        let queen_type = options.queen_type.unwrap_or(self.config.queen_type);
        let queen = Arc::new(QueenCoordinator::new(queen_type));

        let analysis = queen.analyze(objective);
        let plan = queen.create_plan(&analysis);

        let max_workers = options.max_workers.unwrap_or(self.config.max_workers);
        let core_config = SwarmCoreConfig {
            max_workers,
            ..SwarmCoreConfig::from_hive(&self.config)
        };

        let core = SwarmCore::new(
            Arc::clone(&self.store),
            Arc::clone(&self.memory),
            Arc::clone(&self.events),
            runner,
            Arc::clone(&queen),
            core_config,
        );
        let swarm = core.initialize(objective).await?;

        let worker_types: Vec<WorkerType> = if options.worker_types.is_empty() {
            let optimal = analysis.resource_requirements.optimal_workers.max(1);
            analysis
                .required_capabilities
                .iter()
                .cycle()
                .take(optimal.min(max_workers.max(1)))
                .copied()
                .collect()
        } else {
            options.worker_types
        };
        let workers = if max_workers == 0 {
            Vec::new()
        } else {
            core.spawn_workers(&worker_types).await?
        };

        let session = self
            .session_manager
            .create_session(
                swarm.id,
                &swarm.name,
                objective,
                json!({ "queen_type": queen_type.as_str(), "strategy": plan.strategy.as_str() }),
            )
            .await?;

        let autosave = AutoSaveMiddleware::new(
            session.id,
            Arc::clone(&self.store),
            Arc::clone(&self.session_manager),
            self.config.autosave.clone(),
        );
        autosave.attach_events(&self.events).await;
        if !options.non_interactive {
            autosave.install_signal_handlers();
        }

        let consensus = Arc::new(ConsensusEngine::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            Arc::clone(&self.memory),
            Arc::clone(&self.events),
            self.config.consensus.clone(),
        ));

        self.swarms.lock().await.insert(
            swarm.id,
            SwarmHandle {
                core,
                consensus,
                autosave,
                session_id: session.id,
            },
        );

        Ok(SpawnOutcome {
            swarm_id: swarm.id,
            session_id: session.id,
            analysis,
            plan,
            workers_spawned: workers.len(),
        })
    }

    /// The live swarm core for a swarm spawned in this process.
    pub async fn swarm_core(&self, swarm_id: Uuid) -> Option<Arc<SwarmCore>> {
        self.swarms
            .lock()
            .await
            .get(&swarm_id)
            .map(|h| Arc::clone(&h.core))
    }

    /// The consensus engine for a swarm spawned in this process.
    pub async fn consensus_engine(&self, swarm_id: Uuid) -> Option<Arc<ConsensusEngine>> {
        self.swarms
            .lock()
            .await
            .get(&swarm_id)
            .map(|h| Arc::clone(&h.consensus))
    }

    // ------------------------------------------------------------------
    // Session lifecycle passthrough
    // ------------------------------------------------------------------

    pub async fn pause(&self, session_id: Uuid) -> anyhow::Result<Session> {
        Ok(self.session_manager.pause_session(session_id).await?)
    }

    pub async fn resume(&self, session_id: Uuid) -> anyhow::Result<Session> {
        Ok(self.session_manager.resume_session(session_id).await?)
    }

    pub async fn stop(&self, session_id: Uuid) -> anyhow::Result<Session> {
        // Flush whatever the middleware buffered before stopping.
        let autosave = {
            let swarms = self.swarms.lock().await;
            swarms
                .values()
                .find(|h| h.session_id == session_id)
                .map(|h| Arc::clone(&h.autosave))
        };
        if let Some(autosave) = autosave {
            autosave.stop_timer().await;
            if let Err(e) = autosave.flush("auto-stop").await {
                tracing::warn!(error = %e, "flush before stop failed");
            }
        }
        Ok(self.session_manager.stop_session(session_id).await?)
    }

    /// Non-terminal sessions with live child-PID info.
    pub async fn sessions(&self) -> anyhow::Result<Vec<SessionProcessInfo>> {
        Ok(self.session_manager.active_sessions_with_process_info().await?)
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    /// Per-swarm agent/task counts with recomputed completion percentages.
    pub async fn status(&self) -> anyhow::Result<Vec<SwarmStatusReport>> {
        let mut reports = Vec::new();
        for swarm in self.store.list_swarms().await? {
            reports.push(self.swarm_status(&swarm).await?);
        }
        Ok(reports)
    }

    async fn swarm_status(&self, swarm: &Swarm) -> anyhow::Result<SwarmStatusReport> {
        let agents = self.store.list_agents(swarm.id).await?;
        let tasks = self.store.list_tasks(swarm.id, None).await?;

        let count_status =
            |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let tasks_completed = count_status(TaskStatus::Completed);

        Ok(SwarmStatusReport {
            swarm_id: swarm.id,
            name: swarm.name.clone(),
            objective: swarm.objective.clone(),
            status: swarm.status.as_str().to_string(),
            agents_total: agents.len(),
            agents_idle: agents
                .iter()
                .filter(|a| a.status == crate::domain::models::AgentStatus::Idle)
                .count(),
            agents_busy: agents
                .iter()
                .filter(|a| a.status == crate::domain::models::AgentStatus::Busy)
                .count(),
            tasks_total: tasks.len(),
            tasks_pending: count_status(TaskStatus::Pending),
            tasks_completed,
            tasks_failed: count_status(TaskStatus::Failed),
            completion_percentage: if tasks.is_empty() {
                0.0
            } else {
                (tasks_completed as f64 / tasks.len() as f64 * 100.0).round()
            },
        })
    }

    /// Per-swarm throughput and success rates, durable counts first, live
    /// metrics where this process runs the swarm.
    pub async fn metrics(&self) -> anyhow::Result<Vec<SwarmMetricsReport>> {
        let mut reports = Vec::new();
        for swarm in self.store.list_swarms().await? {
            let tasks = self.store.list_tasks(swarm.id, None).await?;
            let agents = self.store.list_agents(swarm.id).await?;
            let workers: Vec<_> = agents
                .iter()
                .filter(|a| a.role == AgentRole::Worker)
                .collect();

            let live: Option<SwarmMetrics> = match self.swarm_core(swarm.id).await {
                Some(core) => core.metrics().await.ok(),
                None => None,
            };

            reports.push(SwarmMetricsReport {
                swarm_id: swarm.id,
                name: swarm.name.clone(),
                tasks_total: tasks.len(),
                tasks_completed: tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Completed)
                    .count(),
                tasks_failed: tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Failed)
                    .count(),
                success_rate: if workers.is_empty() {
                    0.0
                } else {
                    workers
                        .iter()
                        .map(|a| a.performance.success_rate)
                        .sum::<f64>()
                        / workers.len() as f64
                },
                throughput_per_minute: live.map_or(0.0, |m| m.throughput_per_minute),
            });
        }
        Ok(reports)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn memory(&self) -> &Arc<CollectiveMemory> {
        &self.memory
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Deterministic, idempotent teardown: stop background tasks, flush
    /// memory, close the store.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.stop();
        }
        if let Some(handle) = self.bus_handle.lock().await.take() {
            handle.stop();
        }
        {
            let swarms = self.swarms.lock().await;
            for handle in swarms.values() {
                handle.autosave.stop_timer().await;
            }
        }
        if let Err(e) = self.memory.flush().await {
            tracing::warn!(error = %e, "memory flush during shutdown failed");
        }
        self.store.close().await;
        tracing::info!("coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionStatus;
    use crate::domain::ports::EchoRunner;
    use crate::infrastructure::database::InMemoryStore;

    fn test_config(dir: &tempfile::TempDir) -> HiveConfig {
        HiveConfig {
            data_dir: dir.path().join(".hive-mind").to_string_lossy().to_string(),
            max_workers: 4,
            ..HiveConfig::default()
        }
    }

    async fn coordinator() -> (Coordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        let coordinator =
            Coordinator::with_store(config, Arc::new(InMemoryStore::new()));
        (coordinator, dir)
    }

    #[tokio::test]
    async fn test_spawn_creates_swarm_session_and_workers() {
        let (coordinator, _dir) = coordinator().await;
        let outcome = coordinator
            .spawn(
                "Build REST API",
                Arc::new(EchoRunner),
                SpawnOptions {
                    worker_types: vec![
                        WorkerType::Coder,
                        WorkerType::Tester,
                        WorkerType::Architect,
                        WorkerType::Reviewer,
                    ],
                    non_interactive: true,
                    ..SpawnOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.workers_spawned, 4);

        let swarm = coordinator
            .store()
            .get_swarm(outcome.swarm_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(swarm.objective, "Build REST API");

        let session = coordinator
            .store()
            .get_session(outcome.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.swarm_id, outcome.swarm_id);

        // Exactly one queen.
        let agents = coordinator.store().list_agents(outcome.swarm_id).await.unwrap();
        assert_eq!(
            agents.iter().filter(|a| a.role == AgentRole::Queen).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_spawn_derives_workers_from_analysis() {
        let (coordinator, _dir) = coordinator().await;
        let outcome = coordinator
            .spawn(
                "Build REST API with database",
                Arc::new(EchoRunner),
                SpawnOptions {
                    non_interactive: true,
                    ..SpawnOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.workers_spawned > 0);
        assert!(outcome.workers_spawned <= 4);
    }

    #[tokio::test]
    async fn test_status_aggregates_counts() {
        let (coordinator, _dir) = coordinator().await;
        let outcome = coordinator
            .spawn(
                "Build things",
                Arc::new(EchoRunner),
                SpawnOptions {
                    worker_types: vec![WorkerType::Coder],
                    non_interactive: true,
                    ..SpawnOptions::default()
                },
            )
            .await
            .unwrap();

        let reports = coordinator.status().await.unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.swarm_id, outcome.swarm_id);
        assert_eq!(report.agents_total, 2); // queen + coder
        assert_eq!(report.tasks_total, 0);
        assert!((report.completion_percentage - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_pause_resume_stop_round_trip() {
        let (coordinator, _dir) = coordinator().await;
        let outcome = coordinator
            .spawn(
                "Lifecycle",
                Arc::new(EchoRunner),
                SpawnOptions {
                    non_interactive: true,
                    ..SpawnOptions::default()
                },
            )
            .await
            .unwrap();

        let paused = coordinator.pause(outcome.session_id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        let resumed = coordinator.resume(outcome.session_id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert!(resumed.resumed_at.is_some());

        let stopped = coordinator.stop(outcome.session_id).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);

        // No live sessions remain.
        let sessions = coordinator.sessions().await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (coordinator, _dir) = coordinator().await;
        coordinator.start().await;
        coordinator.shutdown().await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_workspace_writes_config_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);

        assert!(Coordinator::init_workspace(&config).unwrap());
        let path = std::path::Path::new(&config.data_dir).join("config.json");
        assert!(path.exists());

        // Second init leaves the existing config alone.
        assert!(!Coordinator::init_workspace(&config).unwrap());
    }
}
