//! Swarm core: the live worker roster, task queue, and assignment policy.
//!
//! Assignment is opportunistic, never reserved: a task stays pending until a
//! worker is actually bound. Worker selection scores idle candidates on
//! keyword match, performance, and completion history, weighted per type,
//! with a short-lived best-type cache kept in collective memory so hints
//! survive restarts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::error::TaskError;
use crate::domain::models::{Agent, AgentStatus, MemoryType, Swarm, Task, TaskStatus, WorkerType};
use crate::domain::ports::{Store, WorkerRunner};

use super::collective_memory::CollectiveMemory;
use super::events::{EventBus, HiveEvent};
use super::queen::QueenCoordinator;

/// Maximum workers spawned per batch to bound peak cost.
const SPAWN_CHUNK: usize = 5;
/// Retries allowed for recoverable failures.
const MAX_TASK_RETRIES: u32 = 2;
/// Worker-match cache freshness window.
const MATCH_CACHE_SECS: i64 = 300;

/// Tuning knobs for the swarm core.
#[derive(Debug, Clone)]
pub struct SwarmCoreConfig {
    pub max_workers: usize,
    pub task_timeout: std::time::Duration,
    pub retry_delay: std::time::Duration,
}

impl Default for SwarmCoreConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            task_timeout: std::time::Duration::from_secs(30 * 60),
            retry_delay: std::time::Duration::from_secs(5),
        }
    }
}

impl SwarmCoreConfig {
    /// Derive from the root configuration record.
    pub fn from_hive(config: &crate::domain::models::HiveConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            task_timeout: std::time::Duration::from_secs(config.task_timeout_minutes * 60),
            retry_delay: std::time::Duration::from_secs(5),
        }
    }
}

/// Aggregate swarm metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SwarmMetrics {
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_task_time_ms: f64,
    /// Mean worker success rate, as a percentage.
    pub worker_efficiency: f64,
    pub throughput_per_minute: f64,
}

#[derive(Default)]
struct MetricsState {
    tasks_created: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    total_task_time_ms: f64,
    first_completion: Option<chrono::DateTime<Utc>>,
    last_completion: Option<chrono::DateTime<Utc>>,
}

/// The live coordinator of one swarm's workers and tasks.
pub struct SwarmCore {
    store: Arc<dyn Store>,
    memory: Arc<CollectiveMemory>,
    events: Arc<EventBus>,
    runner: Arc<dyn WorkerRunner>,
    queen: Arc<QueenCoordinator>,
    config: SwarmCoreConfig,
    swarm_id: RwLock<Option<Uuid>>,
    metrics: Mutex<MetricsState>,
    /// Self-handle for spawning background work from `&self` methods.
    me: std::sync::Weak<SwarmCore>,
}

impl SwarmCore {
    pub fn new(
        store: Arc<dyn Store>,
        memory: Arc<CollectiveMemory>,
        events: Arc<EventBus>,
        runner: Arc<dyn WorkerRunner>,
        queen: Arc<QueenCoordinator>,
        config: SwarmCoreConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            memory,
            events,
            runner,
            queen,
            config,
            swarm_id: RwLock::new(None),
            metrics: Mutex::new(MetricsState::default()),
            me: me.clone(),
        })
    }

    /// The swarm this core coordinates. Errors before `initialize`.
    pub async fn swarm_id(&self) -> Result<Uuid, TaskError> {
        (*self.swarm_id.read().await)
            .ok_or_else(|| TaskError::Fatal("swarm core not initialized".to_string()))
    }

    // ------------------------------------------------------------------
    // Initialization and spawning
    // ------------------------------------------------------------------

    /// Create the swarm row and its queen, seed the memory namespace with
    /// the configuration, and mark the swarm active.
    pub async fn initialize(&self, objective: &str) -> anyhow::Result<Swarm> {
        let swarm = Swarm::new(objective, self.queen.queen_type());
        self.store.create_swarm(&swarm).await?;

        let queen_agent = Agent::queen(swarm.id);
        self.store.create_agent(&queen_agent).await?;

        let namespace = swarm.id.to_string();
        self.memory
            .store(
                &namespace,
                "config",
                &json!({
                    "objective": objective,
                    "queen_type": self.queen.queen_type().as_str(),
                    "max_workers": self.config.max_workers,
                }),
                MemoryType::System,
                "queen",
            )
            .await?;
        self.memory
            .store(&namespace, "status", &json!("active"), MemoryType::System, "queen")
            .await?;

        *self.swarm_id.write().await = Some(swarm.id);
        tracing::info!(swarm_id = %swarm.id, objective, "swarm initialized");
        Ok(swarm)
    }

    /// Spawn workers of the given types, chunked to bound peak cost. Spawning
    /// stops silently at the worker cap.
    pub async fn spawn_workers(&self, types: &[WorkerType]) -> anyhow::Result<Vec<Agent>> {
        let swarm_id = self.swarm_id().await?;
        let existing = self.worker_count(swarm_id).await?;
        let namespace = swarm_id.to_string();

        let mut spawned = Vec::new();
        for (batch_index, chunk) in types.chunks(SPAWN_CHUNK).enumerate() {
            for worker_type in chunk {
                if existing + spawned.len() >= self.config.max_workers {
                    tracing::warn!(
                        max_workers = self.config.max_workers,
                        "worker cap reached, remaining spawns skipped"
                    );
                    return Ok(spawned);
                }
                let agent = Agent::worker(swarm_id, *worker_type, existing + spawned.len());
                self.store.create_agent(&agent).await?;
                self.events.publish(HiveEvent::WorkerSpawned {
                    agent_id: agent.id,
                    swarm_id,
                    worker_type: worker_type.as_str().to_string(),
                });
                tracing::info!(agent_id = %agent.id, worker_type = worker_type.as_str(), "worker_spawned");
                spawned.push(agent);
            }
            self.memory
                .store(
                    &namespace,
                    &format!("worker_spawn_batch_{batch_index}"),
                    &json!({ "batch": batch_index, "count": chunk.len() }),
                    MemoryType::Metric,
                    "swarm",
                )
                .await?;
        }
        Ok(spawned)
    }

    async fn worker_count(&self, swarm_id: Uuid) -> anyhow::Result<usize> {
        let agents = self.store.list_agents(swarm_id).await?;
        Ok(agents
            .iter()
            .filter(|a| a.role == crate::domain::models::AgentRole::Worker)
            .count())
    }

    // ------------------------------------------------------------------
    // Task creation
    // ------------------------------------------------------------------

    /// Create a pending task, then opportunistically autoscale and dispatch
    /// in the background.
    pub async fn create_task(
        &self,
        description: &str,
        priority: u8,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Task> {
        let swarm_id = self.swarm_id().await?;
        let task = Task::new(swarm_id, description, priority).with_extra(extra);
        self.store.create_task(&task).await?;

        self.metrics.lock().await.tasks_created += 1;
        self.events.publish(HiveEvent::TaskCreated {
            task_id: task.id,
            swarm_id,
            priority: task.priority,
        });

        if let Some(core) = self.me.upgrade() {
            tokio::spawn(async move {
                if let Err(e) = core.autoscale().await {
                    tracing::warn!(error = %e, "autoscale check failed");
                }
                if let Err(e) = core.dispatch_pending().await {
                    tracing::warn!(error = %e, "dispatch after task creation failed");
                }
            });
        }

        Ok(task)
    }

    // ------------------------------------------------------------------
    // Worker selection
    // ------------------------------------------------------------------

    /// Pick the best idle worker for a task, or `None` when all are busy.
    ///
    /// Consults the 5-minute best-type cache first, then scores every idle
    /// candidate as `(keyword*2 + performance*1.5 + completion*1.0) *
    /// type_weight`, breaking ties toward the lowest index.
    pub async fn find_best_worker(&self, task: &Task) -> anyhow::Result<Option<Agent>> {
        let swarm_id = self.swarm_id().await?;
        let agents = self.store.list_agents(swarm_id).await?;
        let candidates: Vec<&Agent> = agents.iter().filter(|a| a.is_available()).collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let namespace = swarm_id.to_string();
        let cache_key = match_cache_key(&task.description);

        if let Some(cached) = self.memory.retrieve(&namespace, &cache_key).await? {
            let fresh = cached["cached_at"]
                .as_i64()
                .is_some_and(|at| Utc::now().timestamp_millis() - at <= MATCH_CACHE_SECS * 1000);
            if fresh {
                if let Some(preferred) = cached["worker_type"]
                    .as_str()
                    .and_then(WorkerType::from_str)
                {
                    if let Some(agent) =
                        candidates.iter().find(|a| a.worker_type == preferred)
                    {
                        return Ok(Some((*agent).clone()));
                    }
                }
            }
        }

        let description = task.description.to_lowercase();
        let tokens: Vec<&str> = description
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut best: Option<(&Agent, f64)> = None;
        for agent in &candidates {
            let keyword_score = agent
                .worker_type
                .keywords()
                .iter()
                .filter(|k| tokens.contains(*k))
                .count() as f64;
            let performance_score = if agent.tasks_attempted == 0 {
                0.5
            } else {
                0.5 * agent.performance.success_rate
                    + 0.5 * (1.0 / (agent.performance.avg_task_time_ms + 1.0))
            };
            let completion_score = (agent.tasks_completed as f64 / 10.0).min(1.0);
            let score = (keyword_score * 2.0 + performance_score * 1.5 + completion_score)
                * agent.worker_type.type_weight();

            // Strict comparison keeps the lowest-index candidate on ties.
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((agent, score));
            }
        }

        let chosen = best.map(|(agent, _)| (*agent).clone());
        if let Some(agent) = &chosen {
            self.memory
                .store(
                    &namespace,
                    &cache_key,
                    &json!({
                        "worker_type": agent.worker_type.as_str(),
                        "cached_at": Utc::now().timestamp_millis(),
                    }),
                    MemoryType::Task,
                    "swarm",
                )
                .await?;
        }
        Ok(chosen)
    }

    // ------------------------------------------------------------------
    // Dispatch and execution
    // ------------------------------------------------------------------

    /// Bind pending tasks to idle workers until one side runs out. Each
    /// bound task executes on a background tokio task.
    pub async fn dispatch_pending(&self) -> anyhow::Result<usize> {
        let swarm_id = self.swarm_id().await?;
        let pending = self.store.list_tasks(swarm_id, Some(TaskStatus::Pending)).await?;

        let mut dispatched = 0;
        for task in pending {
            let Some(worker) = self.find_best_worker(&task).await? else {
                break;
            };
            self.assign_and_execute(task, worker).await?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Bind one task to one worker and start execution. Intermediate states
    /// persist before the next transition is announced.
    ///
    /// Returns a boxed future (rather than `async fn`) to break the opaque
    /// hidden-type cycle created by the mutual recursion through
    /// `dispatch_pending` -> `assign_and_execute` -> (spawned)
    /// `execute_bound_task` -> `handle_failure` -> (spawned)
    /// `dispatch_pending`.
    fn assign_and_execute<'a>(
        &'a self,
        mut task: Task,
        mut worker: Agent,
    ) -> futures::future::BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let swarm_id = task.swarm_id;

            task.assigned_agent_id = Some(worker.id);
            task.transition_to(TaskStatus::Assigned)
                .map_err(TaskError::Fatal)?;
            self.store.update_task(&task).await?;

            worker.status = AgentStatus::Busy;
            worker.current_task_id = Some(task.id);
            self.store.update_agent(&worker).await?;

            self.events.publish(HiveEvent::TaskAssigned {
                task_id: task.id,
                agent_id: worker.id,
            });

            task.transition_to(TaskStatus::InProgress)
                .map_err(TaskError::Fatal)?;
            self.store.update_task(&task).await?;

            self.memory
                .store(
                    &swarm_id.to_string(),
                    &format!("task_assignment_{}", task.id),
                    &json!({ "task": task.id, "agent": worker.id }),
                    MemoryType::Task,
                    "swarm",
                )
                .await?;

            match self.me.upgrade() {
                Some(core) => {
                    tokio::spawn(async move {
                        core.execute_bound_task(task, worker).await;
                    });
                }
                None => {
                    tracing::warn!(task_id = %task.id, "core dropped before execution could start");
                }
            }
            Ok(())
        })
    }

    /// Run the opaque worker runner with the configured timeout and fold the
    /// outcome back into task, worker, metrics, and memory.
    async fn execute_bound_task(self: Arc<Self>, task: Task, worker: Agent) {
        let started = std::time::Instant::now();
        let outcome =
            match tokio::time::timeout(self.config.task_timeout, self.runner.execute(&task)).await
            {
                Ok(result) => result,
                Err(_) => Err(TaskError::Timeout),
            };

        let result = match outcome {
            Ok(output) => self.handle_success(task, worker, output).await,
            Err(error) => self.handle_failure(task, worker, &error).await,
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "task completion bookkeeping failed");
        }
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "worker execution settled");
    }

    async fn handle_success(
        &self,
        mut task: Task,
        mut worker: Agent,
        output: crate::domain::ports::WorkerOutput,
    ) -> anyhow::Result<()> {
        task.result = Some(output.result.clone());
        task.transition_to(TaskStatus::Completed)
            .map_err(TaskError::Fatal)?;
        self.store.update_task(&task).await?;

        worker.tasks_completed += 1;
        worker.tasks_attempted += 1;
        worker
            .performance
            .record_completion(output.processing_time_ms as f64, worker.tasks_completed);
        worker
            .performance
            .record_outcome(true, worker.tasks_attempted);
        worker.status = AgentStatus::Idle;
        worker.current_task_id = None;
        self.store.update_agent(&worker).await?;

        self.memory
            .store(
                &task.swarm_id.to_string(),
                &format!("task_result_{}", task.id),
                &output.result,
                MemoryType::Result,
                &worker.name,
            )
            .await?;

        {
            let mut metrics = self.metrics.lock().await;
            metrics.tasks_completed += 1;
            metrics.total_task_time_ms += output.processing_time_ms as f64;
            let now = Utc::now();
            if metrics.first_completion.is_none() {
                metrics.first_completion = Some(now);
            }
            metrics.last_completion = Some(now);
        }

        self.events.publish(HiveEvent::TaskCompleted {
            task_id: task.id,
            agent_id: worker.id,
            duration_ms: output.processing_time_ms,
        });
        self.events.publish(HiveEvent::WorkerIdle { agent_id: worker.id });
        Ok(())
    }

    async fn handle_failure(
        &self,
        mut task: Task,
        mut worker: Agent,
        error: &TaskError,
    ) -> anyhow::Result<()> {
        worker.tasks_attempted += 1;
        worker
            .performance
            .record_outcome(false, worker.tasks_attempted);
        worker.status = AgentStatus::Idle;
        worker.current_task_id = None;
        self.store.update_agent(&worker).await?;

        let will_retry = task.retry_count < MAX_TASK_RETRIES && error.is_recoverable();

        if will_retry {
            task.retry_count += 1;
            task.error = Some(error.to_string());
            task.transition_to(TaskStatus::Pending)
                .map_err(TaskError::Fatal)?;
            self.store.update_task(&task).await?;

            self.events.publish(HiveEvent::TaskFailed {
                task_id: task.id,
                error: error.to_string(),
                retry_count: task.retry_count,
                will_retry: true,
            });

            if let Some(core) = self.me.upgrade() {
                let delay = self.config.retry_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = core.dispatch_pending().await {
                        tracing::warn!(error = %e, "retry dispatch failed");
                    }
                });
            }
        } else {
            task.error = Some(error.to_string());
            task.transition_to(TaskStatus::Failed)
                .map_err(TaskError::Fatal)?;
            self.store.update_task(&task).await?;

            self.metrics.lock().await.tasks_failed += 1;
            self.events.publish(HiveEvent::TaskFailed {
                task_id: task.id,
                error: error.to_string(),
                retry_count: task.retry_count,
                will_retry: false,
            });
        }

        self.events.publish(HiveEvent::WorkerIdle { agent_id: worker.id });

        // The now-idle worker may unblock the next pending task.
        if let Some(core) = self.me.upgrade() {
            tokio::spawn(async move {
                if let Err(e) = core.dispatch_pending().await {
                    tracing::warn!(error = %e, "post-failure dispatch failed");
                }
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Autoscale
    // ------------------------------------------------------------------

    /// Spawn one extra worker when queue pressure exceeds twice the idle
    /// pool, choosing the type most demanded by pending descriptions.
    pub async fn autoscale(&self) -> anyhow::Result<Option<Agent>> {
        let swarm_id = self.swarm_id().await?;
        let pending = self
            .store
            .list_tasks(swarm_id, Some(TaskStatus::Pending))
            .await?;
        let agents = self.store.list_agents(swarm_id).await?;
        let workers: Vec<&Agent> = agents
            .iter()
            .filter(|a| a.role == crate::domain::models::AgentRole::Worker)
            .collect();
        let idle = workers.iter().filter(|a| a.is_available()).count();

        if pending.len() <= 2 * idle || workers.len() >= self.config.max_workers {
            return Ok(None);
        }

        let mut demand: HashMap<WorkerType, usize> = HashMap::new();
        for task in &pending {
            let lower = task.description.to_lowercase();
            for worker_type in WorkerType::all() {
                let hits = worker_type
                    .keywords()
                    .iter()
                    .filter(|k| lower.contains(*k))
                    .count();
                if hits > 0 {
                    *demand.entry(*worker_type).or_insert(0) += hits;
                }
            }
        }
        let chosen = demand
            .into_iter()
            .max_by_key(|(_, hits)| *hits)
            .map_or(WorkerType::Coder, |(t, _)| t);

        let spawned = self.spawn_workers(&[chosen]).await?;
        Ok(spawned.into_iter().next())
    }

    // ------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------

    pub async fn metrics(&self) -> anyhow::Result<SwarmMetrics> {
        let state = self.metrics.lock().await;

        let average_task_time_ms = if state.tasks_completed > 0 {
            state.total_task_time_ms / state.tasks_completed as f64
        } else {
            0.0
        };

        let throughput_per_minute = match (state.first_completion, state.last_completion) {
            (Some(first), Some(last)) if state.tasks_completed >= 2 && last > first => {
                let minutes = (last - first).num_milliseconds() as f64 / 60_000.0;
                if minutes > 0.0 {
                    state.tasks_completed as f64 / minutes
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let worker_efficiency = match self.swarm_id().await {
            Ok(swarm_id) => {
                let agents = self.store.list_agents(swarm_id).await?;
                let workers: Vec<&Agent> = agents
                    .iter()
                    .filter(|a| a.role == crate::domain::models::AgentRole::Worker)
                    .collect();
                if workers.is_empty() {
                    0.0
                } else {
                    workers
                        .iter()
                        .map(|a| a.performance.success_rate)
                        .sum::<f64>()
                        / workers.len() as f64
                        * 100.0
                }
            }
            Err(_) => 0.0,
        };

        Ok(SwarmMetrics {
            tasks_created: state.tasks_created,
            tasks_completed: state.tasks_completed,
            tasks_failed: state.tasks_failed,
            average_task_time_ms,
            worker_efficiency,
            throughput_per_minute,
        })
    }
}

/// Cache key for the worker-match hint: the first 50 characters of the
/// description.
fn match_cache_key(description: &str) -> String {
    let prefix: String = description.chars().take(50).collect();
    format!("worker_match_{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MemoryConfig, QueenType};
    use crate::domain::ports::{EchoRunner, WorkerOutput};
    use crate::infrastructure::database::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn build_core(runner: Arc<dyn WorkerRunner>, config: SwarmCoreConfig) -> Arc<SwarmCore> {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let events = Arc::new(EventBus::default());
        let memory = Arc::new(CollectiveMemory::new(
            Arc::clone(&store),
            MemoryConfig::default(),
            Arc::clone(&events),
        ));
        SwarmCore::new(
            store,
            memory,
            events,
            runner,
            Arc::new(QueenCoordinator::new(QueenType::Strategic)),
            config,
        )
    }

    fn echo_core() -> Arc<SwarmCore> {
        build_core(Arc::new(EchoRunner), SwarmCoreConfig {
            retry_delay: std::time::Duration::from_millis(20),
            ..SwarmCoreConfig::default()
        })
    }

    async fn wait_for_terminal(core: &Arc<SwarmCore>, task_id: Uuid) -> Task {
        for _ in 0..200 {
            let task = core.store.get_task(task_id).await.unwrap().unwrap();
            if task.is_terminal() {
                return task;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached a terminal state");
    }

    /// Bookkeeping (agent row, metrics) lands shortly after the terminal
    /// task persist; wait for the whole swarm to settle before asserting.
    /// Metrics are updated after the agent row, so the attempt count below
    /// implies the agent writes are visible too.
    async fn wait_for_settled(core: &Arc<SwarmCore>, expected_attempts: u64) {
        let swarm_id = core.swarm_id().await.unwrap();
        for _ in 0..200 {
            let agents = core.store.list_agents(swarm_id).await.unwrap();
            let attempts: u64 = agents.iter().map(|a| a.tasks_attempted).sum();
            let all_free = agents.iter().all(|a| a.status != AgentStatus::Busy);
            let metrics = core.metrics().await.unwrap();
            let settled_metrics =
                metrics.tasks_completed + metrics.tasks_failed >= expected_attempts.min(1);
            if all_free && attempts >= expected_attempts && settled_metrics {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("swarm never settled");
    }

    #[tokio::test]
    async fn test_initialize_creates_swarm_queen_and_memory() {
        let core = echo_core();
        let swarm = core.initialize("Build REST API").await.unwrap();

        let agents = core.store.list_agents(swarm.id).await.unwrap();
        let queens: Vec<&Agent> = agents
            .iter()
            .filter(|a| a.role == crate::domain::models::AgentRole::Queen)
            .collect();
        assert_eq!(queens.len(), 1);

        let config = core
            .memory
            .retrieve(&swarm.id.to_string(), "config")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config["objective"], "Build REST API");
        let status = core
            .memory
            .retrieve(&swarm.id.to_string(), "status")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, serde_json::json!("active"));
    }

    #[tokio::test]
    async fn test_spawn_workers_respects_cap() {
        let core = build_core(
            Arc::new(EchoRunner),
            SwarmCoreConfig {
                max_workers: 2,
                ..SwarmCoreConfig::default()
            },
        );
        core.initialize("objective").await.unwrap();

        let spawned = core
            .spawn_workers(&[WorkerType::Coder, WorkerType::Tester, WorkerType::Analyst])
            .await
            .unwrap();
        assert_eq!(spawned.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_max_workers_leaves_tasks_pending() {
        let core = build_core(
            Arc::new(EchoRunner),
            SwarmCoreConfig {
                max_workers: 0,
                ..SwarmCoreConfig::default()
            },
        );
        core.initialize("objective").await.unwrap();

        let spawned = core.spawn_workers(&[WorkerType::Coder]).await.unwrap();
        assert!(spawned.is_empty());

        let task = core
            .create_task("implement the thing", 5, serde_json::Map::new())
            .await
            .unwrap();
        assert!(core.autoscale().await.unwrap().is_none());
        core.dispatch_pending().await.unwrap();

        let task = core.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_keyword_scoring_routes_by_specialty() {
        let core = echo_core();
        core.initialize("Build REST API").await.unwrap();
        core.spawn_workers(&[
            WorkerType::Coder,
            WorkerType::Tester,
            WorkerType::Architect,
            WorkerType::Reviewer,
        ])
        .await
        .unwrap();

        let swarm_id = core.swarm_id().await.unwrap();
        let design = Task::new(swarm_id, "Design API endpoints", 7);
        let implement = Task::new(swarm_id, "Implement business logic", 6);
        let test = Task::new(swarm_id, "Create API tests", 5);

        let worker = core.find_best_worker(&design).await.unwrap().unwrap();
        assert_eq!(worker.worker_type, WorkerType::Architect);
        let worker = core.find_best_worker(&implement).await.unwrap().unwrap();
        assert_eq!(worker.worker_type, WorkerType::Coder);
        let worker = core.find_best_worker(&test).await.unwrap().unwrap();
        assert_eq!(worker.worker_type, WorkerType::Tester);
    }

    #[tokio::test]
    async fn test_no_idle_workers_returns_none() {
        let core = echo_core();
        let swarm = core.initialize("objective").await.unwrap();
        // Queen only: she never takes tasks.
        let task = Task::new(swarm.id, "implement", 5);
        assert!(core.find_best_worker(&task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_happy_path_completion_updates_everything() {
        let core = echo_core();
        let swarm = core.initialize("Build REST API").await.unwrap();
        core.spawn_workers(&[WorkerType::Coder]).await.unwrap();

        let task = core
            .create_task("implement business logic", 6, serde_json::Map::new())
            .await
            .unwrap();
        let task = wait_for_terminal(&core, task.id).await;
        wait_for_settled(&core, 1).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.result.is_some());

        let agents = core.store.list_agents(swarm.id).await.unwrap();
        let worker = agents
            .iter()
            .find(|a| a.role == crate::domain::models::AgentRole::Worker)
            .unwrap();
        assert_eq!(worker.status, AgentStatus::Idle);
        assert!(worker.current_task_id.is_none());
        assert_eq!(worker.tasks_completed, 1);

        let result = core
            .memory
            .retrieve(&swarm.id.to_string(), &format!("task_result_{}", task.id))
            .await
            .unwrap();
        assert!(result.is_some());

        let metrics = core.metrics().await.unwrap();
        assert_eq!(metrics.tasks_completed, 1);
        assert_eq!(metrics.tasks_failed, 0);
    }

    /// Runner that fails with a recoverable error until `failures` runs out.
    struct FlakyRunner {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl WorkerRunner for FlakyRunner {
        async fn execute(&self, _task: &Task) -> Result<WorkerOutput, TaskError> {
            if self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(TaskError::Transient("network connection reset".to_string()))
            } else {
                Ok(WorkerOutput {
                    result: serde_json::json!({"ok": true}),
                    processing_time_ms: 5,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let core = build_core(
            Arc::new(FlakyRunner {
                remaining_failures: AtomicU32::new(1),
            }),
            SwarmCoreConfig {
                retry_delay: std::time::Duration::from_millis(20),
                ..SwarmCoreConfig::default()
            },
        );
        let swarm = core.initialize("objective").await.unwrap();
        core.spawn_workers(&[WorkerType::Coder]).await.unwrap();

        let task = core
            .create_task("implement the retry path", 6, serde_json::Map::new())
            .await
            .unwrap();
        let task = wait_for_terminal(&core, task.id).await;
        wait_for_settled(&core, 2).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);

        // The failure dented the success rate; the later success partially
        // recovered it.
        let agents = core.store.list_agents(swarm.id).await.unwrap();
        let worker = agents
            .iter()
            .find(|a| a.role == crate::domain::models::AgentRole::Worker)
            .unwrap();
        assert!(worker.performance.success_rate < 1.0);
        assert!(worker.performance.success_rate >= 0.5);
        assert_eq!(worker.tasks_attempted, 2);
        assert_eq!(worker.tasks_completed, 1);
    }

    struct AlwaysFailRunner;

    #[async_trait]
    impl WorkerRunner for AlwaysFailRunner {
        async fn execute(&self, _task: &Task) -> Result<WorkerOutput, TaskError> {
            Err(TaskError::Fatal("segfault in worker".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fatal_failure_is_permanent() {
        let core = build_core(
            Arc::new(AlwaysFailRunner),
            SwarmCoreConfig {
                retry_delay: std::time::Duration::from_millis(20),
                ..SwarmCoreConfig::default()
            },
        );
        core.initialize("objective").await.unwrap();
        core.spawn_workers(&[WorkerType::Coder]).await.unwrap();

        let task = core
            .create_task("implement the doomed path", 6, serde_json::Map::new())
            .await
            .unwrap();
        let task = wait_for_terminal(&core, task.id).await;
        wait_for_settled(&core, 1).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
        assert!(task.error.as_deref().unwrap().contains("segfault"));

        let metrics = core.metrics().await.unwrap();
        assert_eq!(metrics.tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_recoverable_failure_exhausts_retries() {
        let core = build_core(
            Arc::new(FlakyRunner {
                remaining_failures: AtomicU32::new(10),
            }),
            SwarmCoreConfig {
                retry_delay: std::time::Duration::from_millis(10),
                ..SwarmCoreConfig::default()
            },
        );
        core.initialize("objective").await.unwrap();
        core.spawn_workers(&[WorkerType::Coder]).await.unwrap();

        let task = core
            .create_task("implement flaky thing", 6, serde_json::Map::new())
            .await
            .unwrap();
        let task = wait_for_terminal(&core, task.id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, MAX_TASK_RETRIES);
        assert!(task.error.as_deref().unwrap().contains("network"));
    }

    #[tokio::test]
    async fn test_autoscale_spawns_demanded_type() {
        let core = build_core(
            Arc::new(EchoRunner),
            SwarmCoreConfig {
                max_workers: 4,
                ..SwarmCoreConfig::default()
            },
        );
        let swarm = core.initialize("objective").await.unwrap();
        // No workers yet: pending > 2*idle once a task lands.

        let task = Task::new(swarm.id, "test and validate the module", 5);
        core.store.create_task(&task).await.unwrap();

        let spawned = core.autoscale().await.unwrap().unwrap();
        assert_eq!(spawned.worker_type, WorkerType::Tester);
    }

    #[tokio::test]
    async fn test_autoscale_defaults_to_coder() {
        let core = echo_core();
        let swarm = core.initialize("objective").await.unwrap();
        let task = Task::new(swarm.id, "zzz qqq", 5);
        core.store.create_task(&task).await.unwrap();

        let spawned = core.autoscale().await.unwrap().unwrap();
        assert_eq!(spawned.worker_type, WorkerType::Coder);
    }

    #[tokio::test]
    async fn test_worker_match_cache_round_trip() {
        let core = echo_core();
        let swarm = core.initialize("objective").await.unwrap();
        core.spawn_workers(&[WorkerType::Tester]).await.unwrap();

        let task = Task::new(swarm.id, "test the cache", 5);
        core.find_best_worker(&task).await.unwrap().unwrap();

        let cached = core
            .memory
            .retrieve(&swarm.id.to_string(), &match_cache_key("test the cache"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached["worker_type"], "tester");

        // Cache hit picks the preferred type immediately.
        let worker = core.find_best_worker(&task).await.unwrap().unwrap();
        assert_eq!(worker.worker_type, WorkerType::Tester);
    }

    #[tokio::test]
    async fn test_throughput_requires_two_samples() {
        let core = echo_core();
        core.initialize("objective").await.unwrap();
        core.spawn_workers(&[WorkerType::Coder]).await.unwrap();

        let task = core
            .create_task("implement one thing", 5, serde_json::Map::new())
            .await
            .unwrap();
        wait_for_terminal(&core, task.id).await;
        wait_for_settled(&core, 1).await;

        let metrics = core.metrics().await.unwrap();
        assert_eq!(metrics.tasks_completed, 1);
        assert!((metrics.throughput_per_minute - 0.0).abs() < f64::EPSILON);
    }
}
