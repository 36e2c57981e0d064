//! Command handlers for the CLI surface.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::models::{ConsensusAlgo, HiveConfig, QueenType};
use crate::domain::ports::EchoRunner;
use crate::services::{Coordinator, SpawnOptions};

/// `init`: create the working directory, store, and default config.
pub async fn handle_init(config: &HiveConfig, force: bool, json_output: bool) -> Result<()> {
    if force {
        let path = std::path::Path::new(&config.data_dir).join("config.json");
        if path.exists() {
            std::fs::remove_file(&path).context("removing existing config")?;
        }
    }
    let created = Coordinator::init_workspace(config).context("initializing workspace")?;

    // Touch the database so a missing engine surfaces now, not at spawn.
    let coordinator = Coordinator::new(config.clone()).await;
    let persistent = coordinator.store().is_persistent();
    coordinator.shutdown().await;

    if json_output {
        println!(
            "{}",
            json!({ "created": created, "data_dir": config.data_dir, "persistent": persistent })
        );
    } else if created {
        println!("Initialized hive workspace at {}", config.data_dir);
    } else {
        println!("Hive workspace at {} already initialized", config.data_dir);
    }
    Ok(())
}

/// `spawn`: create a swarm + session for an objective.
#[allow(clippy::too_many_arguments)]
pub async fn handle_spawn(
    config: HiveConfig,
    objective: String,
    queen_type: Option<String>,
    max_workers: Option<usize>,
    consensus: Option<String>,
    non_interactive: bool,
    json_output: bool,
) -> Result<()> {
    if objective.trim().is_empty() {
        bail!("objective cannot be empty");
    }

    let queen_type = match queen_type {
        Some(raw) => Some(
            QueenType::from_str(&raw)
                .with_context(|| format!("invalid queen type: {raw}"))?,
        ),
        None => None,
    };

    let mut config = config;
    if let Some(raw) = consensus {
        config.consensus.algorithm = ConsensusAlgo::from_str(&raw)
            .with_context(|| format!("invalid consensus algorithm: {raw}"))?;
    }

    let coordinator = Coordinator::new(config).await;
    coordinator.start().await;

    let outcome = coordinator
        .spawn(
            &objective,
            Arc::new(EchoRunner),
            SpawnOptions {
                queen_type,
                max_workers,
                worker_types: Vec::new(),
                non_interactive,
            },
        )
        .await?;

    if json_output {
        println!(
            "{}",
            json!({
                "swarmId": outcome.swarm_id,
                "sessionId": outcome.session_id,
                "strategy": outcome.plan.strategy.as_str(),
                "complexity": outcome.analysis.complexity.as_str(),
                "estimatedTasks": outcome.analysis.estimated_tasks,
                "workersSpawned": outcome.workers_spawned,
            })
        );
    } else {
        println!("Swarm spawned");
        println!("  swarm:    {}", outcome.swarm_id);
        println!("  session:  {}", outcome.session_id);
        println!("  strategy: {}", outcome.plan.strategy.as_str());
        println!("  workers:  {}", outcome.workers_spawned);
    }

    coordinator.shutdown().await;
    Ok(())
}

/// `status`: aggregate per-swarm counts and completion.
pub async fn handle_status(config: HiveConfig, json_output: bool) -> Result<()> {
    let coordinator = Coordinator::new(config).await;
    let reports = coordinator.status().await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if reports.is_empty() {
        println!("No swarms.");
    } else {
        for report in &reports {
            println!(
                "{} [{}] agents {} ({} idle, {} busy) tasks {} ({} pending, {} completed, {} failed) {}%",
                report.name,
                report.status,
                report.agents_total,
                report.agents_idle,
                report.agents_busy,
                report.tasks_total,
                report.tasks_pending,
                report.tasks_completed,
                report.tasks_failed,
                report.completion_percentage,
            );
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// `sessions`: non-terminal sessions with live child counts.
pub async fn handle_sessions(config: HiveConfig, json_output: bool) -> Result<()> {
    let coordinator = Coordinator::new(config).await;
    let infos = coordinator.sessions().await?;

    if json_output {
        let rows: Vec<serde_json::Value> = infos
            .iter()
            .map(|info| {
                json!({
                    "sessionId": info.session.id,
                    "swarm": info.session.swarm_name,
                    "status": info.session.status.as_str(),
                    "liveChildren": info.live_children.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if infos.is_empty() {
        println!("No live sessions.");
    } else {
        for info in &infos {
            println!(
                "{} {} [{}] {} live children",
                info.session.id,
                info.session.swarm_name,
                info.session.status.as_str(),
                info.live_children.len(),
            );
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// `pause` / `resume` / `stop`.
pub async fn handle_transition(
    config: HiveConfig,
    session_id: &str,
    action: TransitionAction,
    json_output: bool,
) -> Result<()> {
    let session_id = Uuid::parse_str(session_id)
        .with_context(|| format!("invalid session id: {session_id}"))?;

    let coordinator = Coordinator::new(config).await;
    let session = match action {
        TransitionAction::Pause => coordinator.pause(session_id).await?,
        TransitionAction::Resume => coordinator.resume(session_id).await?,
        TransitionAction::Stop => coordinator.stop(session_id).await?,
    };

    if json_output {
        println!(
            "{}",
            json!({ "sessionId": session.id, "status": session.status.as_str() })
        );
    } else {
        println!("Session {} is now {}", session.id, session.status.as_str());
    }

    coordinator.shutdown().await;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum TransitionAction {
    Pause,
    Resume,
    Stop,
}

/// `metrics`: overall and per-swarm throughput and success rates.
pub async fn handle_metrics(config: HiveConfig, json_output: bool) -> Result<()> {
    let coordinator = Coordinator::new(config).await;
    let reports = coordinator.metrics().await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if reports.is_empty() {
        println!("No swarms.");
    } else {
        let total: usize = reports.iter().map(|r| r.tasks_total).sum();
        let completed: usize = reports.iter().map(|r| r.tasks_completed).sum();
        println!("Overall: {completed}/{total} tasks completed");
        for report in &reports {
            println!(
                "{}: {}/{} completed, {} failed, success rate {:.0}%",
                report.name,
                report.tasks_completed,
                report.tasks_total,
                report.tasks_failed,
                report.success_rate * 100.0,
            );
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
