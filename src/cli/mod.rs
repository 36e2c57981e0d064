//! Command-line surface of the coordinator.
//!
//! The CLI is a thin host over [`Coordinator`](crate::Coordinator): argument
//! parsing and output formatting live here, semantics live in the service
//! layer.

pub mod commands;

use clap::{Parser, Subcommand};

/// Hive-mind coordinator: spawn and supervise resumable agent swarms.
#[derive(Parser, Debug)]
#[command(name = "hivemind", version, about)]
pub struct Cli {
    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the .hive-mind directory, database, and default config
    Init {
        /// Recreate the default config even if one exists
        #[arg(long)]
        force: bool,
    },

    /// Spawn a swarm for an objective and open a session
    Spawn {
        /// The objective the swarm pursues
        objective: String,

        /// Queen coordination policy (strategic|tactical|adaptive)
        #[arg(long, value_name = "TYPE")]
        queen_type: Option<String>,

        /// Upper bound on workers
        #[arg(long, value_name = "N")]
        max_workers: Option<usize>,

        /// Consensus algorithm (majority|weighted|byzantine)
        #[arg(long, value_name = "ALGO")]
        consensus: Option<String>,

        /// Skip signal handlers and interactive behavior
        #[arg(long)]
        non_interactive: bool,
    },

    /// Aggregate per-swarm agent and task counts
    Status,

    /// List non-terminal sessions with live child process counts
    Sessions,

    /// Pause a session (and its swarm)
    Pause {
        /// Session id
        session_id: String,
    },

    /// Resume a paused or stopped session
    Resume {
        /// Session id
        session_id: String,
    },

    /// Stop a session, terminating tracked child processes
    Stop {
        /// Session id
        session_id: String,
    },

    /// Overall and per-swarm throughput and success rates
    Metrics,
}
