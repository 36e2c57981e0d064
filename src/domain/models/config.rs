//! Coordinator configuration.
//!
//! A single immutable record merged from defaults, `.hive-mind/config.json`,
//! and `HIVEMIND_*` environment variables. Components receive the sections
//! they need by value at construction; nothing re-reads configuration at
//! runtime.

use serde::{Deserialize, Serialize};

use super::decision::ConsensusAlgo;
use super::swarm::QueenType;

/// Root configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// Queen coordination policy for new swarms
    pub queen_type: QueenType,
    /// Upper bound on workers per swarm
    pub max_workers: usize,
    /// Worker execution timeout in minutes
    pub task_timeout_minutes: u64,
    /// Root data directory
    pub data_dir: String,
    pub database: DatabaseConfig,
    pub consensus: ConsensusConfig,
    pub memory: MemoryConfig,
    pub autosave: AutosaveConfig,
    pub messaging: MessagingConfig,
    pub logging: LoggingConfig,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            queen_type: QueenType::default(),
            max_workers: 8,
            task_timeout_minutes: 30,
            data_dir: ".hive-mind".to_string(),
            database: DatabaseConfig::default(),
            consensus: ConsensusConfig::default(),
            memory: MemoryConfig::default(),
            autosave: AutosaveConfig::default(),
            messaging: MessagingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HiveConfig {
    /// Directory for session checkpoint mirrors.
    pub fn sessions_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("sessions")
    }

    /// Directory for archived sessions.
    pub fn archive_dir(&self) -> std::path::PathBuf {
        self.sessions_dir().join("archive")
    }
}

/// Embedded database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the embedded database file
    pub path: String,
    /// Maximum pool connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".hive-mind/hive.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Consensus engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Vote-tallying algorithm
    pub algorithm: ConsensusAlgo,
    /// Quorum fraction in (0, 1]
    pub quorum: f64,
    /// Per-validator vote timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            algorithm: ConsensusAlgo::Majority,
            quorum: 0.67,
            timeout_ms: 5_000,
        }
    }
}

/// Collective memory bounds and maintenance cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// LRU cache entry bound
    pub max_entries: usize,
    /// LRU cache memory bound in megabytes
    pub max_memory_mb: usize,
    /// Compress serialized values larger than this many bytes
    pub compression_threshold: usize,
    /// Write-behind flush interval in seconds
    pub flush_interval_secs: u64,
    /// Write-behind buffer high-water mark
    pub flush_high_water: usize,
    /// GC sweep interval in seconds
    pub gc_interval_secs: u64,
    /// Durable size bound in megabytes before pressure eviction
    pub max_store_mb: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            max_memory_mb: 50,
            compression_threshold: 1_024,
            flush_interval_secs: 30,
            flush_high_water: 50,
            gc_interval_secs: 300,
            max_store_mb: 100,
        }
    }
}

/// Auto-save middleware settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Periodic flush interval in seconds
    pub save_interval_secs: u64,
    /// Start the periodic timer on construction
    pub auto_start: bool,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: 30,
            auto_start: true,
        }
    }
}

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Outbound FIFO capacity; oldest dropped beyond this
    pub buffer_capacity: usize,
    /// Envelopes delivered per drain tick
    pub deliveries_per_tick: usize,
    /// Gossip fanout per hop
    pub gossip_fanout: usize,
    /// Heartbeat cadence in seconds
    pub heartbeat_interval_secs: u64,
    /// Agents silent longer than this go offline
    pub offline_after_secs: u64,
    /// Direct-protocol ack timeout in milliseconds
    pub ack_timeout_ms: u64,
    /// Encrypt payloads of encrypted-flagged message types
    pub encryption: bool,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1_000,
            deliveries_per_tick: 10,
            gossip_fanout: 3,
            heartbeat_interval_secs: 10,
            offline_after_secs: 30,
            ack_timeout_ms: 5_000,
            encryption: false,
        }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace|debug|info|warn|error
    pub level: String,
    /// json|pretty
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
