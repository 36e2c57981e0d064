//! Collective memory domain model.
//!
//! Entries are unique on `(namespace, key)` and carry a type that determines
//! TTL and compression eligibility.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Type of a memory entry. Determines TTL class and compressibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Knowledge,
    Context,
    Task,
    Result,
    Error,
    Metric,
    Consensus,
    System,
}

impl Default for MemoryType {
    fn default() -> Self {
        Self::Knowledge
    }
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Context => "context",
            Self::Task => "task",
            Self::Result => "result",
            Self::Error => "error",
            Self::Metric => "metric",
            Self::Consensus => "consensus",
            Self::System => "system",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "knowledge" => Some(Self::Knowledge),
            "context" => Some(Self::Context),
            "task" => Some(Self::Task),
            "result" => Some(Self::Result),
            "error" => Some(Self::Error),
            "metric" => Some(Self::Metric),
            "consensus" => Some(Self::Consensus),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// TTL class for this type. `None` means the entry never expires.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Context | Self::Metric => Some(Duration::hours(1)),
            Self::Task => Some(Duration::minutes(30)),
            Self::Error => Some(Duration::hours(24)),
            Self::Knowledge | Self::Result | Self::Consensus | Self::System => None,
        }
    }

    /// Whether values of this type may be compressed above the threshold.
    pub fn compressible(&self) -> bool {
        matches!(self, Self::Task | Self::Result | Self::Metric)
    }

    /// Types exempt from memory-pressure eviction.
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::System | Self::Consensus)
    }
}

/// A typed, namespaced value with access accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Namespace for organization (usually the swarm id or `shared`)
    pub namespace: String,
    /// Lookup key, unique within the namespace
    pub key: String,
    /// Serialized value; base64 of deflate output when `compressed`
    pub value: String,
    /// Type, determining TTL and compressibility
    pub entry_type: MemoryType,
    /// Confidence score in [0, 1]
    pub confidence: f64,
    /// Originating agent or subsystem
    pub created_by: String,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last read or written
    pub accessed_at: DateTime<Utc>,
    /// Read/write counter
    pub access_count: u64,
    /// Whether `value` is compressed
    pub compressed: bool,
    /// Size of the uncompressed serialized value in bytes
    pub size_bytes: u64,
}

impl MemoryEntry {
    /// Create a fresh entry with access accounting initialized.
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        entry_type: MemoryType,
        created_by: impl Into<String>,
    ) -> Self {
        let value = value.into();
        let size_bytes = value.len() as u64;
        let now = Utc::now();
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
            entry_type,
            confidence: 1.0,
            created_by: created_by.into(),
            created_at: now,
            accessed_at: now,
            access_count: 0,
            compressed: false,
            size_bytes,
        }
    }

    /// Whether the TTL for this entry's type has elapsed since last access.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.entry_type.ttl() {
            Some(ttl) => now - self.accessed_at > ttl,
            None => false,
        }
    }
}

/// A search hit returned by `CollectiveMemory::search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchHit {
    pub key: String,
    pub entry_type: MemoryType,
    pub confidence: f64,
    pub access_count: u64,
    pub size_bytes: u64,
}

impl From<&MemoryEntry> for MemorySearchHit {
    fn from(entry: &MemoryEntry) -> Self {
        Self {
            key: entry.key.clone(),
            entry_type: entry.entry_type,
            confidence: entry.confidence,
            access_count: entry.access_count,
            size_bytes: entry.size_bytes,
        }
    }
}
