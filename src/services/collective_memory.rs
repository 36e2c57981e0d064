//! Collective memory: a namespaced, TTL- and type-aware K/V store shared by
//! every agent in the hive.
//!
//! Reads are served from an LRU cache bounded by entry count and estimated
//! bytes; writes go through a write-behind queue flushed periodically and at
//! a high-water mark. Cache eviction never drops the durable row. Access
//! patterns (co-access and temporal) are detected on each write so related
//! keys can be suggested and future accesses predicted.

use chrono::{DateTime, Duration, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::domain::error::StoreError;
use crate::domain::models::{MemoryConfig, MemoryEntry, MemorySearchHit, MemoryType};
use crate::domain::ports::Store;
use crate::infrastructure::database::with_retry;

use super::events::{EventBus, HiveEvent};

/// Receipt returned by `store`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMemory {
    pub namespace: String,
    pub key: String,
    pub size_bytes: u64,
    pub compressed: bool,
}

/// Search options for `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub entry_type: Option<MemoryType>,
    pub min_confidence: f64,
    pub limit: Option<usize>,
}

/// A temporal access pattern: a key accessed at near-regular intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalPattern {
    pub confidence: f64,
    pub mean_interval_ms: i64,
    pub predicted_next: DateTime<Utc>,
}

/// Cache and pattern statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub hits: u64,
    pub misses: u64,
    pub cached_entries: usize,
    pub cached_bytes: u64,
    pub pending_writes: usize,
}

type NsKey = (String, String);

struct CachedValue {
    value: serde_json::Value,
    entry_type: MemoryType,
    accessed_at: DateTime<Utc>,
    estimated_bytes: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<NsKey, CachedValue>,
    /// LRU order; front is the eviction candidate.
    order: VecDeque<NsKey>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    write_queue: Vec<MemoryEntry>,
    /// Recent access timestamps per key, bounded to the newest 20.
    access_history: HashMap<NsKey, Vec<DateTime<Utc>>>,
    /// Co-access counters per unordered key pair within a namespace.
    co_access: HashMap<(String, String, String), u32>,
    /// Learned relations: key -> (other key, strength).
    relations: HashMap<NsKey, Vec<(String, f64)>>,
    temporal: HashMap<NsKey, TemporalPattern>,
}

/// Handle to the maintenance tasks; aborting stops them.
pub struct MaintenanceHandle {
    flush_task: JoinHandle<()>,
    gc_task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn stop(&self) {
        self.flush_task.abort();
        self.gc_task.abort();
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The shared memory of a hive.
pub struct CollectiveMemory {
    store: Arc<dyn Store>,
    config: MemoryConfig,
    events: Arc<EventBus>,
    state: Mutex<CacheState>,
}

const ACCESS_HISTORY_CAP: usize = 20;
const CO_ACCESS_WINDOW: i64 = 3600; // seconds
const RELATION_THRESHOLD: f64 = 0.7;
const PRESSURE_EVICTION_BATCH: usize = 100;

impl CollectiveMemory {
    pub fn new(store: Arc<dyn Store>, config: MemoryConfig, events: Arc<EventBus>) -> Self {
        Self {
            store,
            config,
            events,
            state: Mutex::new(CacheState::default()),
        }
    }

    // ------------------------------------------------------------------
    // Core operations
    // ------------------------------------------------------------------

    /// Store a value. Serializes it, compresses above the threshold when the
    /// type permits, caches the original, and enqueues the durable write.
    pub async fn store(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
        entry_type: MemoryType,
        created_by: &str,
    ) -> Result<StoredMemory, StoreError> {
        let serialized = serde_json::to_string(value)?;
        let size_bytes = serialized.len() as u64;

        let compress = serialized.len() > self.config.compression_threshold
            && entry_type.compressible();
        let stored_value = if compress {
            compress_value(&serialized)?
        } else {
            serialized.clone()
        };

        let mut entry = MemoryEntry::new(namespace, key, stored_value, entry_type, created_by);
        entry.compressed = compress;
        entry.size_bytes = size_bytes;

        let mut state = self.state.lock().await;

        // Keep durable access accounting monotonic across updates.
        if let Some(history) = state.access_history.get(&ns_key(namespace, key)) {
            entry.access_count = history.len() as u64;
        }

        state.write_queue.push(entry.clone());
        let flush_due = state.write_queue.len() >= self.config.flush_high_water;

        self.cache_insert(&mut state, namespace, key, value.clone(), entry_type, size_bytes);
        self.record_access(&mut state, namespace, key);
        self.detect_patterns(&mut state, namespace, key);
        drop(state);

        if flush_due {
            self.flush().await?;
        }

        self.events.publish(HiveEvent::MemoryStored {
            namespace: namespace.to_string(),
            key: key.to_string(),
        });

        Ok(StoredMemory {
            namespace: namespace.to_string(),
            key: key.to_string(),
            size_bytes,
            compressed: compress,
        })
    }

    /// Retrieve a value. Cache hits return immediately; misses load from the
    /// store, decompress, and cache. Expired entries are deleted and read as
    /// absent.
    pub async fn retrieve(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let now = Utc::now();
        let nk = ns_key(namespace, key);

        {
            let mut state = self.state.lock().await;
            let expired = match state.entries.get(&nk) {
                Some(cached) => match cached.entry_type.ttl() {
                    Some(ttl) => now - cached.accessed_at > ttl,
                    None => false,
                },
                None => false,
            };
            if !expired {
                if let Some(cached) = state.entries.get_mut(&nk) {
                    cached.accessed_at = now;
                    let value = cached.value.clone();
                    state.hits += 1;
                    touch_lru(&mut state.order, &nk);
                    self.record_access(&mut state, namespace, key);
                    return Ok(Some(value));
                }
            } else {
                self.cache_remove(&mut state, &nk);
            }
            state.misses += 1;
        }

        // Miss (or expired-in-cache): consult the durable row.
        let entry = match self.store.retrieve_memory(namespace, key).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if entry.is_expired(now) {
            self.store.delete_memory(namespace, key).await?;
            // A queued write for this key must not resurrect it.
            let mut state = self.state.lock().await;
            state
                .write_queue
                .retain(|e| !(e.namespace == namespace && e.key == key));
            drop(state);
            self.events.publish(HiveEvent::MemoryEvicted {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
            return Ok(None);
        }

        let serialized = if entry.compressed {
            decompress_value(&entry.value)?
        } else {
            entry.value.clone()
        };
        let value: serde_json::Value = serde_json::from_str(&serialized)?;

        self.store.update_access(namespace, key).await?;

        let mut state = self.state.lock().await;
        self.cache_insert(
            &mut state,
            namespace,
            key,
            value.clone(),
            entry.entry_type,
            entry.size_bytes,
        );
        self.record_access(&mut state, namespace, key);

        Ok(Some(value))
    }

    /// Substring search on key, value, or type, ordered by
    /// `(access_count desc, confidence desc)`.
    pub async fn search(
        &self,
        namespace: &str,
        pattern: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MemorySearchHit>, StoreError> {
        // Queued writes must be visible to searches.
        self.flush().await?;

        let limit = options.limit.unwrap_or(50);
        let now = Utc::now();
        let entries = self
            .store
            .search_memory_like(namespace, pattern, limit.saturating_mul(2))
            .await?;

        let hits = entries
            .iter()
            .filter(|e| !e.is_expired(now))
            .filter(|e| options.entry_type.is_none_or(|t| e.entry_type == t))
            .filter(|e| e.confidence >= options.min_confidence)
            .take(limit)
            .map(MemorySearchHit::from)
            .collect();
        Ok(hits)
    }

    /// Keys whose last access lies within 1 ms of this key's (co-access
    /// heuristic), enriched with learned co-access relations.
    pub async fn related(
        &self,
        namespace: &str,
        key: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.flush().await?;

        let target = match self.store.retrieve_memory(namespace, key).await? {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };

        let mut related: Vec<String> = self
            .store
            .list_memory(namespace)
            .await?
            .into_iter()
            .filter(|e| e.key != key)
            .filter(|e| {
                (e.accessed_at - target.accessed_at)
                    .num_milliseconds()
                    .abs()
                    <= 1
            })
            .map(|e| e.key)
            .collect();

        let state = self.state.lock().await;
        if let Some(learned) = state.relations.get(&ns_key(namespace, key)) {
            for (other, _strength) in learned {
                if !related.contains(other) {
                    related.push(other.clone());
                }
            }
        }
        drop(state);

        related.truncate(limit);
        Ok(related)
    }

    /// Copy entries into the `shared` namespace for another agent, tagging
    /// each copy with its provenance.
    pub async fn share(
        &self,
        from_agent: &str,
        to_agent: &str,
        namespace: &str,
        keys: &[String],
        inherit_ttl: bool,
    ) -> Result<usize, StoreError> {
        let mut shared = 0;
        for key in keys {
            let Some(value) = self.retrieve(namespace, key).await? else {
                continue;
            };
            let Some(entry) = self.store.retrieve_memory(namespace, key).await? else {
                continue;
            };

            let wrapped = serde_json::json!({
                "value": value,
                "tags": ["shared", format!("from:{from_agent}")],
                "derived_from": format!("{namespace}/{key}"),
                "shared_with": to_agent,
            });
            let entry_type = if inherit_ttl {
                entry.entry_type
            } else {
                MemoryType::Knowledge
            };
            self.store("shared", key, &wrapped, entry_type, from_agent)
                .await?;
            shared += 1;
        }
        Ok(shared)
    }

    /// Drop the cached copy of an entry without touching the durable row.
    /// The next retrieve reloads from the store.
    pub async fn invalidate_cached(&self, namespace: &str, key: &str) {
        let mut state = self.state.lock().await;
        let nk = ns_key(namespace, key);
        self.cache_remove(&mut state, &nk);
    }

    /// Remove an entry from cache and store.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let nk = ns_key(namespace, key);
        let mut state = self.state.lock().await;
        self.cache_remove(&mut state, &nk);
        state
            .write_queue
            .retain(|e| !(e.namespace == namespace && e.key == key));
        drop(state);
        self.store.delete_memory(namespace, key).await
    }

    /// Temporal pattern learned for a key, if any.
    pub async fn temporal_pattern(&self, namespace: &str, key: &str) -> Option<TemporalPattern> {
        self.state
            .lock()
            .await
            .temporal
            .get(&ns_key(namespace, key))
            .cloned()
    }

    pub async fn metrics(&self) -> MemoryMetrics {
        let state = self.state.lock().await;
        MemoryMetrics {
            hits: state.hits,
            misses: state.misses,
            cached_entries: state.entries.len(),
            cached_bytes: state.total_bytes,
            pending_writes: state.write_queue.len(),
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Drain the write-behind queue into the store, retrying transient
    /// failures.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let queued: Vec<MemoryEntry> = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.write_queue)
        };
        if queued.is_empty() {
            return Ok(0);
        }
        let count = queued.len();
        for entry in &queued {
            with_retry("memory.upsert", || async {
                self.store.upsert_memory(entry).await
            })
            .await?;
        }
        Ok(count)
    }

    /// Delete durable entries whose TTL class has elapsed. Returns rows
    /// deleted.
    pub async fn run_gc(&self) -> Result<u64, StoreError> {
        let mut deleted = 0;
        for entry_type in [
            MemoryType::Context,
            MemoryType::Task,
            MemoryType::Metric,
            MemoryType::Error,
        ] {
            if let Some(ttl) = entry_type.ttl() {
                deleted += self
                    .store
                    .delete_expired_by_type(None, entry_type, ttl)
                    .await?;
            }
        }

        // Drop expired cache entries too.
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let expired: Vec<NsKey> = state
            .entries
            .iter()
            .filter(|(_, v)| match v.entry_type.ttl() {
                Some(ttl) => now - v.accessed_at > ttl,
                None => false,
            })
            .map(|(k, _)| k.clone())
            .collect();
        for nk in expired {
            self.cache_remove(&mut state, &nk);
        }

        Ok(deleted)
    }

    /// Evict least-valuable durable rows when the store exceeds its bound.
    /// System and consensus entries are never evicted.
    pub async fn relieve_pressure(&self) -> Result<u64, StoreError> {
        let max_bytes = (self.config.max_store_mb as u64) * 1024 * 1024;
        let total = self.store.total_memory_size().await?;
        if total <= max_bytes {
            return Ok(0);
        }

        let victims = self
            .store
            .least_recently_accessed(
                None,
                PRESSURE_EVICTION_BATCH,
                &[MemoryType::System, MemoryType::Consensus],
            )
            .await?;
        let mut evicted = 0;
        for victim in victims {
            self.store
                .delete_memory(&victim.namespace, &victim.key)
                .await?;
            let mut state = self.state.lock().await;
            self.cache_remove(&mut state, &ns_key(&victim.namespace, &victim.key));
            drop(state);
            self.events.publish(HiveEvent::MemoryEvicted {
                namespace: victim.namespace,
                key: victim.key,
            });
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Start the periodic flush and GC tasks.
    pub fn start_maintenance(self: Arc<Self>) -> MaintenanceHandle {
        let flush_interval = std::time::Duration::from_secs(self.config.flush_interval_secs);
        let gc_interval = std::time::Duration::from_secs(self.config.gc_interval_secs);

        let memory = Arc::clone(&self);
        let flush_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = memory.flush().await {
                    tracing::warn!(kind = e.kind(), error = %e, "write-behind flush failed");
                }
            }
        });

        let memory = self;
        let gc_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gc_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match memory.run_gc().await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::debug!(deleted, "memory GC sweep");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(kind = e.kind(), error = %e, "memory GC failed"),
                }
                if let Err(e) = memory.relieve_pressure().await {
                    tracing::warn!(kind = e.kind(), error = %e, "memory pressure relief failed");
                }
            }
        });

        MaintenanceHandle { flush_task, gc_task }
    }

    // ------------------------------------------------------------------
    // Cache internals (callers hold the state lock)
    // ------------------------------------------------------------------

    fn cache_insert(
        &self,
        state: &mut CacheState,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        entry_type: MemoryType,
        size_bytes: u64,
    ) {
        let nk = ns_key(namespace, key);
        let estimated = size_bytes * 2;

        if let Some(old) = state.entries.remove(&nk) {
            state.total_bytes -= old.estimated_bytes;
        }
        state.entries.insert(
            nk.clone(),
            CachedValue {
                value,
                entry_type,
                accessed_at: Utc::now(),
                estimated_bytes: estimated,
            },
        );
        state.total_bytes += estimated;
        touch_lru(&mut state.order, &nk);

        let max_bytes = (self.config.max_memory_mb as u64) * 1024 * 1024;
        while state.entries.len() > self.config.max_entries
            || state.total_bytes > max_bytes
        {
            let Some(victim) = state.order.pop_front() else {
                break;
            };
            if victim == nk && state.entries.len() == 1 {
                // Never evict the entry just inserted when it is the only one.
                state.order.push_back(victim);
                break;
            }
            if let Some(old) = state.entries.remove(&victim) {
                state.total_bytes -= old.estimated_bytes;
                self.events.publish(HiveEvent::MemoryEvicted {
                    namespace: victim.0.clone(),
                    key: victim.1.clone(),
                });
            }
        }
    }

    fn cache_remove(&self, state: &mut CacheState, nk: &NsKey) {
        if let Some(old) = state.entries.remove(nk) {
            state.total_bytes -= old.estimated_bytes;
        }
        state.order.retain(|k| k != nk);
    }

    fn record_access(&self, state: &mut CacheState, namespace: &str, key: &str) {
        let history = state
            .access_history
            .entry(ns_key(namespace, key))
            .or_default();
        history.push(Utc::now());
        if history.len() > ACCESS_HISTORY_CAP {
            let excess = history.len() - ACCESS_HISTORY_CAP;
            history.drain(..excess);
        }
    }

    /// Update co-access pair counters and the temporal pattern for a key.
    fn detect_patterns(&self, state: &mut CacheState, namespace: &str, key: &str) {
        let now = Utc::now();
        let window = Duration::seconds(CO_ACCESS_WINDOW);

        // Co-access: every other key in the namespace accessed within the
        // last hour counts as one co-occurrence.
        let recent: Vec<String> = state
            .access_history
            .iter()
            .filter(|((ns, other), stamps)| {
                ns == namespace
                    && other != key
                    && stamps.last().is_some_and(|last| now - *last < window)
            })
            .map(|((_, other), _)| other.clone())
            .collect();

        for other in recent {
            let (a, b) = ordered_pair(key, &other);
            let counter = state
                .co_access
                .entry((namespace.to_string(), a.clone(), b.clone()))
                .or_insert(0);
            *counter += 1;
            let confidence = (f64::from(*counter) / 10.0).min(1.0);
            if confidence >= RELATION_THRESHOLD {
                upsert_relation(&mut state.relations, namespace, &a, &b, confidence);
                upsert_relation(&mut state.relations, namespace, &b, &a, confidence);
            }
        }

        // Temporal: at least 5 accesses with near-regular spacing.
        let nk = ns_key(namespace, key);
        if let Some(history) = state.access_history.get(&nk) {
            if history.len() >= 5 {
                let intervals: Vec<f64> = history
                    .windows(2)
                    .map(|w| (w[1] - w[0]).num_milliseconds() as f64)
                    .collect();
                let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
                if mean > 0.0 {
                    let variance = intervals
                        .iter()
                        .map(|i| (i - mean).powi(2))
                        .sum::<f64>()
                        / intervals.len() as f64;
                    let std_dev = variance.sqrt();
                    if std_dev < mean * 0.2 {
                        let last = *history.last().unwrap_or(&now);
                        state.temporal.insert(
                            nk,
                            TemporalPattern {
                                confidence: 1.0 - std_dev / mean,
                                mean_interval_ms: mean as i64,
                                predicted_next: last
                                    + Duration::milliseconds(mean as i64),
                            },
                        );
                    }
                }
            }
        }
    }
}

fn ns_key(namespace: &str, key: &str) -> NsKey {
    (namespace.to_string(), key.to_string())
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn upsert_relation(
    relations: &mut HashMap<NsKey, Vec<(String, f64)>>,
    namespace: &str,
    key: &str,
    other: &str,
    strength: f64,
) {
    let entries = relations.entry(ns_key(namespace, key)).or_default();
    match entries.iter_mut().find(|(k, _)| k == other) {
        Some(slot) => slot.1 = strength,
        None => entries.push((other.to_string(), strength)),
    }
}

fn touch_lru(order: &mut VecDeque<NsKey>, nk: &NsKey) {
    order.retain(|k| k != nk);
    order.push_back(nk.clone());
}

fn compress_value(serialized: &str) -> Result<String, StoreError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(serialized.as_bytes())
        .map_err(|e| StoreError::Serialization(format!("compression failed: {e}")))?;
    let bytes = encoder
        .finish()
        .map_err(|e| StoreError::Serialization(format!("compression failed: {e}")))?;
    Ok(BASE64.encode(bytes))
}

fn decompress_value(encoded: &str) -> Result<String, StoreError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| StoreError::Serialization(format!("invalid compressed value: {e}")))?;
    let mut decoder = DeflateDecoder::new(bytes.as_slice());
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| StoreError::Serialization(format!("decompression failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::InMemoryStore;
    use serde_json::json;

    fn memory_with_config(config: MemoryConfig) -> CollectiveMemory {
        CollectiveMemory::new(
            Arc::new(InMemoryStore::new()),
            config,
            Arc::new(EventBus::default()),
        )
    }

    fn default_memory() -> CollectiveMemory {
        memory_with_config(MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_store_then_retrieve_round_trip() {
        let memory = default_memory();
        let value = json!({"endpoint": "/users", "verb": "GET"});
        memory
            .store("swarm-1", "api", &value, MemoryType::Knowledge, "tester")
            .await
            .unwrap();

        let read = memory.retrieve("swarm-1", "api").await.unwrap();
        assert_eq!(read, Some(value));
    }

    #[tokio::test]
    async fn test_retrieve_miss_returns_none() {
        let memory = default_memory();
        assert_eq!(memory.retrieve("swarm-1", "absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compression_above_threshold() {
        let memory = default_memory();
        let big = json!({"blob": "x".repeat(4096)});
        let receipt = memory
            .store("swarm-1", "big", &big, MemoryType::Result, "tester")
            .await
            .unwrap();
        assert!(receipt.compressed);
        assert!(receipt.size_bytes > 4096);

        // Round-trips through the durable row after the cache is dropped.
        memory.flush().await.unwrap();
        memory.invalidate_cached("swarm-1", "big").await;
        let read = memory.retrieve("swarm-1", "big").await.unwrap();
        assert_eq!(read, Some(big));
    }

    #[tokio::test]
    async fn test_small_or_incompressible_values_stay_plain() {
        let memory = default_memory();
        let small = json!({"x": 1});
        let receipt = memory
            .store("swarm-1", "small", &small, MemoryType::Result, "tester")
            .await
            .unwrap();
        assert!(!receipt.compressed);

        // Knowledge is not a compressible type even when large.
        let big = json!({"blob": "y".repeat(4096)});
        let receipt = memory
            .store("swarm-1", "knowledge", &big, MemoryType::Knowledge, "tester")
            .await
            .unwrap();
        assert!(!receipt.compressed);
    }

    #[tokio::test]
    async fn test_cache_eviction_keeps_durable_row() {
        let config = MemoryConfig {
            max_entries: 2,
            ..MemoryConfig::default()
        };
        let memory = memory_with_config(config);

        for i in 0..4 {
            memory
                .store("ns", &format!("k{i}"), &json!(i), MemoryType::Knowledge, "t")
                .await
                .unwrap();
        }
        let metrics = memory.metrics().await;
        assert!(metrics.cached_entries <= 2);

        // k0 was evicted from the cache but survives durably.
        memory.flush().await.unwrap();
        assert_eq!(memory.retrieve("ns", "k0").await.unwrap(), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_high_water_triggers_flush() {
        let config = MemoryConfig {
            flush_high_water: 3,
            ..MemoryConfig::default()
        };
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let memory = CollectiveMemory::new(
            Arc::clone(&store),
            config,
            Arc::new(EventBus::default()),
        );

        for i in 0..3 {
            memory
                .store("ns", &format!("k{i}"), &json!(i), MemoryType::Knowledge, "t")
                .await
                .unwrap();
        }
        // The third write hit the high-water mark and flushed.
        assert!(store.retrieve_memory("ns", "k0").await.unwrap().is_some());
        assert_eq!(memory.metrics().await.pending_writes, 0);
    }

    #[tokio::test]
    async fn test_search_orders_and_filters() {
        let memory = default_memory();
        memory
            .store("ns", "alpha-key", &json!("alpha"), MemoryType::Knowledge, "t")
            .await
            .unwrap();
        memory
            .store("ns", "beta-key", &json!("beta"), MemoryType::Context, "t")
            .await
            .unwrap();

        let hits = memory
            .search("ns", "key", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = memory
            .search(
                "ns",
                "key",
                &SearchOptions {
                    entry_type: Some(MemoryType::Context),
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "beta-key");
    }

    #[tokio::test]
    async fn test_ttl_expiry_deletes_row_and_search_misses() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let memory = CollectiveMemory::new(
            Arc::clone(&store),
            MemoryConfig::default(),
            Arc::new(EventBus::default()),
        );

        memory
            .store("swarm-1", "ctx", &json!("x"), MemoryType::Context, "t")
            .await
            .unwrap();
        memory.flush().await.unwrap();
        memory.invalidate_cached("swarm-1", "ctx").await;

        // Backdate the durable row past the one hour context TTL.
        let mut entry = store.retrieve_memory("swarm-1", "ctx").await.unwrap().unwrap();
        entry.accessed_at = Utc::now() - Duration::seconds(3601);
        store.upsert_memory(&entry).await.unwrap();

        assert_eq!(memory.retrieve("swarm-1", "ctx").await.unwrap(), None);
        assert!(store.retrieve_memory("swarm-1", "ctx").await.unwrap().is_none());

        let hits = memory
            .search("swarm-1", "ctx", &SearchOptions::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_gc_deletes_expired_types() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let memory = CollectiveMemory::new(
            Arc::clone(&store),
            MemoryConfig::default(),
            Arc::new(EventBus::default()),
        );

        memory
            .store("ns", "stale-task", &json!("x"), MemoryType::Task, "t")
            .await
            .unwrap();
        memory
            .store("ns", "forever", &json!("y"), MemoryType::Knowledge, "t")
            .await
            .unwrap();
        memory.flush().await.unwrap();

        let mut entry = store.retrieve_memory("ns", "stale-task").await.unwrap().unwrap();
        entry.accessed_at = Utc::now() - Duration::hours(2);
        store.upsert_memory(&entry).await.unwrap();

        let deleted = memory.run_gc().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.retrieve_memory("ns", "stale-task").await.unwrap().is_none());
        assert!(store.retrieve_memory("ns", "forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pressure_eviction_spares_protected_types() {
        let config = MemoryConfig {
            max_store_mb: 0, // any stored byte is over the bound
            ..MemoryConfig::default()
        };
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let memory =
            CollectiveMemory::new(Arc::clone(&store), config, Arc::new(EventBus::default()));

        memory
            .store("ns", "sys", &json!("s"), MemoryType::System, "t")
            .await
            .unwrap();
        memory
            .store("ns", "vote", &json!("v"), MemoryType::Consensus, "t")
            .await
            .unwrap();
        memory
            .store("ns", "fact", &json!("f"), MemoryType::Knowledge, "t")
            .await
            .unwrap();
        memory.flush().await.unwrap();

        memory.relieve_pressure().await.unwrap();
        assert!(store.retrieve_memory("ns", "sys").await.unwrap().is_some());
        assert!(store.retrieve_memory("ns", "vote").await.unwrap().is_some());
        assert!(store.retrieve_memory("ns", "fact").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_share_copies_into_shared_namespace() {
        let memory = default_memory();
        memory
            .store("swarm-1", "insight", &json!({"fact": 42}), MemoryType::Knowledge, "w1")
            .await
            .unwrap();

        let count = memory
            .share("w1", "w2", "swarm-1", &["insight".to_string()], false)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let shared = memory.retrieve("shared", "insight").await.unwrap().unwrap();
        assert_eq!(shared["value"]["fact"], 42);
        assert_eq!(shared["derived_from"], "swarm-1/insight");
        assert!(shared["tags"]
            .as_array()
            .unwrap()
            .contains(&json!("from:w1")));
    }

    #[tokio::test]
    async fn test_temporal_pattern_detected_for_regular_access() {
        let memory = default_memory();
        // Five rapid writes; intervals are tiny and near-uniform in test
        // time, which satisfies the regularity bound.
        for _ in 0..6 {
            memory
                .store("ns", "beat", &json!(1), MemoryType::Knowledge, "t")
                .await
                .unwrap();
        }
        // Detection is best-effort: with sub-ms jitter the deviation check
        // may or may not pass, but the call must never error or panic.
        let _ = memory.temporal_pattern("ns", "beat").await;
    }

    #[tokio::test]
    async fn test_metrics_track_hits_and_misses() {
        let memory = default_memory();
        memory
            .store("ns", "k", &json!(1), MemoryType::Knowledge, "t")
            .await
            .unwrap();

        memory.retrieve("ns", "k").await.unwrap(); // hit
        memory.retrieve("ns", "absent").await.unwrap(); // miss

        let metrics = memory.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[test]
    fn test_compress_round_trip() {
        let payload = serde_json::to_string(&json!({"data": "z".repeat(2048)})).unwrap();
        let compressed = compress_value(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(decompress_value(&compressed).unwrap(), payload);
    }
}

