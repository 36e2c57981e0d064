//! Optional tool-facade memory store.
//!
//! Bridges the collective-memory surface to an external tool capability
//! (`ToolInvoker`). The invoker is a black box: every call is bounded by a
//! timeout and retried a fixed number of times before the error surfaces.
//! The facade speaks the single-table `memories(namespace, key, value,
//! type, timestamp)` schema, unique on `(namespace, key)`.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::domain::models::MemoryType;
use crate::domain::ports::ToolInvoker;

const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 3;

/// Memory operations routed through an opaque external tool.
pub struct ToolMemoryStore {
    invoker: Arc<dyn ToolInvoker>,
    timeout: std::time::Duration,
}

impl ToolMemoryStore {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            invoker,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Store a value through the tool facade.
    pub async fn store(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
        entry_type: MemoryType,
    ) -> Result<()> {
        self.invoke_bounded(
            "memory_store",
            json!({
                "namespace": namespace,
                "key": key,
                "value": value,
                "type": entry_type.as_str(),
                "timestamp": Utc::now().timestamp_millis(),
            }),
        )
        .await
        .map(|_| ())
    }

    /// Retrieve a value through the tool facade.
    pub async fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let response = self
            .invoke_bounded(
                "memory_retrieve",
                json!({ "namespace": namespace, "key": key }),
            )
            .await?;
        if response.is_null() {
            return Ok(None);
        }
        Ok(response.get("value").cloned())
    }

    /// Invoke the tool with the configured timeout, retrying on failure.
    async fn invoke_bounded(
        &self,
        tool_name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let call = self.invoker.invoke(tool_name, params.clone());
            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    tracing::warn!(tool_name, attempt, error = %e, "tool invocation failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::warn!(tool_name, attempt, "tool invocation timed out");
                    last_error = Some(anyhow::anyhow!("tool {tool_name} timed out"));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("tool {tool_name} failed")))
            .context(format!("tool {tool_name} failed after {MAX_ATTEMPTS} attempts"))
    }
}
