//! Worker execution and tool invocation ports.
//!
//! The core assumes nothing about a runner beyond this contract: it accepts
//! a task and either returns a result with its processing time or raises.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::TaskError;
use crate::domain::models::Task;

/// Output of one worker execution.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    /// Result payload
    pub result: Value,
    /// Wall time the runner spent on the task
    pub processing_time_ms: u64,
}

/// Capability that executes a task on behalf of a worker agent.
///
/// Implementations may run in-process, in a subprocess, or anywhere else;
/// the core depends only on this contract and bounds the wait with the
/// configured task timeout.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<WorkerOutput, TaskError>;
}

/// Opaque external tool capability used by the tool-facade memory store.
///
/// Treated as a black box: callers apply their own retry and timeout.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_name: &str, params: Value) -> anyhow::Result<Value>;
}

/// Trivial in-process runner echoing the task description.
///
/// Useful for tests and dry runs; completes immediately.
#[derive(Debug, Default, Clone)]
pub struct EchoRunner;

#[async_trait]
impl WorkerRunner for EchoRunner {
    async fn execute(&self, task: &Task) -> Result<WorkerOutput, TaskError> {
        Ok(WorkerOutput {
            result: serde_json::json!({ "echo": task.description }),
            processing_time_ms: 1,
        })
    }
}
