//! Ports (traits) at the seams of the coordinator.

pub mod store;
pub mod worker_runner;

pub use store::{Store, StoreResult};
pub use worker_runner::{EchoRunner, ToolInvoker, WorkerOutput, WorkerRunner};
