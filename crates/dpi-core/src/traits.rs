//! Collaborator traits: the RPC channel and the worker launcher.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{error::DpiResult, registry::Handle};

/// Project identifier.
pub type ProjectId = String;

/// Ordered, request-correlated channel to one worker process.
///
/// Values are raw JSON: envelopes and primitives as produced by the worker's
/// encoder. Implementations must let concurrent calls proceed without
/// waiting on each other.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Round trip with no side effects, bounded by `timeout`.
    async fn ping(&self, timeout: Duration) -> DpiResult<()>;

    /// Open a data-source container, returning its envelope.
    async fn open_data_source(&self, container_id: &str) -> DpiResult<serde_json::Value>;

    /// Forward `(handle, method, args)`.
    async fn invoke(
        &self,
        handle: &Handle,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> DpiResult<serde_json::Value>;

    /// Ask the worker to exit.
    async fn shutdown(&self) -> DpiResult<()>;
}

/// Launcher error.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command build error: {0}")]
    CommandBuild(String),
}

/// Lifecycle control of a launched worker.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    /// OS process id, if the worker is a separate process.
    fn id(&self) -> Option<u32> {
        None
    }

    /// Wait up to `grace` for the worker to exit, then kill it.
    async fn stop(&mut self, grace: Duration) -> Result<(), LaunchError>;
}

/// A freshly launched worker.
pub struct WorkerProcess {
    pub channel: Arc<dyn RpcChannel>,
    pub control: Box<dyn WorkerControl>,
}

/// Starts worker processes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker for `project_id`.
    async fn launch(&self, project_id: &str) -> Result<WorkerProcess, LaunchError>;
}
