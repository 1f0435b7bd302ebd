//! Worker launchers.

use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use dpi_core::{LaunchError, WorkerControl, WorkerLauncher, WorkerProcess};
use dpi_transport::LineChannel;
use tokio::{
    io::{duplex, split},
    task::{AbortHandle, JoinHandle},
};

use crate::{
    command::{CommandBuildError, WorkerCommand},
    server::{DataSourceProvider, WorkerServer},
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Abort handles of running in-process workers, by project and launch number.
type Running = Arc<Mutex<HashMap<String, Vec<(usize, AbortHandle)>>>>;

/// Runs each worker as a task in this process, connected by in-memory pipes.
pub struct InProcessLauncher {
    provider: Arc<dyn DataSourceProvider>,
    launches: AtomicUsize,
    running: Running,
}

impl InProcessLauncher {
    #[must_use]
    pub fn new(provider: Arc<dyn DataSourceProvider>) -> Self {
        Self {
            provider,
            launches: AtomicUsize::new(0),
            running: Running::default(),
        }
    }

    /// Number of workers launched so far.
    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Abort every worker of `project_id` as if its process had died.
    ///
    /// Returns the number of workers aborted.
    pub fn kill(&self, project_id: &str) -> usize {
        let handles = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project_id)
            .unwrap_or_default();
        for (_, handle) in &handles {
            handle.abort();
        }
        tracing::warn!(project = project_id, workers = handles.len(), "Killed in-process workers");
        handles.len()
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, project_id: &str) -> Result<WorkerProcess, LaunchError> {
        let (host, worker) = duplex(PIPE_CAPACITY);
        let (host_read, host_write) = split(host);
        let (worker_read, worker_write) = split(worker);

        let server = WorkerServer::new(Arc::clone(&self.provider));
        let project = project_id.to_string();
        let task = tokio::spawn(async move {
            if let Err(err) = server.serve(worker_read, worker_write).await {
                tracing::error!(project = %project, error = %err, "In-process worker failed");
            }
        });
        let launched = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(project_id.to_string())
            .or_default()
            .push((launched, task.abort_handle()));

        tracing::info!(project = project_id, launched, "Started in-process worker");
        Ok(WorkerProcess {
            channel: LineChannel::spawn(host_read, host_write),
            control: Box::new(TaskControl {
                task: Some(task),
                running: Arc::clone(&self.running),
                project: project_id.to_string(),
                launch: launched,
            }),
        })
    }
}

struct TaskControl {
    task: Option<JoinHandle<()>>,
    running: Running,
    project: String,
    launch: usize,
}

impl TaskControl {
    fn forget(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handles) = running.get_mut(&self.project) {
            handles.retain(|(launch, _)| *launch != self.launch);
            if handles.is_empty() {
                running.remove(&self.project);
            }
        }
    }
}

#[async_trait]
impl WorkerControl for TaskControl {
    async fn stop(&mut self, grace: Duration) -> Result<(), LaunchError> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!(?grace, "In-process worker did not stop, aborting");
            task.abort();
        }
        self.forget();
        Ok(())
    }
}

/// Spawns each worker as an OS process group speaking the line protocol on
/// its stdin and stdout.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: WorkerCommand,
    working_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    #[must_use]
    pub const fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            working_dir: None,
        }
    }

    /// Run workers in `dir`.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, project_id: &str) -> Result<WorkerProcess, LaunchError> {
        let parts = self
            .command
            .build(project_id)
            .map_err(|err| LaunchError::CommandBuild(err.to_string()))?;
        let (program, args) = parts.into_resolved().await.map_err(|err| match err {
            CommandBuildError::ExecutableNotFound(program) => LaunchError::ExecutableNotFound(program),
            other => LaunchError::CommandBuild(other.to_string()),
        })?;

        let mut command = tokio::process::Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .group_spawn()
            .map_err(|err| LaunchError::SpawnFailed(format!("{}: {err}", program.display())))?;
        let stdin = child.inner().stdin.take();
        let stdout = child.inner().stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            // Best effort: the process is useless without its pipes.
            if let Err(err) = child.kill().await {
                tracing::debug!(error = %err, "Failed to kill worker without pipes");
            }
            return Err(LaunchError::SpawnFailed("worker stdio was not piped".to_string()));
        };

        tracing::info!(
            project = project_id,
            pid = child.id(),
            program = %program.display(),
            "Started worker process"
        );
        Ok(WorkerProcess {
            channel: LineChannel::spawn(stdout, stdin),
            control: Box::new(ProcessControl { child }),
        })
    }
}

struct ProcessControl {
    child: AsyncGroupChild,
}

#[async_trait]
impl WorkerControl for ProcessControl {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn stop(&mut self, grace: Duration) -> Result<(), LaunchError> {
        if let Ok(waited) = tokio::time::timeout(grace, self.child.wait()).await {
            let status = waited?;
            tracing::debug!(pid = self.child.id(), %status, "Worker process exited");
            return Ok(());
        }
        tracing::warn!(
            pid = self.child.id(),
            ?grace,
            "Worker process did not exit, killing its group"
        );
        self.child.kill().await?;
        self.child.wait().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dpi_core::{
        Context, ContextState, DpiError,
        model::{Column, DataSource, Schema, Table, standard_catalog},
    };
    use tokio_test::assert_ok;

    use super::*;
    use crate::{memory::sample_catalog, server::ContainerMap};

    fn launcher() -> InProcessLauncher {
        InProcessLauncher::new(Arc::new(ContainerMap::new().with("proj1", sample_catalog())))
    }

    async fn connect(launcher: &InProcessLauncher) -> (Context, WorkerProcess) {
        let worker = launcher.launch("proj1").await.unwrap();
        let context = Context::new(
            "proj1",
            Arc::clone(&worker.channel),
            Arc::new(standard_catalog()),
        );
        (context, worker)
    }

    #[tokio::test]
    async fn test_browse_in_process_worker() {
        let launcher = launcher();
        let (context, _worker) = connect(&launcher).await;

        let ds = context.open_data_source("proj1").await.unwrap();
        assert_eq!(ds.name().await.unwrap(), "pg-main");
        assert_eq!(ds.driver_name().await.unwrap(), "postgres");

        let schema = ds.schema("public").await.unwrap().unwrap();
        let tables = schema.tables().await.unwrap();
        let names: Vec<String> = tables.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["users", "orders"]);

        let users = schema.table("users").await.unwrap().unwrap();
        assert!(users.ptr_eq(&tables[0]));
        assert_eq!(users.row_count().await.unwrap(), 1_204);
        assert!(users.schema().await.unwrap().ptr_eq(&schema));

        let columns = users.columns().await.unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].data_type().await.unwrap(), "int8");
        assert!(columns[2].nullable().await.unwrap());
        assert!(columns[1].table().await.unwrap().ptr_eq(&users));

        assert!(schema.data_source().await.unwrap().ptr_eq(&ds));
        assert!(ds.schema("missing").await.unwrap().is_none());
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_killed_worker_kills_context() {
        let launcher = launcher();
        let (context, _worker) = connect(&launcher).await;
        let ds = context.open_data_source("proj1").await.unwrap();

        assert_eq!(launcher.kill("proj1"), 1);
        let err = ds.schemas().await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(context.state(), ContextState::Dead);
        assert!(matches!(
            ds.schema("public").await,
            Err(DpiError::StaleProxy { .. })
        ));
        assert_eq!(ds.name().await.unwrap(), "pg-main");
    }

    #[tokio::test]
    async fn test_shutdown_then_stop() {
        let launcher = launcher();
        let (context, mut worker) = connect(&launcher).await;
        assert_ok!(context.ping(Duration::from_secs(1)).await);

        assert_ok!(worker.channel.shutdown().await);
        assert_ok!(worker.control.stop(Duration::from_secs(1)).await);
        assert_ok!(worker.control.stop(Duration::from_secs(1)).await);
        assert!(worker.control.id().is_none());

        // A stopped worker is no longer tracked.
        assert_eq!(launcher.kill("proj1"), 0);
    }

    #[tokio::test]
    async fn test_missing_executable_fails_launch() {
        let launcher = ProcessLauncher::new(WorkerCommand::new("dpi-no-such-worker-binary"))
            .working_dir(std::env::temp_dir());

        let err = launcher.launch("proj1").await.err().unwrap();
        assert!(matches!(err, LaunchError::ExecutableNotFound(_)));
    }
}
