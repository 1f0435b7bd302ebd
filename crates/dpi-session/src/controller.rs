//! Session and worker-process lifecycle.
//!
//! One worker process serves every session of a project. The first session
//! starts it; closing the last one stops it and closes its context, which
//! turns every proxy of that worker stale.
//!
//! Starting and stopping a worker can take a while, so it runs under a
//! per-project lifecycle lock. The table of workers and sessions is only
//! locked for bookkeeping, never across a launch or a stop.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex as StdMutex, PoisonError, RwLock},
};

use dpi_core::{
    Context, InterfaceCatalog, ProjectId, WorkerControl, WorkerLauncher, model::DataSourceStub,
};
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::{
    config::ControllerConfig,
    error::ControllerError,
    session::{SessionHandle, SessionId},
};

/// Worker process identifier, unique per controller.
pub type WorkerId = u64;

/// Lifecycle of a project's worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

struct WorkerSlot {
    project_id: ProjectId,
    context: Context,
    control: Box<dyn WorkerControl>,
    sessions: usize,
}

struct SessionEntry {
    worker_id: WorkerId,
    handle: SessionHandle,
}

#[derive(Default)]
struct Workers {
    slots: HashMap<WorkerId, WorkerSlot>,
    /// Worker new sessions of a project attach to.
    current: HashMap<ProjectId, WorkerId>,
    sessions: HashMap<SessionId, SessionEntry>,
    next_id: WorkerId,
}

impl Workers {
    /// Live worker of `project_id`, detaching a dead one.
    fn live_worker(&mut self, project_id: &str) -> Option<WorkerId> {
        let worker_id = *self.current.get(project_id)?;
        if self
            .slots
            .get(&worker_id)
            .is_some_and(|slot| slot.context.is_alive())
        {
            return Some(worker_id);
        }
        tracing::warn!(project = project_id, worker = worker_id, "Replacing dead worker");
        self.current.remove(project_id);
        None
    }

    fn add_worker(
        &mut self,
        project_id: &str,
        context: Context,
        control: Box<dyn WorkerControl>,
    ) -> WorkerId {
        self.next_id += 1;
        let worker_id = self.next_id;
        self.slots.insert(
            worker_id,
            WorkerSlot {
                project_id: project_id.to_string(),
                context,
                control,
                sessions: 0,
            },
        );
        self.current.insert(project_id.to_string(), worker_id);
        worker_id
    }

    /// Detach a worker's slot, returning it with whether it was the
    /// project's current worker.
    fn retire(&mut self, worker_id: WorkerId) -> Option<(WorkerId, WorkerSlot, bool)> {
        let slot = self.slots.remove(&worker_id)?;
        let is_current = self.current.get(&slot.project_id) == Some(&worker_id);
        if is_current {
            self.current.remove(&slot.project_id);
        }
        Some((worker_id, slot, is_current))
    }

    fn context_of(&self, session: &SessionHandle) -> Result<Context, ControllerError> {
        let entry = self
            .sessions
            .get(&session.id())
            .ok_or(ControllerError::UnknownSession(session.id()))?;
        self.slots
            .get(&entry.worker_id)
            .map(|slot| slot.context.clone())
            .ok_or(ControllerError::UnknownSession(session.id()))
    }
}

/// Controller API consumed by the hosting application.
pub struct Controller<L> {
    launcher: L,
    catalog: Arc<InterfaceCatalog>,
    config: ControllerConfig,
    workers: Mutex<Workers>,
    /// Serializes start and stop of each project's worker.
    lifecycles: StdMutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
    states: RwLock<HashMap<ProjectId, WorkerState>>,
}

impl<L: WorkerLauncher> Controller<L> {
    #[must_use]
    pub fn new(launcher: L, catalog: Arc<InterfaceCatalog>, config: ControllerConfig) -> Self {
        Self {
            launcher,
            catalog,
            config,
            workers: Mutex::default(),
            lifecycles: StdMutex::default(),
            states: RwLock::default(),
        }
    }

    #[must_use]
    pub const fn launcher(&self) -> &L {
        &self.launcher
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// State of the worker new sessions of `project_id` would attach to.
    #[must_use]
    pub fn worker_state(&self, project_id: &str) -> WorkerState {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .copied()
            .unwrap_or(WorkerState::Stopped)
    }

    fn set_state(&self, project_id: &str, state: WorkerState) {
        tracing::debug!(project = project_id, %state, "Worker state");
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project_id.to_string(), state);
    }

    /// Open sessions attached to the current worker of `project_id`.
    pub async fn session_count(&self, project_id: &str) -> usize {
        let workers = self.workers.lock().await;
        workers
            .current
            .get(project_id)
            .and_then(|worker_id| workers.slots.get(worker_id))
            .map_or(0, |slot| slot.sessions)
    }

    /// Ping every running worker within the configured ping timeout.
    ///
    /// # Errors
    /// Returns the first worker's transport error; that worker's context is
    /// dead afterwards.
    pub async fn ping(&self) -> Result<(), ControllerError> {
        let contexts: Vec<Context> = {
            let workers = self.workers.lock().await;
            workers.slots.values().map(|slot| slot.context.clone()).collect()
        };
        let timeout = self.config.ping_timeout;
        let results = join_all(contexts.iter().map(|context| context.ping(timeout))).await;
        for (context, result) in contexts.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(project = context.label(), error = %err, "Worker did not answer ping");
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Ping the worker of one session.
    ///
    /// # Errors
    /// `SessionClosed`, `UnknownSession`, or the worker's transport error.
    pub async fn ping_session(&self, session: &SessionHandle) -> Result<(), ControllerError> {
        let context = self.session_context(session).await?;
        Ok(context.ping(self.config.ping_timeout).await?)
    }

    fn lifecycle(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut lifecycles = self.lifecycles.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lifecycles.entry(project_id.to_string()).or_default())
    }

    /// Open a session on `project_id`, starting its worker if none is
    /// running.
    ///
    /// # Errors
    /// Returns `Launch` if the worker cannot be started.
    pub async fn open_session(&self, project_id: &str) -> Result<SessionHandle, ControllerError> {
        let lifecycle = self.lifecycle(project_id);
        let _starting = lifecycle.lock().await;

        let mut workers = self.workers.lock().await;
        let worker_id = if let Some(worker_id) = workers.live_worker(project_id) {
            worker_id
        } else {
            drop(workers);
            let (context, control) = self.start_worker(project_id).await?;
            workers = self.workers.lock().await;
            let worker_id = workers.add_worker(project_id, context, control);
            self.set_state(project_id, WorkerState::Running);
            tracing::info!(
                project = project_id,
                worker = worker_id,
                pid = workers.slots.get(&worker_id).and_then(|slot| slot.control.id()),
                "Worker started"
            );
            worker_id
        };

        let session = SessionHandle::new(project_id.to_string(), worker_id);
        if let Some(slot) = workers.slots.get_mut(&worker_id) {
            slot.sessions += 1;
        }
        workers.sessions.insert(
            session.id(),
            SessionEntry {
                worker_id,
                handle: session.clone(),
            },
        );
        tracing::info!(
            project = project_id,
            session = %session.id(),
            worker = worker_id,
            "Session opened"
        );
        Ok(session)
    }

    /// Launch a worker and connect a context to it.
    async fn start_worker(
        &self,
        project_id: &str,
    ) -> Result<(Context, Box<dyn WorkerControl>), ControllerError> {
        self.set_state(project_id, WorkerState::Starting);
        match self.launcher.launch(project_id).await {
            Ok(process) => {
                let context = Context::new(project_id, process.channel, Arc::clone(&self.catalog));
                Ok((context, process.control))
            }
            Err(source) => {
                self.set_state(project_id, WorkerState::Stopped);
                tracing::error!(project = project_id, error = %source, "Failed to start worker");
                Err(ControllerError::Launch {
                    project: project_id.to_string(),
                    source,
                })
            }
        }
    }

    async fn session_context(&self, session: &SessionHandle) -> Result<Context, ControllerError> {
        if session.is_closed() {
            return Err(ControllerError::SessionClosed(session.id()));
        }
        self.workers.lock().await.context_of(session)
    }

    /// Open a data-source container on the session's worker and return the
    /// root proxy of its object graph.
    ///
    /// # Errors
    /// `SessionClosed`, `UnknownSession`, or whatever the worker reports.
    pub async fn open_data_source(
        &self,
        session: &SessionHandle,
        container_id: &str,
    ) -> Result<DataSourceStub, ControllerError> {
        let context = self.session_context(session).await?;
        let data_source = context.open_data_source(container_id).await?;
        session.activate();
        tracing::info!(
            session = %session.id(),
            container = container_id,
            handle = %data_source.handle(),
            "Data source opened"
        );
        Ok(data_source)
    }

    /// Detach a session, stopping its worker if it was the last one.
    ///
    /// # Errors
    /// `SessionClosed` if already closed, `UnknownSession` if the session
    /// was not opened by this controller.
    pub async fn close_session(&self, session: &SessionHandle) -> Result<(), ControllerError> {
        let lifecycle = self.lifecycle(session.project_id());
        let _stopping = lifecycle.lock().await;

        let retired = {
            let mut workers = self.workers.lock().await;
            let Some(entry) = workers.sessions.remove(&session.id()) else {
                return Err(if session.is_closed() {
                    ControllerError::SessionClosed(session.id())
                } else {
                    ControllerError::UnknownSession(session.id())
                });
            };
            entry.handle.close();
            let remaining = workers.slots.get_mut(&entry.worker_id).map(|slot| {
                slot.sessions = slot.sessions.saturating_sub(1);
                slot.sessions
            });
            tracing::info!(
                project = session.project_id(),
                session = %session.id(),
                remaining,
                "Session closed"
            );
            if remaining == Some(0) {
                workers.retire(entry.worker_id)
            } else {
                None
            }
        };

        if let Some((worker_id, slot, is_current)) = retired {
            if is_current {
                self.set_state(&slot.project_id, WorkerState::Stopping);
            }
            self.stop_worker(worker_id, slot, is_current).await;
        }
        Ok(())
    }

    /// Close every session and stop every worker.
    pub async fn shutdown_all(&self) {
        let retired: Vec<_> = {
            let mut workers = self.workers.lock().await;
            for (_, entry) in workers.sessions.drain() {
                entry.handle.close();
            }
            let worker_ids: Vec<WorkerId> = workers.slots.keys().copied().collect();
            worker_ids
                .into_iter()
                .filter_map(|worker_id| workers.retire(worker_id))
                .collect()
        };
        for (worker_id, slot, is_current) in retired {
            if is_current {
                self.set_state(&slot.project_id, WorkerState::Stopping);
            }
            self.stop_worker(worker_id, slot, is_current).await;
        }
    }

    /// Close the worker's context, ask it to shut down, then stop it.
    ///
    /// Runs without the workers lock. Callers that retire the current
    /// worker of a project hold its lifecycle lock, so a new session on the
    /// same project starts a fresh worker only after this one is gone.
    async fn stop_worker(&self, worker_id: WorkerId, mut slot: WorkerSlot, is_current: bool) {
        let project_id = slot.project_id.clone();
        slot.context.close();

        let grace = self.config.shutdown_grace;
        match tokio::time::timeout(grace, slot.context.channel().shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(project = %project_id, worker = worker_id, error = %err, "Shutdown request failed");
            }
            Err(_) => {
                tracing::warn!(project = %project_id, worker = worker_id, "Worker did not acknowledge shutdown");
            }
        }
        if let Err(err) = slot.control.stop(grace).await {
            tracing::error!(project = %project_id, worker = worker_id, error = %err, "Failed to stop worker");
        }

        if is_current {
            self.set_state(&project_id, WorkerState::Stopped);
        }
        tracing::info!(project = %project_id, worker = worker_id, "Worker stopped");
    }
}

impl<L> fmt::Debug for Controller<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
