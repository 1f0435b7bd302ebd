//! Session handles.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use dpi_core::ProjectId;
use uuid::Uuid;

use crate::controller::WorkerId;

/// Session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Opened, no data source acquired yet.
    Created = 0,
    /// At least one call succeeded.
    Active = 1,
    /// Terminal.
    Closed = 2,
}

impl SessionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// Caller-held reference to one project's worker.
///
/// Clones share state: closing through one clone closes them all.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    project_id: ProjectId,
    worker_id: WorkerId,
    state: Arc<AtomicU8>,
}

impl SessionHandle {
    pub(crate) fn new(project_id: ProjectId, worker_id: WorkerId) -> Self {
        Self {
            id: SessionId::new(),
            project_id,
            worker_id,
            state: Arc::new(AtomicU8::new(SessionState::Created as u8)),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Worker process this session is attached to.
    #[must_use]
    pub const fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// `Created -> Active`; no-op otherwise.
    pub(crate) fn activate(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Created as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move to `Closed`, returning whether this call did it.
    pub(crate) fn close(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::AcqRel) != SessionState::Closed as u8
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("worker_id", &self.worker_id)
            .field("state", &self.state())
            .finish()
    }
}
