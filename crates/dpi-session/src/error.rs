//! Controller errors.

use dpi_core::{DpiError, LaunchError, ProjectId};
use thiserror::Error;

use crate::session::SessionId;

/// Controller error.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Dpi(#[from] DpiError),
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("Session already closed: {0}")]
    SessionClosed(SessionId),
    #[error("Failed to launch worker for {project}: {source}")]
    Launch {
        project: ProjectId,
        #[source]
        source: LaunchError,
    },
}

impl ControllerError {
    /// Underlying DPI error, if any.
    #[must_use]
    pub const fn as_dpi(&self) -> Option<&DpiError> {
        match self {
            Self::Dpi(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the worker channel is unreachable.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Dpi(DpiError::Transport(_)))
    }
}
