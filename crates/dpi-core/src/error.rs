//! Error types shared by every DPI crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{context::ContextState, registry::Handle};

/// Result alias used across the DPI crates.
pub type DpiResult<T> = Result<T, DpiError>;

/// Wire discriminant of a [`DpiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Protocol,
    Unsupported,
    Stale,
    Encoding,
    RemoteFailure,
    NotFound,
}

/// DPI error.
#[derive(Debug, Error)]
pub enum DpiError {
    /// Channel or worker process unreachable.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Malformed envelope or a response of the wrong shape.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// No cached value and no forwarding path for the call.
    #[error("Unsupported remote operation '{method}' on {type_name} ({handle})")]
    UnsupportedRemoteOperation {
        method: String,
        handle: Handle,
        type_name: String,
    },
    /// The owning context is closed or dead.
    #[error("Stale proxy {target}: context is {state}")]
    StaleProxy { target: String, state: ContextState },
    /// The object cannot be made remote-capable.
    #[error("Encoding error: {0}")]
    Encoding(String),
    /// The remote object ran the call and reported a failure.
    #[error("Remote call '{method}' failed: {message}")]
    RemoteFailure { method: String, message: String },
    /// Unknown data-source container.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl DpiError {
    /// Wire discriminant for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::UnsupportedRemoteOperation { .. } => ErrorKind::Unsupported,
            Self::StaleProxy { .. } => ErrorKind::Stale,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::RemoteFailure { .. } => ErrorKind::RemoteFailure,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Rebuild an error reported by the worker for a call on `handle`.
    ///
    /// `type_name` is unknown at the transport level and left empty; the
    /// stub that issued the call fills it in.
    #[must_use]
    pub fn from_wire(kind: ErrorKind, message: String, method: &str, handle: Option<&Handle>) -> Self {
        match (kind, handle) {
            (ErrorKind::Transport, _) => Self::Transport(message),
            (ErrorKind::Unsupported, Some(handle)) => Self::UnsupportedRemoteOperation {
                method: method.to_string(),
                handle: handle.clone(),
                type_name: String::new(),
            },
            (ErrorKind::Protocol | ErrorKind::Unsupported | ErrorKind::Stale, _) => {
                Self::Protocol(message)
            }
            (ErrorKind::Encoding, _) => Self::Encoding(message),
            (ErrorKind::RemoteFailure, _) => Self::RemoteFailure {
                method: method.to_string(),
                message,
            },
            (ErrorKind::NotFound, _) => Self::NotFound(message),
        }
    }

    /// Whether this error means the channel itself is broken.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for DpiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for DpiError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_from_wire_keeps_call_identity() {
        let handle = Handle::new("obj-3");
        let err = DpiError::from_wire(
            ErrorKind::Unsupported,
            "no such operation".to_string(),
            "getIndexes",
            Some(&handle),
        );
        match err {
            DpiError::UnsupportedRemoteOperation { method, handle, .. } => {
                assert_eq!(method, "getIndexes");
                assert_eq!(handle.as_str(), "obj-3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsupported_without_handle_is_protocol() {
        let err = DpiError::from_wire(
            ErrorKind::Unsupported,
            "bad request".to_string(),
            "openDataSource",
            None,
        );
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::RemoteFailure).unwrap();
        assert_eq!(json, "\"remote_failure\"");
    }
}
