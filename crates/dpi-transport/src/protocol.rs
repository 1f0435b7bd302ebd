//! Wire protocol for host-worker communication.
//!
//! Every line on the wire is one JSON frame. Requests carry an id chosen by
//! the host and the worker echoes it on the matching response, so responses
//! may arrive in any order.

use dpi_core::{DpiError, DpiResult, ErrorKind, Handle};
use serde::{Deserialize, Serialize};

/// Message from host to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Liveness check.
    Ping,
    /// Open a data-source container and return its root envelope.
    OpenDataSource { container_id: String },
    /// Call a method on an exported object.
    Invoke {
        handle: Handle,
        method: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },
    /// Ask the worker to exit.
    Shutdown,
}

/// A request tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// Message from worker to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Answer to `ping`.
    Pong,
    /// Successful result.
    Value {
        #[serde(default)]
        value: serde_json::Value,
    },
    /// Failed call.
    Error { kind: ErrorKind, message: String },
    /// Answer to `shutdown`; the worker stops reading.
    Closing,
}

impl Response {
    /// Error response describing `err`.
    #[must_use]
    pub fn error(err: &DpiError) -> Self {
        let message = match err {
            DpiError::Transport(message)
            | DpiError::Protocol(message)
            | DpiError::Encoding(message)
            | DpiError::NotFound(message)
            | DpiError::RemoteFailure { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::Error {
            kind: err.kind(),
            message,
        }
    }

    /// Result value of a call to `method` on `handle`.
    ///
    /// # Errors
    /// Rebuilds the worker's error, or returns a protocol error for a
    /// response that does not answer a call.
    pub fn into_value(self, method: &str, handle: Option<&Handle>) -> DpiResult<serde_json::Value> {
        match self {
            Self::Value { value } => Ok(value),
            Self::Error { kind, message } => Err(DpiError::from_wire(kind, message, method, handle)),
            other => Err(DpiError::Protocol(format!(
                "unexpected {} response to {method}",
                other.name()
            ))),
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Pong => "pong",
            Self::Value { .. } => "value",
            Self::Error { .. } => "error",
            Self::Closing => "closing",
        }
    }
}

/// A response tagged with the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_invoke_frame_serialization() {
        let frame = RequestFrame {
            id: 7,
            request: Request::Invoke {
                handle: Handle::from("obj-1"),
                method: "getSchema".to_string(),
                args: vec![json!("public")],
            },
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "type": "invoke",
                "handle": "obj-1",
                "method": "getSchema",
                "args": ["public"]
            })
        );

        let parsed: RequestFrame = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_request_parsing_defaults() {
        let parsed: RequestFrame =
            serde_json::from_str(r#"{"id":1,"type":"invoke","handle":3,"method":"getName"}"#)
                .unwrap();
        let Request::Invoke { handle, args, .. } = parsed.request else {
            panic!("expected invoke");
        };
        assert_eq!(handle.as_str(), "3");
        assert!(args.is_empty());

        let parsed: RequestFrame = serde_json::from_str(r#"{"id":2,"type":"ping"}"#).unwrap();
        assert_eq!(parsed.request, Request::Ping);
    }

    #[test]
    fn test_error_response_round_trips_kind() {
        let err = DpiError::RemoteFailure {
            method: "getRowCount".to_string(),
            message: "relation is locked".to_string(),
        };
        let frame = ResponseFrame {
            id: 3,
            response: Response::error(&err),
        };
        let line = serde_json::to_string(&frame).unwrap();
        assert!(line.contains(r#""kind":"remote_failure""#));

        let parsed: ResponseFrame = serde_json::from_str(&line).unwrap();
        match parsed.response.into_value("getRowCount", None) {
            Err(DpiError::RemoteFailure { method, message }) => {
                assert_eq!(method, "getRowCount");
                assert_eq!(message, "relation is locked");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_carries_handle() {
        let response = Response::Error {
            kind: ErrorKind::Unsupported,
            message: "no such operation".to_string(),
        };
        let handle = Handle::from("obj-4");

        let err = response.into_value("dropTable", Some(&handle)).unwrap_err();
        assert!(matches!(
            err,
            DpiError::UnsupportedRemoteOperation { ref method, .. } if method == "dropTable"
        ));
    }

    #[test]
    fn test_null_value_parses() {
        let parsed: ResponseFrame = serde_json::from_str(r#"{"id":9,"type":"value","value":null}"#).unwrap();
        assert_eq!(parsed.response.into_value("getTable", None).unwrap(), json!(null));

        let pong = Response::Pong.into_value("getName", None).unwrap_err();
        assert!(matches!(pong, DpiError::Protocol(_)));
    }
}
