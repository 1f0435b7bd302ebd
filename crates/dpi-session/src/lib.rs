//! Controller API of the detached process interface.
//!
//! Provides:
//! - `Controller` - Session and worker-process lifecycle
//! - `SessionHandle` - Caller-held reference to one project's worker
//! - `ControllerConfig` - Timeouts, with environment overrides

pub mod config;
pub mod controller;
pub mod error;
pub mod session;

pub use config::ControllerConfig;
pub use controller::{Controller, WorkerId, WorkerState};
pub use error::ControllerError;
pub use session::{SessionHandle, SessionId, SessionState};
