//! Worker side of the detached process interface.
//!
//! Provides:
//! - `WorkerServer`, the serving loop hosting real objects
//! - An in-memory metadata catalog to serve
//! - In-process and OS-process launchers
//! - Worker command building and executable resolution

pub mod command;
pub mod launcher;
pub mod memory;
pub mod resolve;
pub mod server;

pub use command::{CommandBuildError, CommandParts, WorkerCommand};
pub use launcher::{InProcessLauncher, ProcessLauncher};
pub use memory::{MemoryColumn, MemoryDataSource, MemorySchema, MemoryTable, sample_catalog};
pub use resolve::resolve_executable_path;
pub use server::{ContainerMap, DataSourceProvider, WorkerServer};
