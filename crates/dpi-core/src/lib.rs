//! Core of the detached process interface.
//!
//! This crate provides the building blocks shared by host and worker:
//! - `IdentityRegistry` - Identity-keyed object/handle binding
//! - `Envelope` / codec - Wire form of object references
//! - `RemoteObject` / `RemoteHandle` - Client-side stubs with a property cache
//! - `Context` - Registry and proxy scope for one worker channel
//! - `model` - Capability interfaces of the metadata browser
//! - `RpcChannel` and `WorkerLauncher` collaborator traits

pub mod cache;
pub mod codec;
pub mod context;
pub mod envelope;
pub mod error;
pub mod interface;
pub mod local;
pub mod model;
pub mod registry;
pub mod stub;
pub mod traits;
pub mod value;

#[cfg(test)]
mod testing;

pub use cache::PropertyCache;
pub use codec::Encoder;
pub use context::{Context, ContextId, ContextState};
pub use envelope::{Envelope, WireValue};
pub use error::{DpiError, DpiResult, ErrorKind};
pub use interface::{InterfaceCatalog, InterfaceDescriptor, OperationDescriptor, RemoteInterface};
pub use local::{
    DeclaredPropertyCollector, InvokeError, LocalRef, LocalValue, PropertyCollector, Remotable,
};
pub use registry::{Handle, IdentityRegistry};
pub use stub::{RemoteHandle, RemoteObject, RemoteValue};
pub use traits::{LaunchError, ProjectId, RpcChannel, WorkerControl, WorkerLauncher, WorkerProcess};
pub use value::Value;
