//! Worker-side view of hosted objects.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::value::Value;

/// A hosted object as held by the worker.
pub type LocalRef = Arc<dyn Remotable>;

/// A value produced or consumed by hosted objects.
pub type LocalValue = Value<LocalRef>;

/// Exposed properties of a hosted object, in declaration order.
pub type PropertyMap = Vec<(String, LocalValue)>;

/// Failure of a hosted object's operation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("No such operation")]
    NoSuchOperation,
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

/// An object the worker can expose to the host.
#[async_trait]
pub trait Remotable: Send + Sync {
    /// Concrete type name reported to the host.
    fn type_name(&self) -> &str;

    /// Capability interfaces the host may bind to.
    fn interfaces(&self) -> &[&str];

    /// Human-readable label.
    fn display(&self) -> String {
        self.type_name().to_string()
    }

    /// Properties to inline on first transmission. `None` if the object has
    /// no collectable properties.
    fn properties(&self) -> Option<PropertyMap> {
        None
    }

    /// Navigation parents keyed by the accessor that returns them.
    fn containers(&self) -> Vec<(String, LocalRef)> {
        Vec::new()
    }

    /// Run an operation forwarded from the host.
    async fn invoke(&self, method: &str, args: Vec<LocalValue>) -> Result<LocalValue, InvokeError>;
}

/// Turns a hosted object into its exposed property map.
pub trait PropertyCollector: Send + Sync {
    fn collect(&self, object: &LocalRef) -> Option<PropertyMap>;
}

/// Collector reading [`Remotable::properties`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredPropertyCollector;

impl PropertyCollector for DeclaredPropertyCollector {
    fn collect(&self, object: &LocalRef) -> Option<PropertyMap> {
        object.properties()
    }
}

/// Text argument at `index`.
///
/// # Errors
/// Returns `InvalidArguments` if the argument is missing or not text.
pub fn text_arg<'a>(args: &'a [LocalValue], index: usize) -> Result<&'a str, InvokeError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| InvokeError::InvalidArguments(format!("argument {index} must be text")))
}
