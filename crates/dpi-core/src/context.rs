//! Identity and cache scope for one worker channel.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use uuid::Uuid;

use crate::{
    codec::Decoder,
    error::{DpiError, DpiResult},
    interface::{InterfaceCatalog, RemoteInterface},
    model::DataSourceStub,
    registry::{Handle, IdentityRegistry},
    stub::{RemoteHandle, RemoteObject, RemoteValue, StubFactory},
    traits::RpcChannel,
};

/// Context identifier.
pub type ContextId = Uuid;

/// Liveness of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextState {
    /// Calls are forwarded.
    Open = 0,
    /// The channel failed; calls short-circuit.
    Dead = 1,
    /// Torn down by the controller; calls short-circuit.
    Closed = 2,
}

impl ContextState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Dead,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Dead => "dead",
            Self::Closed => "closed",
        })
    }
}

pub(crate) struct ContextInner {
    pub(crate) id: ContextId,
    label: String,
    channel: Arc<dyn RpcChannel>,
    pub(crate) registry: IdentityRegistry<RemoteObject>,
    pub(crate) stubs: StubFactory,
    state: AtomicU8,
}

impl ContextInner {
    pub(crate) fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn ensure_open(&self) -> DpiResult<()> {
        match self.state() {
            ContextState::Open => Ok(()),
            state => Err(DpiError::StaleProxy {
                target: format!("context {}", self.label),
                state,
            }),
        }
    }

    fn mark_dead(&self, reason: &str) {
        let swapped = self.state.compare_exchange(
            ContextState::Open as u8,
            ContextState::Dead as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if swapped.is_ok() {
            tracing::warn!(context = %self.id, label = %self.label, reason, "Context marked dead");
        }
    }

    fn observe<T>(&self, result: DpiResult<T>) -> DpiResult<T> {
        if let Err(DpiError::Transport(reason)) = &result {
            self.mark_dead(reason);
        }
        result
    }

    pub(crate) async fn invoke(
        &self,
        handle: &Handle,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> DpiResult<serde_json::Value> {
        let result = self.channel.invoke(handle, method, args).await;
        let raw = self.observe(result)?;
        // The context may have been torn down while the call was in flight.
        self.ensure_open()?;
        Ok(raw)
    }
}

/// Identity registry and proxy scope bound to one worker channel.
///
/// Proxies hold the context weakly; closing it makes every proxy stale.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create an open context over `channel`.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        channel: Arc<dyn RpcChannel>,
        catalog: Arc<InterfaceCatalog>,
    ) -> Self {
        let inner = ContextInner {
            id: Uuid::new_v4(),
            label: label.into(),
            channel,
            registry: IdentityRegistry::new(),
            stubs: StubFactory::new(catalog),
            state: AtomicU8::new(ContextState::Open as u8),
        };
        tracing::debug!(context = %inner.id, label = %inner.label, "Context created");
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state() == ContextState::Open
    }

    #[must_use]
    pub fn catalog(&self) -> &InterfaceCatalog {
        self.inner.stubs.catalog()
    }

    /// Number of proxies bound in this context.
    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Proxy bound to `handle`, if any.
    #[must_use]
    pub fn resolve(&self, handle: &Handle) -> Option<RemoteObject> {
        self.inner.registry.resolve(handle)
    }

    /// Decode a raw response value.
    ///
    /// # Errors
    /// Returns a protocol error for malformed envelopes, or `StaleProxy` if
    /// the context is not open.
    pub fn decode(&self, raw: serde_json::Value) -> DpiResult<RemoteValue> {
        self.inner.ensure_open()?;
        Decoder::new(&self.inner).decode(raw, None)
    }

    /// Decode a raw response envelope as a `T` proxy.
    ///
    /// # Errors
    /// Returns a protocol error if the value is not an object implementing
    /// `T`.
    pub fn decode_as<T: RemoteInterface>(&self, raw: serde_json::Value) -> DpiResult<RemoteHandle<T>> {
        self.inner.ensure_open()?;
        match Decoder::new(&self.inner).decode(raw, Some(T::DESCRIPTOR))? {
            crate::value::Value::Object(object) => RemoteHandle::new(object),
            other => Err(DpiError::Protocol(format!(
                "expected a {} envelope, got {}",
                T::DESCRIPTOR.name,
                other.shape()
            ))),
        }
    }

    /// Ask the worker to open a data-source container and return the root
    /// proxy of its object graph.
    ///
    /// # Errors
    /// Returns `StaleProxy` if the context is not open, `NotFound` for an
    /// unknown container, and transport or protocol errors.
    pub async fn open_data_source(&self, container_id: &str) -> DpiResult<DataSourceStub> {
        self.inner.ensure_open()?;
        let result = self.inner.channel.open_data_source(container_id).await;
        let raw = self.inner.observe(result)?;
        let data_source = self.decode_as(raw)?;
        tracing::debug!(
            context = %self.inner.id,
            container = container_id,
            handle = %data_source.handle(),
            "Data source opened"
        );
        Ok(data_source)
    }

    /// Liveness check of the channel, bounded by `timeout`.
    ///
    /// Pings even a dead context so callers can tell a slow worker from a
    /// gone one.
    ///
    /// # Errors
    /// Returns a transport error if the worker does not answer in time.
    pub async fn ping(&self, timeout: Duration) -> DpiResult<()> {
        let result = self.inner.channel.ping(timeout).await;
        self.inner.observe(result)
    }

    /// Mark the channel broken; calls short-circuit as stale from now on.
    pub fn mark_dead(&self, reason: &str) {
        self.inner.mark_dead(reason);
    }

    /// Tear the context down: every proxy becomes stale and the registry is
    /// emptied.
    pub fn close(&self) {
        let previous = self.inner.state.swap(ContextState::Closed as u8, Ordering::AcqRel);
        if ContextState::from_u8(previous) != ContextState::Closed {
            self.inner.registry.clear();
            tracing::debug!(context = %self.inner.id, label = %self.inner.label, "Context closed");
        }
    }

    /// Channel this context forwards to.
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn RpcChannel> {
        &self.inner.channel
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
