//! Client-side remote stubs.
//!
//! A [`RemoteObject`] stands in for one object living in the worker. Calls
//! are answered from its property cache or its container table when
//! possible, otherwise forwarded through the owning context's channel.

use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::Deref,
    sync::{Arc, Weak},
};

use crate::{
    cache::{CachedValue, PropertyCache},
    codec::{Decoder, encode_argument},
    context::{ContextId, ContextInner, ContextState},
    error::{DpiError, DpiResult},
    interface::{InterfaceCatalog, InterfaceDescriptor, OperationDescriptor, RemoteInterface},
    registry::{Handle, Identity},
    value::Value,
};

/// A value on the host side: objects are proxies.
pub type RemoteValue = Value<RemoteObject>;

/// What the first envelope of a handle said about its object.
#[derive(Debug, Default)]
pub(crate) struct StubSeed {
    pub type_name: Option<String>,
    pub display: Option<String>,
    pub interfaces: Vec<String>,
    pub containers: BTreeMap<String, Handle>,
    pub cache: PropertyCache,
}

/// Builds proxies for one context.
#[derive(Debug, Clone)]
pub struct StubFactory {
    catalog: Arc<InterfaceCatalog>,
}

impl StubFactory {
    #[must_use]
    pub const fn new(catalog: Arc<InterfaceCatalog>) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &InterfaceCatalog {
        &self.catalog
    }

    /// Build a proxy implementing `hint` plus every interface the seed
    /// declares or its type name implies.
    pub(crate) fn build(
        &self,
        context: &Arc<ContextInner>,
        handle: Handle,
        seed: StubSeed,
        hint: Option<&'static InterfaceDescriptor>,
    ) -> RemoteObject {
        let mut names: Vec<String> = hint.iter().map(|d| d.name.to_string()).collect();
        names.extend(seed.interfaces);
        if let Some(type_name) = &seed.type_name {
            names.extend(self.catalog.interfaces_for_type(type_name));
        }

        let resolved = self.catalog.resolve(names.iter().map(String::as_str));
        let mut interfaces = resolved.descriptors;
        let mut unresolved = resolved.unresolved;
        if let Some(hint) = hint {
            if !interfaces.iter().any(|d| d.name == hint.name) {
                interfaces.insert(0, hint);
                unresolved.retain(|name| name != hint.name);
            }
        }

        let type_name = seed
            .type_name
            .or_else(|| hint.map(|d| d.name.to_string()))
            .unwrap_or_else(|| "Object".to_string());

        tracing::debug!(
            context = %context.id,
            handle = %handle,
            type_name = %type_name,
            interfaces = interfaces.len(),
            cached = seed.cache.len(),
            "Created remote stub"
        );

        RemoteObject {
            inner: Arc::new(StubInner {
                context: Arc::downgrade(context),
                context_id: context.id,
                handle,
                type_name,
                display: seed.display,
                interfaces,
                unresolved,
                containers: seed.containers,
                cache: seed.cache,
            }),
        }
    }
}

struct StubInner {
    context: Weak<ContextInner>,
    context_id: ContextId,
    handle: Handle,
    type_name: String,
    display: Option<String>,
    interfaces: Vec<&'static InterfaceDescriptor>,
    unresolved: Vec<String>,
    containers: BTreeMap<String, Handle>,
    cache: PropertyCache,
}

/// Proxy for one object hosted by a worker.
///
/// Equality, hashing and formatting are answered locally from
/// `(context, handle)`.
#[derive(Clone)]
pub struct RemoteObject {
    inner: Arc<StubInner>,
}

impl Identity for RemoteObject {
    fn identity(&self) -> usize {
        self.inner.identity()
    }
}

impl RemoteObject {
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.inner.context_id
    }

    /// Display string sent by the worker, if any.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.inner.display.as_deref()
    }

    /// Names of every interface this proxy was declared with.
    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.inner
            .interfaces
            .iter()
            .map(|d| d.name)
            .chain(self.inner.unresolved.iter().map(String::as_str))
    }

    #[must_use]
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces().any(|name| name == interface)
    }

    /// Whether two proxies are the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Raw cache entry for a property.
    #[must_use]
    pub fn cached(&self, property: &str) -> Option<&CachedValue> {
        self.inner.cache.get(property)
    }

    #[must_use]
    pub fn cache(&self) -> &PropertyCache {
        &self.inner.cache
    }

    /// Cached property value with objects resolved to proxies.
    ///
    /// # Errors
    /// Returns `StaleProxy` if the value holds objects and the context is
    /// gone.
    pub fn property(&self, property: &str) -> DpiResult<Option<RemoteValue>> {
        self.inner
            .cache
            .get(property)
            .cloned()
            .map(|cached| self.materialize(cached))
            .transpose()
    }

    /// Navigation parent recorded under `accessor`.
    ///
    /// # Errors
    /// Returns `StaleProxy` if the parent must be resolved and the context is
    /// gone.
    pub fn container(&self, accessor: &str) -> DpiResult<Option<Self>> {
        let Some(handle) = self.inner.containers.get(accessor) else {
            return Ok(None);
        };
        if *handle == self.inner.handle {
            return Ok(Some(self.clone()));
        }
        Ok(self.live_context()?.registry.resolve(handle))
    }

    /// Whether calls that need the worker would fail as stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.live_context().is_err()
    }

    /// Typed view of this proxy, if it implements `T`.
    #[must_use]
    pub fn cast<T: RemoteInterface>(&self) -> Option<RemoteHandle<T>> {
        RemoteHandle::new(self.clone()).ok()
    }

    /// Call `method` on the remote object.
    ///
    /// # Errors
    /// `UnsupportedRemoteOperation` if no declared interface forwards the
    /// call, `StaleProxy` if the context is gone, plus anything the channel
    /// or the remote object reports.
    pub async fn call(&self, method: &str, args: Vec<RemoteValue>) -> DpiResult<RemoteValue> {
        self.dispatch(method, args, None).await
    }

    /// Call `method` and decode new objects as `T`.
    ///
    /// # Errors
    /// See [`Self::call`].
    pub async fn call_with_hint(
        &self,
        method: &str,
        args: Vec<RemoteValue>,
        hint: &'static InterfaceDescriptor,
    ) -> DpiResult<RemoteValue> {
        self.dispatch(method, args, Some(hint)).await
    }

    async fn dispatch(
        &self,
        method: &str,
        args: Vec<RemoteValue>,
        hint: Option<&'static InterfaceDescriptor>,
    ) -> DpiResult<RemoteValue> {
        if args.is_empty() {
            if let Some(cached) = self.inner.cache.lookup_accessor(method) {
                tracing::trace!(handle = %self.inner.handle, method, "Property cache hit");
                return self.materialize(cached.clone());
            }
            if self.inner.containers.contains_key(method) {
                if let Some(parent) = self.container(method)? {
                    return Ok(Value::Object(parent));
                }
            }
        }

        let context = self.live_context()?;
        let operation = self
            .operation(method, args.len())
            .ok_or_else(|| self.unsupported(method))?;

        let wire_args = args
            .iter()
            .map(|arg| encode_argument(self.inner.context_id, arg)?.to_json())
            .collect::<DpiResult<Vec<_>>>()?;
        let hint = hint.or_else(|| operation.returns.and_then(|name| context.stubs.catalog().lookup(name)));

        let raw = context
            .invoke(&self.inner.handle, method, wire_args)
            .await
            .map_err(|err| self.qualify(err))?;
        Decoder::new(&context).decode(raw, hint)
    }

    fn operation(&self, method: &str, arity: usize) -> Option<&'static OperationDescriptor> {
        self.inner
            .interfaces
            .iter()
            .find_map(|interface| interface.operation(method, arity))
    }

    fn unsupported(&self, method: &str) -> DpiError {
        DpiError::UnsupportedRemoteOperation {
            method: method.to_string(),
            handle: self.inner.handle.clone(),
            type_name: self.inner.type_name.clone(),
        }
    }

    fn qualify(&self, err: DpiError) -> DpiError {
        match err {
            DpiError::UnsupportedRemoteOperation {
                method,
                handle,
                type_name,
            } if type_name.is_empty() => DpiError::UnsupportedRemoteOperation {
                method,
                handle,
                type_name: self.inner.type_name.clone(),
            },
            other => other,
        }
    }

    fn live_context(&self) -> DpiResult<Arc<ContextInner>> {
        let Some(context) = self.inner.context.upgrade() else {
            return Err(self.stale(ContextState::Closed));
        };
        match context.state() {
            ContextState::Open => Ok(context),
            state => Err(self.stale(state)),
        }
    }

    fn stale(&self, state: ContextState) -> DpiError {
        DpiError::StaleProxy {
            target: format!("{} {}", self.inner.type_name, self.inner.handle),
            state,
        }
    }

    fn materialize(&self, cached: CachedValue) -> DpiResult<RemoteValue> {
        cached.try_map(&mut |handle: Handle| {
            if handle == self.inner.handle {
                return Ok(self.clone());
            }
            self.live_context()?.registry.resolve(&handle).ok_or_else(|| {
                DpiError::Protocol(format!("cached property refers to unknown handle {handle}"))
            })
        })
    }
}

impl PartialEq for RemoteObject {
    fn eq(&self, other: &Self) -> bool {
        self.inner.context_id == other.inner.context_id && self.inner.handle == other.inner.handle
    }
}

impl Eq for RemoteObject {}

impl Hash for RemoteObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.context_id.hash(state);
        self.inner.handle.hash(state);
    }
}

impl fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.display {
            Some(display) => f.write_str(display),
            None => write!(f, "{} {}", self.inner.type_name, self.inner.handle),
        }
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("handle", &self.inner.handle)
            .field("type_name", &self.inner.type_name)
            .field("context", &self.inner.context_id)
            .finish_non_exhaustive()
    }
}

/// A proxy statically known to implement `T`.
pub struct RemoteHandle<T> {
    object: RemoteObject,
    _interface: PhantomData<fn() -> T>,
}

impl<T: RemoteInterface> RemoteHandle<T> {
    /// Wrap `object`.
    ///
    /// # Errors
    /// Returns a protocol error if `object` does not implement `T`.
    pub fn new(object: RemoteObject) -> DpiResult<Self> {
        if !object.implements(T::DESCRIPTOR.name) {
            return Err(DpiError::Protocol(format!(
                "{} {} does not implement {}",
                object.type_name(),
                object.handle(),
                T::DESCRIPTOR.name
            )));
        }
        Ok(Self {
            object,
            _interface: PhantomData,
        })
    }

    #[must_use]
    pub const fn object(&self) -> &RemoteObject {
        &self.object
    }

    #[must_use]
    pub fn into_object(self) -> RemoteObject {
        self.object
    }

    /// Text result of a call.
    ///
    /// # Errors
    /// Returns a protocol error if the result is not text.
    pub async fn text(&self, method: &str) -> DpiResult<String> {
        match self.object.call(method, Vec::new()).await? {
            Value::Text(text) => Ok(text),
            other => Err(shape_error(method, "text", &other)),
        }
    }

    /// Integer result of a call.
    ///
    /// # Errors
    /// Returns a protocol error if the result is not an integer.
    pub async fn integer(&self, method: &str) -> DpiResult<i64> {
        match self.object.call(method, Vec::new()).await? {
            Value::Int(n) => Ok(n),
            other => Err(shape_error(method, "integer", &other)),
        }
    }

    /// Boolean result of a call.
    ///
    /// # Errors
    /// Returns a protocol error if the result is not a bool.
    pub async fn flag(&self, method: &str) -> DpiResult<bool> {
        match self.object.call(method, Vec::new()).await? {
            Value::Bool(flag) => Ok(flag),
            other => Err(shape_error(method, "bool", &other)),
        }
    }

    /// Single object result of a call, `None` for null.
    ///
    /// # Errors
    /// Returns a protocol error if the result is not an object implementing
    /// `U`.
    pub async fn navigate<U: RemoteInterface>(
        &self,
        method: &str,
        args: Vec<RemoteValue>,
    ) -> DpiResult<Option<RemoteHandle<U>>> {
        match self.object.call_with_hint(method, args, U::DESCRIPTOR).await? {
            Value::Null => Ok(None),
            Value::Object(object) => RemoteHandle::new(object).map(Some),
            other => Err(shape_error(method, U::DESCRIPTOR.name, &other)),
        }
    }

    /// List-of-objects result of a call; null reads as empty.
    ///
    /// # Errors
    /// Returns a protocol error if any element is not an object implementing
    /// `U`.
    pub async fn navigate_all<U: RemoteInterface>(
        &self,
        method: &str,
        args: Vec<RemoteValue>,
    ) -> DpiResult<Vec<RemoteHandle<U>>> {
        match self.object.call_with_hint(method, args, U::DESCRIPTOR).await? {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(object) => RemoteHandle::new(object),
                    other => Err(shape_error(method, U::DESCRIPTOR.name, &other)),
                })
                .collect(),
            other => Err(shape_error(method, "list", &other)),
        }
    }
}

fn shape_error(method: &str, expected: &str, value: &RemoteValue) -> DpiError {
    DpiError::Protocol(format!("{method} returned {}, expected {expected}", value.shape()))
}

impl<T> Deref for RemoteHandle<T> {
    type Target = RemoteObject;

    fn deref(&self) -> &RemoteObject {
        &self.object
    }
}

impl<T> Clone for RemoteHandle<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            _interface: PhantomData,
        }
    }
}

impl<T> PartialEq for RemoteHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object
    }
}

impl<T> Eq for RemoteHandle<T> {}

impl<T> Hash for RemoteHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object.hash(state);
    }
}

impl<T> fmt::Display for RemoteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.object, f)
    }
}

impl<T> fmt::Debug for RemoteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.object, f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::{
        model::{Column, DataSource, Schema, SchemaInterface, Table, TableInterface},
        testing::{ScriptedChannel, scripted_context},
    };

    fn public_schema() -> serde_json::Value {
        json!({
            "handle": "obj-2",
            "type": "PostgreSchema",
            "interfaces": ["Schema"],
            "containers": {"getDataSource": "obj-1"},
            "properties": {"name": "public"}
        })
    }

    #[tokio::test]
    async fn test_cached_property_answers_locally() {
        let (context, channel) = scripted_context();
        let ds = context.open_data_source("proj1").await.unwrap();

        assert_eq!(ds.handle().as_str(), "obj-1");
        assert_eq!(ds.type_name(), "PostgreDataSource");
        assert_eq!(ds.to_string(), "pg-main");
        assert_eq!(ds.display_name(), Some("pg-main"));
        assert_eq!(ds.cache().names().collect::<Vec<_>>(), vec!["name"]);
        assert_eq!(ds.name().await.unwrap(), "pg-main");
        assert_eq!(ds.name().await.unwrap(), "pg-main");
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_uncached_call_is_forwarded_and_decoded() {
        let (context, channel) = scripted_context();
        channel.respond("obj-1", "getSchema", public_schema());
        let ds = context.open_data_source("proj1").await.unwrap();

        let schema = ds.schema("public").await.unwrap().unwrap();

        assert_eq!(schema.handle().as_str(), "obj-2");
        assert!(schema.implements("Schema"));
        assert_eq!(
            channel.calls(),
            vec![(
                "obj-1".to_string(),
                "getSchema".to_string(),
                vec![json!("public")]
            )]
        );
        assert_eq!(schema.name().await.unwrap(), "public");
        assert_eq!(channel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_handle_yields_same_proxy() {
        let (context, channel) = scripted_context();
        channel.respond("obj-1", "getSchema", public_schema());
        let ds = context.open_data_source("proj1").await.unwrap();

        let first = ds.schema("public").await.unwrap().unwrap();
        channel.respond("obj-1", "getSchema", json!({"handle": "obj-2"}));
        let second = ds.schema("public").await.unwrap().unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(first, second);
        assert_eq!(context.proxy_count(), 2);
    }

    #[tokio::test]
    async fn test_undeclared_method_is_unsupported() {
        let (context, channel) = scripted_context();
        let ds = context.open_data_source("proj1").await.unwrap();

        let err = assert_err!(ds.call("dropDatabase", Vec::new()).await);
        match err {
            DpiError::UnsupportedRemoteOperation {
                method, type_name, ..
            } => {
                assert_eq!(method, "dropDatabase");
                assert_eq!(type_name, "PostgreDataSource");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_worker_reported_unsupported_names_the_type() {
        let (context, channel) = scripted_context();
        let ds = context.open_data_source("proj1").await.unwrap();

        let err = assert_err!(ds.driver_name().await);
        assert!(matches!(
            err,
            DpiError::UnsupportedRemoteOperation { ref type_name, .. } if type_name == "PostgreDataSource"
        ));
        assert_eq!(channel.call_count(), 1);
        assert!(context.is_alive());
    }

    #[tokio::test]
    async fn test_closed_context_makes_forwarding_stale() {
        let (context, channel) = scripted_context();
        channel.respond("obj-1", "getSchema", public_schema());
        let ds = context.open_data_source("proj1").await.unwrap();

        context.close();

        let err = assert_err!(ds.schema("public").await);
        assert!(matches!(
            err,
            DpiError::StaleProxy {
                state: ContextState::Closed,
                ..
            }
        ));
        assert_eq!(ds.name().await.unwrap(), "pg-main");
        assert!(ds.is_stale());
        assert_eq!(channel.call_count(), 0);
        assert_eq!(context.proxy_count(), 0);
    }

    #[tokio::test]
    async fn test_undeclared_method_on_closed_context_is_stale() {
        let (context, channel) = scripted_context();
        let ds = context.open_data_source("proj1").await.unwrap();

        context.close();

        let err = assert_err!(ds.call("dropDatabase", Vec::new()).await);
        assert!(matches!(
            err,
            DpiError::StaleProxy {
                state: ContextState::Closed,
                ..
            }
        ));
        // Cached reads still answer.
        assert_eq!(ds.call("getName", Vec::new()).await.unwrap().as_str(), Some("pg-main"));
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_context_makes_forwarding_stale() {
        let (context, _channel) = scripted_context();
        let ds = context.open_data_source("proj1").await.unwrap();
        drop(context);

        assert!(ds.is_stale());
        assert!(matches!(
            ds.schemas().await,
            Err(DpiError::StaleProxy { .. })
        ));
        assert_eq!(ds.name().await.unwrap(), "pg-main");
    }

    #[tokio::test]
    async fn test_transport_failure_marks_context_dead() {
        let (context, channel) = scripted_context();
        let ds = context.open_data_source("proj1").await.unwrap();
        channel.break_channel();

        let err = assert_err!(ds.driver_name().await);
        assert!(err.is_transport());
        assert_eq!(context.state(), ContextState::Dead);

        let err = assert_err!(ds.schema("public").await);
        assert!(matches!(
            err,
            DpiError::StaleProxy {
                state: ContextState::Dead,
                ..
            }
        ));
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decodes_share_one_proxy() {
        let (context, _channel) = scripted_context();
        let raw = json!({
            "handle": "obj-7",
            "type": "PostgreTable",
            "interfaces": ["Table"],
            "properties": {"name": "users"}
        });

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let context = context.clone();
                let raw = raw.clone();
                tokio::spawn(async move { context.decode(raw) })
            })
            .collect();

        let mut proxies = Vec::new();
        for task in tasks {
            let value = task.await.unwrap().unwrap();
            proxies.push(value.into_object().unwrap());
        }

        assert!(proxies.iter().all(|proxy| proxy.ptr_eq(&proxies[0])));
        assert_eq!(context.proxy_count(), 1);
    }

    #[tokio::test]
    async fn test_proxy_from_another_context_is_rejected() {
        let (first, first_channel) = scripted_context();
        let (second, _) = scripted_context();
        let ds = first.open_data_source("proj1").await.unwrap();
        let foreign = second.open_data_source("proj1").await.unwrap();

        let err = assert_err!(
            ds.call("getSchema", vec![Value::Object(foreign.object().clone())])
                .await
        );
        assert!(matches!(err, DpiError::Encoding(_)));
        assert_eq!(first_channel.call_count(), 0);
        assert_ne!(ds.object(), foreign.object());
    }

    #[tokio::test]
    async fn test_container_navigation_skips_round_trip() {
        let (context, channel) = scripted_context();
        let ds = context.open_data_source("proj1").await.unwrap();
        let schema = assert_ok!(context.decode_as::<SchemaInterface>(public_schema()));

        let parent = schema.data_source().await.unwrap();

        assert!(parent.ptr_eq(&ds));
        assert_eq!(channel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_nested_envelopes_are_bound_and_cached() {
        let (context, channel) = scripted_context();
        let raw = json!({
            "handle": "obj-3",
            "type": "PostgreTable",
            "interfaces": ["Table"],
            "properties": {
                "name": "users",
                "rowCount": 42,
                "schema": {
                    "handle": "obj-2",
                    "type": "PostgreSchema",
                    "interfaces": ["Schema"],
                    "properties": {"name": "public", "table": {"handle": "obj-3"}}
                }
            }
        });

        let table = context.decode_as::<TableInterface>(raw).unwrap();
        let schema = table.schema().await.unwrap();

        assert_eq!(table.row_count().await.unwrap(), 42);
        assert_eq!(schema.name().await.unwrap(), "public");
        assert!(context.resolve(&Handle::from("obj-2")).unwrap().ptr_eq(&schema));
        let back = schema.property("table").unwrap().unwrap();
        assert!(back.as_object().unwrap().ptr_eq(&table));
        assert_eq!(channel.call_count(), 0);

        context.close();
        assert!(matches!(
            table.property("schema"),
            Err(DpiError::StaleProxy { .. })
        ));
        assert_eq!(table.name().await.unwrap(), "users");
    }

    #[tokio::test]
    async fn test_list_results_decode_with_return_hint() {
        let (context, channel) = scripted_context();
        let schema = context.decode_as::<SchemaInterface>(public_schema()).unwrap();
        channel.respond(
            "obj-2",
            "getTables",
            json!([
                {"handle": "obj-3", "type": "PostgreTable", "properties": {"name": "users"}},
                {"handle": "obj-4", "type": "PostgreTable", "properties": {"name": "orders"}}
            ]),
        );

        let tables = schema.tables().await.unwrap();

        assert_eq!(tables.len(), 2);
        assert!(tables.iter().all(|table| table.implements("Table")));
        assert_eq!(tables[1].name().await.unwrap(), "orders");
    }

    #[tokio::test]
    async fn test_column_accessors_use_cache() {
        let channel = ScriptedChannel::new();
        let context = crate::context::Context::new(
            "proj1",
            channel.clone(),
            Arc::new(crate::model::standard_catalog()),
        );
        let column = context
            .decode_as::<crate::model::ColumnInterface>(json!({
                "handle": "obj-9",
                "type": "PostgreColumn",
                "interfaces": ["Column"],
                "properties": {"name": "id", "typeName": "int8", "nullable": false}
            }))
            .unwrap();

        assert_eq!(column.name().await.unwrap(), "id");
        assert_eq!(column.data_type().await.unwrap(), "int8");
        assert!(!column.nullable().await.unwrap());
        assert!(matches!(
            column.table().await,
            Err(DpiError::UnsupportedRemoteOperation { .. })
        ));
        assert_eq!(channel.call_count(), 1);
    }

    #[test]
    fn test_cast_checks_interfaces() {
        let (context, _channel) = scripted_context();
        let schema = context.decode(public_schema()).unwrap().into_object().unwrap();

        assert!(schema.cast::<SchemaInterface>().is_some());
        assert!(schema.cast::<TableInterface>().is_none());
    }
}
