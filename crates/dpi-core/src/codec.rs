//! Wire codec.
//!
//! The worker encodes hosted objects with an [`Encoder`]: the first time an
//! object is sent it travels with its type, interfaces and properties, later
//! references carry only the handle. The host decodes envelopes into proxies
//! with a `Decoder`, creating at most one proxy per handle.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    cache::{CachedValue, PropertyCache},
    context::{ContextId, ContextInner},
    envelope::{Envelope, WireValue},
    error::{DpiError, DpiResult},
    interface::InterfaceDescriptor,
    local::{LocalRef, LocalValue, PropertyCollector},
    registry::{Handle, Identity, IdentityRegistry},
    stub::{RemoteObject, RemoteValue, StubSeed},
    value::Value,
};

/// Encodes hosted objects against the worker's export registry.
pub struct Encoder<'a> {
    registry: &'a IdentityRegistry<LocalRef>,
    collector: &'a dyn PropertyCollector,
}

impl<'a> Encoder<'a> {
    #[must_use]
    pub const fn new(
        registry: &'a IdentityRegistry<LocalRef>,
        collector: &'a dyn PropertyCollector,
    ) -> Self {
        Self {
            registry,
            collector,
        }
    }

    /// Encode one object reference.
    ///
    /// The handle is registered before the object's properties are encoded,
    /// so a reference back to the object while encoding them comes out bare.
    /// If encoding fails, every handle it registered is released again, so
    /// no object is ever first sent bare.
    ///
    /// # Errors
    /// Returns an encoding error if the object, or any object reachable
    /// through its properties, declares no interface or the collector yields
    /// nothing for it.
    pub fn encode(&self, object: &LocalRef) -> DpiResult<Envelope> {
        self.rolling_back(|fresh| self.encode_object(object, fresh))
    }

    /// Encode a value, recursing into objects and lists.
    ///
    /// # Errors
    /// Propagates encoding errors from nested objects; handles registered
    /// before the failure are released.
    pub fn encode_value(&self, value: &LocalValue) -> DpiResult<WireValue> {
        self.rolling_back(|fresh| self.encode_nested(value, fresh))
    }

    fn rolling_back<T>(
        &self,
        encode: impl FnOnce(&mut Vec<Handle>) -> DpiResult<T>,
    ) -> DpiResult<T> {
        let mut fresh = Vec::new();
        let result = encode(&mut fresh);
        if result.is_err() {
            for handle in &fresh {
                self.registry.forget(handle);
            }
            if !fresh.is_empty() {
                tracing::debug!(released = fresh.len(), "Released handles of failed encoding");
            }
        }
        result
    }

    fn encode_object(&self, object: &LocalRef, fresh: &mut Vec<Handle>) -> DpiResult<Envelope> {
        if let Some(handle) = self.registry.handle_of(object) {
            return Ok(Envelope::bare(handle));
        }
        if object.interfaces().is_empty() {
            return Err(DpiError::Encoding(format!(
                "{} declares no remote interface",
                object.type_name()
            )));
        }
        let properties = self.collector.collect(object).ok_or_else(|| {
            DpiError::Encoding(format!("no properties collected for {}", object.type_name()))
        })?;

        let (handle, created) = self.registry.get_or_create_handle(object);
        if !created {
            return Ok(Envelope::bare(handle));
        }
        fresh.push(handle.clone());
        tracing::debug!(handle = %handle, type_name = object.type_name(), "Exporting object");
        self.describe(object, &handle, properties, fresh)
    }

    fn describe(
        &self,
        object: &LocalRef,
        handle: &Handle,
        properties: Vec<(String, LocalValue)>,
        fresh: &mut Vec<Handle>,
    ) -> DpiResult<Envelope> {
        let mut encoded = BTreeMap::new();
        for (name, value) in properties {
            encoded.insert(name, self.encode_nested(&value, fresh)?);
        }

        let containers = object
            .containers()
            .into_iter()
            .filter_map(|(accessor, parent)| {
                let parent_handle = if parent.identity() == object.identity() {
                    Some(handle.clone())
                } else {
                    self.registry.handle_of(&parent)
                };
                parent_handle.map(|h| (accessor, h))
            })
            .collect();

        Ok(Envelope {
            handle: handle.clone(),
            type_name: Some(object.type_name().to_string()),
            display: Some(object.display()),
            interfaces: object.interfaces().iter().map(ToString::to_string).collect(),
            containers,
            properties: Some(encoded),
        })
    }

    fn encode_nested(&self, value: &LocalValue, fresh: &mut Vec<Handle>) -> DpiResult<WireValue> {
        Ok(match value {
            Value::Null => WireValue::Null,
            Value::Bool(flag) => WireValue::Bool(*flag),
            Value::Int(n) => WireValue::Int(*n),
            Value::Float(n) => WireValue::Float(*n),
            Value::Text(text) => WireValue::Text(text.clone()),
            Value::List(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.encode_nested(item, fresh))
                    .collect::<DpiResult<_>>()?,
            ),
            Value::Object(object) => WireValue::Object(Box::new(self.encode_object(object, fresh)?)),
        })
    }
}

/// Resolve an argument sent by the host against the worker's exports.
///
/// # Errors
/// Returns a protocol error for a handle the worker never exported.
pub fn decode_argument(
    registry: &IdentityRegistry<LocalRef>,
    wire: WireValue,
) -> DpiResult<LocalValue> {
    Ok(match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(flag) => Value::Bool(flag),
        WireValue::Int(n) => Value::Int(n),
        WireValue::Float(n) => Value::Float(n),
        WireValue::Text(text) => Value::Text(text),
        WireValue::List(items) => Value::List(
            items
                .into_iter()
                .map(|item| decode_argument(registry, item))
                .collect::<DpiResult<_>>()?,
        ),
        WireValue::Object(envelope) => Value::Object(
            registry
                .resolve(&envelope.handle)
                .ok_or_else(|| DpiError::Protocol(format!("unknown handle {}", envelope.handle)))?,
        ),
    })
}

/// Encode a host-side argument. Proxies travel as bare handles.
///
/// # Errors
/// Returns an encoding error for a proxy owned by a different context.
pub fn encode_argument(context: ContextId, value: &RemoteValue) -> DpiResult<WireValue> {
    Ok(match value {
        Value::Null => WireValue::Null,
        Value::Bool(flag) => WireValue::Bool(*flag),
        Value::Int(n) => WireValue::Int(*n),
        Value::Float(n) => WireValue::Float(*n),
        Value::Text(text) => WireValue::Text(text.clone()),
        Value::List(items) => WireValue::List(
            items
                .iter()
                .map(|item| encode_argument(context, item))
                .collect::<DpiResult<_>>()?,
        ),
        Value::Object(proxy) => {
            if proxy.context_id() != context {
                return Err(DpiError::Encoding(format!(
                    "{} {} belongs to another context",
                    proxy.type_name(),
                    proxy.handle()
                )));
            }
            WireValue::Object(Box::new(Envelope::bare(proxy.handle().clone())))
        }
    })
}

fn cached_value(wire: &WireValue) -> CachedValue {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(flag) => Value::Bool(*flag),
        WireValue::Int(n) => Value::Int(*n),
        WireValue::Float(n) => Value::Float(*n),
        WireValue::Text(text) => Value::Text(text.clone()),
        WireValue::List(items) => Value::List(items.iter().map(cached_value).collect()),
        WireValue::Object(envelope) => Value::Object(envelope.handle.clone()),
    }
}

/// Decodes envelopes into proxies of one context.
pub(crate) struct Decoder<'a> {
    context: &'a Arc<ContextInner>,
}

impl<'a> Decoder<'a> {
    pub(crate) const fn new(context: &'a Arc<ContextInner>) -> Self {
        Self { context }
    }

    pub(crate) fn decode(
        &self,
        raw: serde_json::Value,
        hint: Option<&'static InterfaceDescriptor>,
    ) -> DpiResult<RemoteValue> {
        self.decode_value(WireValue::try_from(raw)?, hint)
    }

    pub(crate) fn decode_value(
        &self,
        wire: WireValue,
        hint: Option<&'static InterfaceDescriptor>,
    ) -> DpiResult<RemoteValue> {
        Ok(match wire {
            WireValue::Null => Value::Null,
            WireValue::Bool(flag) => Value::Bool(flag),
            WireValue::Int(n) => Value::Int(n),
            WireValue::Float(n) => Value::Float(n),
            WireValue::Text(text) => Value::Text(text),
            WireValue::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.decode_value(item, hint))
                    .collect::<DpiResult<_>>()?,
            ),
            WireValue::Object(envelope) => Value::Object(self.decode_envelope(*envelope, hint)?),
        })
    }

    /// Proxy for `envelope`.
    ///
    /// A handle that is already bound returns the bound proxy untouched;
    /// the envelope's description is not re-applied.
    pub(crate) fn decode_envelope(
        &self,
        envelope: Envelope,
        hint: Option<&'static InterfaceDescriptor>,
    ) -> DpiResult<RemoteObject> {
        let Envelope {
            handle,
            type_name,
            display,
            interfaces,
            containers,
            properties,
        } = envelope;
        let properties = properties.unwrap_or_default();
        let cache: PropertyCache = properties
            .iter()
            .map(|(name, wire)| (name.clone(), cached_value(wire)))
            .collect();

        let (object, created) = self.context.registry.resolve_or_insert_with(&handle, || {
            let seed = StubSeed {
                type_name,
                display,
                interfaces,
                containers,
                cache,
            };
            self.context
                .stubs
                .build(self.context, handle.clone(), seed, hint)
        });
        if !created {
            tracing::trace!(handle = %handle, "Handle already bound");
        }

        // Nested first transmissions still need their proxies bound.
        for wire in properties.into_values() {
            self.bind_nested(wire)?;
        }
        Ok(object)
    }

    fn bind_nested(&self, wire: WireValue) -> DpiResult<()> {
        match wire {
            WireValue::Object(envelope) => self.decode_envelope(*envelope, None).map(drop),
            WireValue::List(items) => items.into_iter().try_for_each(|item| self.bind_nested(item)),
            _ => Ok(()),
        }
    }
}
