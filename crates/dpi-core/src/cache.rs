//! Per-proxy property read-through cache.
//!
//! A snapshot of the properties inlined in the first envelope for a handle.
//! Object-valued properties are kept as handles and resolved through the
//! owning context when read.

use std::collections::BTreeMap;

use crate::{interface::accessor_property, registry::Handle, value::Value};

/// A cached property value.
pub type CachedValue = Value<Handle>;

/// Immutable snapshot of one proxy's inlined properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyCache {
    entries: BTreeMap<String, CachedValue>,
}

impl PropertyCache {
    #[must_use]
    pub const fn new(entries: BTreeMap<String, CachedValue>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CachedValue> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Cached value answering a zero-argument accessor call.
    ///
    /// `getName` and `isNullable` read `name` and `nullable`; a method name
    /// that is itself a property key reads that key.
    #[must_use]
    pub fn lookup_accessor(&self, method: &str) -> Option<&CachedValue> {
        accessor_property(method)
            .and_then(|property| self.entries.get(&property))
            .or_else(|| self.entries.get(method))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, CachedValue)> for PropertyCache {
    fn from_iter<I: IntoIterator<Item = (String, CachedValue)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
