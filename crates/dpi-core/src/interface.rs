//! Capability interfaces and their forwarding tables.

use std::collections::{HashMap, HashSet};

/// One forwardable operation of an interface.
///
/// Operations are identified on the wire by method name; arity
/// disambiguates overloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub method: &'static str,
    pub arity: usize,
    /// Interface of the objects this operation returns, if any.
    pub returns: Option<&'static str>,
}

impl OperationDescriptor {
    /// A zero-argument accessor returning a plain value.
    #[must_use]
    pub const fn accessor(method: &'static str) -> Self {
        Self {
            method,
            arity: 0,
            returns: None,
        }
    }

    /// A call returning objects of interface `returns`.
    #[must_use]
    pub const fn navigation(method: &'static str, arity: usize, returns: &'static str) -> Self {
        Self {
            method,
            arity,
            returns: Some(returns),
        }
    }
}

/// Declared capability interface.
#[derive(Debug)]
pub struct InterfaceDescriptor {
    pub name: &'static str,
    pub extends: &'static [&'static str],
    pub operations: &'static [OperationDescriptor],
}

impl InterfaceDescriptor {
    /// Operation with this method name and arity.
    #[must_use]
    pub fn operation(&self, method: &str, arity: usize) -> Option<&'static OperationDescriptor> {
        self.operations
            .iter()
            .find(|op| op.method == method && op.arity == arity)
    }
}

/// Compile-time capability marker.
pub trait RemoteInterface: Send + Sync + 'static {
    const DESCRIPTOR: &'static InterfaceDescriptor;
}

/// Property read by a zero-argument accessor: `getRowCount` -> `rowCount`,
/// `isNullable` -> `nullable`.
#[must_use]
pub fn accessor_property(method: &str) -> Option<String> {
    let rest = method
        .strip_prefix("get")
        .or_else(|| method.strip_prefix("is"))?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_uppercase() {
        return None;
    }
    Some(first.to_lowercase().chain(chars).collect())
}

/// Interfaces resolved for one proxy.
#[derive(Debug, Default)]
pub struct ResolvedInterfaces {
    pub descriptors: Vec<&'static InterfaceDescriptor>,
    /// Declared names with no local descriptor.
    pub unresolved: Vec<String>,
}

/// Locally known interfaces and remote type bindings.
#[derive(Debug, Default, Clone)]
pub struct InterfaceCatalog {
    interfaces: HashMap<&'static str, &'static InterfaceDescriptor>,
    type_bindings: HashMap<String, Vec<String>>,
}

impl InterfaceCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Self::register`].
    #[must_use]
    pub fn with<T: RemoteInterface>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Make `T` resolvable by name.
    pub fn register<T: RemoteInterface>(&mut self) -> &mut Self {
        self.register_descriptor(T::DESCRIPTOR)
    }

    pub fn register_descriptor(&mut self, descriptor: &'static InterfaceDescriptor) -> &mut Self {
        self.interfaces.insert(descriptor.name, descriptor);
        self
    }

    /// Declare that remote objects of `type_name` implement `interfaces`.
    pub fn bind_type<I, S>(&mut self, type_name: impl Into<String>, interfaces: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_bindings
            .entry(type_name.into())
            .or_default()
            .extend(interfaces.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&'static InterfaceDescriptor> {
        self.interfaces.get(name).copied()
    }

    /// Interfaces implied by a remote type name.
    #[must_use]
    pub fn interfaces_for_type(&self, type_name: &str) -> Vec<String> {
        let mut names = self.type_bindings.get(type_name).cloned().unwrap_or_default();
        if self.interfaces.contains_key(type_name) {
            names.push(type_name.to_string());
        }
        names
    }

    /// Resolve names to descriptors, following `extends`.
    pub fn resolve<'a, I>(&self, names: I) -> ResolvedInterfaces
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        let mut resolved = ResolvedInterfaces::default();
        let mut queue: Vec<&str> = names.into_iter().collect();
        queue.reverse();

        while let Some(name) = queue.pop() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            match self.lookup(name) {
                Some(descriptor) => {
                    resolved.descriptors.push(descriptor);
                    queue.extend(descriptor.extends.iter().rev().copied());
                }
                None => resolved.unresolved.push(name.to_string()),
            }
        }
        resolved
    }
}
