//! Identity registry binding objects to per-context handles.
//!
//! Lookup is keyed by object identity, never by equality: two distinct
//! objects with identical contents get two handles. Handles are
//! `obj-<n>` with `n` increasing per registry and never reused.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque identifier of one object, unique within a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Wrap a raw handle string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw handle string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Handle {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Handle {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// Peers may send integer handles.
impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(number) => Self(number.to_string()),
        })
    }
}

/// Pointer identity of a registered object.
pub trait Identity {
    /// Address-like key, stable for the lifetime of the object.
    fn identity(&self) -> usize;
}

impl<T: ?Sized> Identity for Arc<T> {
    fn identity(&self) -> usize {
        Arc::as_ptr(self).cast::<()>() as usize
    }
}

struct Inner<T> {
    handles: HashMap<usize, Handle>,
    objects: HashMap<Handle, T>,
}

/// Bidirectional object/handle map for one context and direction.
///
/// Registered objects are held strongly so their identities cannot be
/// recycled while the handle is live.
pub struct IdentityRegistry<T> {
    inner: Mutex<Inner<T>>,
    next_id: AtomicU64,
}

impl<T: Identity + Clone> Default for IdentityRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Identity + Clone> IdentityRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handles: HashMap::new(),
                objects: HashMap::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_handle(&self) -> Handle {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Handle(format!("obj-{n}"))
    }

    /// Handle for `object`, creating one if it has never been seen.
    ///
    /// The flag is `true` when the handle was created by this call.
    pub fn get_or_create_handle(&self, object: &T) -> (Handle, bool) {
        let key = object.identity();
        let mut inner = self.lock();
        if let Some(handle) = inner.handles.get(&key) {
            return (handle.clone(), false);
        }
        let handle = self.next_handle();
        inner.handles.insert(key, handle.clone());
        inner.objects.insert(handle.clone(), object.clone());
        drop(inner);
        tracing::trace!(handle = %handle, "Assigned handle");
        (handle, true)
    }

    /// Whether `object` already has a handle.
    pub fn has_handle(&self, object: &T) -> bool {
        self.lock().handles.contains_key(&object.identity())
    }

    /// Existing handle of `object`, if any.
    pub fn handle_of(&self, object: &T) -> Option<Handle> {
        self.lock().handles.get(&object.identity()).cloned()
    }

    /// Object bound to `handle`, if any.
    pub fn resolve(&self, handle: &Handle) -> Option<T> {
        self.lock().objects.get(handle).cloned()
    }

    /// Bind `object` to `handle`.
    ///
    /// The first binding wins: if the handle is already bound, the existing
    /// object is returned and `object` is discarded.
    pub fn register(&self, handle: Handle, object: T) -> T {
        self.resolve_or_insert_with(&handle, || object).0
    }

    /// Atomic create-if-absent for a handle.
    ///
    /// `create` runs under the registry lock, so concurrent callers for the
    /// same unseen handle observe a single instance. The flag is `true` when
    /// this call created it.
    pub fn resolve_or_insert_with<F>(&self, handle: &Handle, create: F) -> (T, bool)
    where
        F: FnOnce() -> T,
    {
        let mut inner = self.lock();
        if let Some(existing) = inner.objects.get(handle) {
            return (existing.clone(), false);
        }
        let object = create();
        inner.handles.insert(object.identity(), handle.clone());
        inner.objects.insert(handle.clone(), object.clone());
        (object, true)
    }

    /// Drop the binding for `handle`.
    pub fn forget(&self, handle: &Handle) -> Option<T> {
        let mut inner = self.lock();
        let object = inner.objects.remove(handle)?;
        inner.handles.remove(&object.identity());
        Some(object)
    }

    /// Number of bound handles.
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every binding. Handle numbering continues where it left off.
    pub fn clear(&self) {
        let drained = {
            let mut inner = self.lock();
            inner.handles.clear();
            std::mem::take(&mut inner.objects)
        };
        drop(drained);
    }
}
