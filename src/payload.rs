//! Type-keyed payload cache.
//!
//! A [`PayloadCache`] lets collaborators attach derived state to a context
//! object (a connection, a receive context) without the context knowing the
//! type of that state. There is at most one payload per Rust type.
//!
//! ## Rules
//! - The first factory to complete wins; later callers observe the same `Arc`.
//! - A factory runs while the write lock is held, so concurrent first access
//!   runs it exactly once.
//! - A factory that fails (or panics) leaves nothing cached; the next caller
//!   runs its own factory.
//! - Factories must not access the same cache; doing so deadlocks.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Payload = Arc<dyn Any + Send + Sync>;

/// Thread-safe map from payload type to a single shared instance.
#[derive(Default)]
pub struct PayloadCache {
    payloads: RwLock<HashMap<TypeId, Payload>>,
}

impl PayloadCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a payload of the given type identity is cached.
    pub fn has_payload_type(&self, payload_type: TypeId) -> bool {
        self.read().contains_key(&payload_type)
    }

    /// True if a payload of type `T` is cached.
    pub fn has_payload<T: Any + Send + Sync>(&self) -> bool {
        self.has_payload_type(TypeId::of::<T>())
    }

    /// Returns the cached payload of type `T`, if any.
    pub fn try_get_payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let payload = self.read().get(&TypeId::of::<T>()).cloned()?;
        payload.downcast::<T>().ok()
    }

    /// Returns the cached payload of type `T`, creating it with `factory` if absent.
    pub fn get_or_add_payload<T, F>(&self, factory: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        match self.try_get_or_add_payload(|| Ok::<T, std::convert::Infallible>(factory())) {
            Ok(payload) => payload,
            Err(never) => match never {},
        }
    }

    /// Fallible variant of [`get_or_add_payload`](Self::get_or_add_payload).
    ///
    /// The factory error is returned to this caller only; nothing is cached.
    pub fn try_get_or_add_payload<T, E, F>(&self, factory: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        // ---
        if let Some(existing) = self.try_get_payload::<T>() {
            return Ok(existing);
        }

        let mut payloads = self.write();

        // Another caller may have won the race between the two locks.
        if let Some(existing) = payloads.get(&TypeId::of::<T>()) {
            if let Ok(existing) = Arc::clone(existing).downcast::<T>() {
                return Ok(existing);
            }
        }

        let created = Arc::new(factory()?);
        let erased: Payload = created.clone();
        payloads.insert(TypeId::of::<T>(), erased);

        Ok(created)
    }

    /// Number of cached payload types.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panicking factory poisons the lock without inserting; the map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TypeId, Payload>> {
        match self.payloads.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, Payload>> {
        match self.payloads.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for PayloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCache")
            .field("len", &self.len())
            .finish()
    }
}

/// Payload access for context objects that own a [`PayloadCache`].
///
/// Implementors only provide [`payloads`](Self::payloads); the remaining
/// methods delegate to it.
pub trait PayloadContext {
    /// Returns the cache backing this context.
    fn payloads(&self) -> &PayloadCache;

    /// True if a payload of the given type identity is attached.
    fn has_payload_type(&self, payload_type: TypeId) -> bool {
        self.payloads().has_payload_type(payload_type)
    }

    /// Returns the attached payload of type `T`, if any.
    fn try_get_payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>>
    where
        Self: Sized,
    {
        self.payloads().try_get_payload::<T>()
    }

    /// Returns the attached payload of type `T`, creating it if absent.
    fn get_or_add_payload<T, F>(&self, factory: F) -> Arc<T>
    where
        Self: Sized,
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.payloads().get_or_add_payload(factory)
    }
}
