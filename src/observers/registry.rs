// src/observers/registry.rs

//! Connect/disconnect observer registry with sequential fan-out.
//!
//! ## Rules
//! - Observers are notified in registration order, one at a time; each
//!   handler runs to completion before the next starts.
//! - An observer that returns an error or panics is logged and skipped; the
//!   remaining observers are still notified.
//! - Notification works on a snapshot: observers connected or disconnected
//!   while a notification is running take effect on the next one.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;

use crate::error::panic_message;
use crate::{
    // ---
    log_error,
    log_warn,
    ConnectHandle,
    Error,
    Result,
};

struct Entries<O: ?Sized> {
    next_id: u64,
    observers: Vec<(u64, Arc<O>)>,
}

/// Registry of observers of type `O` (usually a `dyn Trait`).
pub struct ObserverRegistry<O: ?Sized> {
    entries: Arc<Mutex<Entries<O>>>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<O: ?Sized + Send + Sync + 'static> ObserverRegistry<O> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    /// Connect an observer. Dropping or disconnecting the handle removes it.
    pub fn connect(&self, observer: Arc<O>) -> ConnectHandle {
        // ---
        let id = {
            let mut entries = lock_ignore_poison(&self.entries);
            let id = entries.next_id;
            entries.next_id += 1;
            entries.observers.push((id, observer));
            id
        };

        let entries = Arc::downgrade(&self.entries);
        ConnectHandle::new(move || {
            if let Some(entries) = entries.upgrade() {
                lock_ignore_poison(&entries)
                    .observers
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Observers currently connected, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<O>> {
        lock_ignore_poison(&self.entries)
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    /// Number of connected observers.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.entries).observers.len()
    }

    /// True if no observer is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `notify` against every connected observer.
    ///
    /// Returns the failures, in observer order. `event` names the
    /// notification in log lines.
    pub async fn notify<F, Fut>(&self, event: &'static str, mut notify: F) -> Vec<Error>
    where
        F: FnMut(Arc<O>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        // ---
        let mut failures = Vec::new();

        for observer in self.snapshot() {
            match AssertUnwindSafe(notify(observer)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log_warn!("{event} observer failed: {err}");
                    failures.push(err);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log_error!("{event} observer panicked: {message}");
                    failures.push(Error::Observer(message));
                }
            }
        }

        failures
    }
}

impl<O: ?Sized + Send + Sync + 'static> Default for ObserverRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ?Sized> Clone for ObserverRegistry<O> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<O: ?Sized> std::fmt::Debug for ObserverRegistry<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("len", &lock_ignore_poison(&self.entries).observers.len())
            .finish()
    }
}
