// src/domain/handle.rs

//! Disposable connection handles.

use std::fmt;
use std::sync::Mutex;

type Disconnect = Box<dyn FnOnce() + Send>;

/// Handle returned when something is connected to a registry or source.
///
/// The connection stays active until either:
/// - [`disconnect`](Self::disconnect) is called
/// - the handle is dropped
///
/// Disconnecting is idempotent.
#[must_use = "dropping a ConnectHandle disconnects immediately"]
pub struct ConnectHandle {
    disconnect: Mutex<Option<Disconnect>>,
}

impl ConnectHandle {
    /// Create a handle that runs `disconnect` exactly once.
    pub fn new<F>(disconnect: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            disconnect: Mutex::new(Some(Box::new(disconnect))),
        }
    }

    /// A handle with nothing to disconnect.
    pub fn noop() -> Self {
        Self {
            disconnect: Mutex::new(None),
        }
    }

    /// Disconnect now. Later calls (and drop) do nothing.
    pub fn disconnect(&self) {
        // ---
        let disconnect = match self.disconnect.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(disconnect) = disconnect {
            disconnect();
        }
    }

    /// True until [`disconnect`](Self::disconnect) has run.
    pub fn is_connected(&self) -> bool {
        match self.disconnect.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

impl Drop for ConnectHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ConnectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}
