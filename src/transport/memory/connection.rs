// src/transport/memory/connection.rs

//! In-process broker connection.
//!
//! [`MemoryConnection`] implements [`BrokerConnection`] without a broker.
//! It hands out numbered channels, can be told that "the broker" shut it
//! down, and records every cleanup call. Clones share state, so a test can
//! keep one clone while a [`ConnectionContext`](crate::ConnectionContext)
//! owns the other.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use tokio::sync::watch;

use crate::{
    // ---
    BrokerConnection,
    Error,
    Result,
    ShutdownReason,
};

/// Channel produced by a [`MemoryConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChannel {
    id: u64,
    created_on: ThreadId,
}

impl MemoryChannel {
    /// Sequence number, starting at 1 per connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread the channel was created on.
    pub fn created_on(&self) -> ThreadId {
        self.created_on
    }
}

struct Shared {
    open: AtomicBool,
    next_channel: AtomicU64,
    shutdown: watch::Sender<Option<ShutdownReason>>,
    cleanups: Mutex<Vec<(u16, String)>>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-process [`BrokerConnection`].
#[derive(Clone)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                open: AtomicBool::new(true),
                next_channel: AtomicU64::new(1),
                shutdown,
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Act as if the broker closed the connection.
    ///
    /// Resolves every pending and future [`BrokerConnection::closed`] call
    /// with `reason`. Only the first shutdown is reported.
    pub fn simulate_shutdown(&self, code: u16, text: &str) {
        // ---
        let reason = ShutdownReason::new(code, text);
        self.shared.shutdown.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// True until [`BrokerConnection::cleanup`] has been called.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Number of channels created so far.
    pub fn channels_created(&self) -> u64 {
        self.shared.next_channel.load(Ordering::Acquire) - 1
    }

    /// Every cleanup call received, in order.
    pub fn cleanup_calls(&self) -> Vec<(u16, String)> {
        lock_ignore_poison(&self.shared.cleanups).clone()
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BrokerConnection for MemoryConnection {
    type Channel = MemoryChannel;

    fn create_channel(&self) -> Result<MemoryChannel> {
        // ---
        if !self.is_open() {
            return Err(Error::Channel("connection is not open".into()));
        }
        Ok(MemoryChannel {
            id: self.shared.next_channel.fetch_add(1, Ordering::AcqRel),
            created_on: std::thread::current().id(),
        })
    }

    async fn closed(&self) -> ShutdownReason {
        // ---
        let mut rx = self.shared.shutdown.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    fn cleanup(&self, code: u16, reason: &str) {
        self.shared.open.store(false, Ordering::Release);
        lock_ignore_poison(&self.shared.cleanups).push((code, reason.to_string()));
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("open", &self.is_open())
            .field("channels_created", &self.channels_created())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_closed_resolves_with_first_shutdown() {
        // ---
        let connection = MemoryConnection::new();
        let waiter = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.closed().await })
        };

        connection.simulate_shutdown(320, "CONNECTION_FORCED");
        connection.simulate_shutdown(541, "INTERNAL_ERROR");

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::new(320, "CONNECTION_FORCED"));
        assert_eq!(connection.closed().await.code, 320);
    }

    #[test]
    fn test_cleanup_closes_channel_factory() {
        // ---
        let connection = MemoryConnection::new();
        assert_eq!(connection.create_channel().unwrap().id(), 1);

        connection.cleanup(200, "bye");
        assert!(matches!(connection.create_channel(), Err(Error::Channel(_))));
        assert_eq!(connection.channels_created(), 1);
        assert_eq!(connection.cleanup_calls(), vec![(200, "bye".to_string())]);
    }
}
