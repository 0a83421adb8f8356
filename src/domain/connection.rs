// src/domain/connection.rs

//! Broker connection abstraction.
//!
//! A [`BrokerConnection`] is the raw, usually non-thread-safe handle supplied
//! by a broker SDK. The crate only ever uses it to create channels, to learn
//! about broker-initiated shutdown, and to clean it up. Wire framing stays
//! inside the SDK.
//!
//! Implementations are wrapped by [`ConnectionContext`](crate::ConnectionContext),
//! which guarantees that [`BrokerConnection::create_channel`] only runs on the
//! context's affinity thread and that [`BrokerConnection::cleanup`] runs at
//! most once.

use std::fmt;
use std::sync::Arc;

use crate::Result;

/// Reply code used for a normal, caller-initiated close.
pub const REPLY_SUCCESS: u16 = 200;

/// Why the broker closed a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShutdownReason {
    /// Broker reply code (AMQP style, e.g. `320` for connection forced).
    pub code: u16,
    /// Broker reply text.
    pub text: Arc<str>,
}

impl ShutdownReason {
    /// Create a shutdown reason.
    pub fn new(code: u16, text: impl Into<Arc<str>>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// Raw broker connection handle.
///
/// # Notes
///
/// This trait uses `async_trait`; treat [`closed`](Self::closed) as a normal
/// `async fn`.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Channel (model, session) type produced by this connection.
    type Channel: Send + 'static;

    /// Create a channel. Called only from the affinity thread.
    fn create_channel(&self) -> Result<Self::Channel>;

    /// Resolves when the broker shuts the connection down on its own.
    ///
    /// Must be cancel-safe; the future is dropped when the owning context is
    /// disposed first.
    async fn closed(&self) -> ShutdownReason;

    /// Release the connection with the given reply code and text.
    fn cleanup(&self, code: u16, reason: &str);

    /// Short description of the remote endpoint, for logs.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}
