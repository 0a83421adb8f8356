// src/domain/message.rs

//! Message domain types.
//!
//! - [`Address`]: opaque identifier of a queue, endpoint or broker destination.
//! - [`MessageId`]: unique identity of a message.
//! - [`Envelope`]: an outbound message handed to a send transport.
//! - [`TransportMessage`]: an inbound message as seen by a receive transport,
//!   carrying the mutable delivery-attempt counter.
//!
//! Payloads are opaque bytes; serialization belongs to higher layers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A transport address.
///
/// Its interpretation is transport-specific (queue name, `loopback://` URI,
/// AMQP exchange), but it is treated as an opaque identifier here.
///
/// Addresses are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub Arc<str>);

impl Address {
    /// Borrow the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a new unique message ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message headers. Ordered for stable diagnostics.
pub type Headers = BTreeMap<String, String>;

/// An outbound message envelope.
///
/// The transport does not interpret the payload or metadata; it only
/// delivers the envelope to `destination`.
///
/// # Example
///
/// ```
/// # use mom_transport::{Address, Envelope};
/// # use bytes::Bytes;
/// let envelope = Envelope::new(Address::from("orders"), Bytes::from_static(b"{}"))
///     .with_content_type("application/json")
///     .with_header("tenant", "acme");
///
/// assert_eq!(envelope.destination.as_str(), "orders");
/// assert_eq!(envelope.headers.get("tenant").map(String::as_str), Some("acme"));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Unique identity, generated on creation.
    pub message_id: MessageId,

    /// Delivery address used by the transport.
    pub destination: Address,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Correlation identifier used by higher layers.
    pub correlation_id: Option<Arc<str>>,

    /// Optional content type metadata (e.g. "application/json").
    pub content_type: Option<Arc<str>>,

    /// Application headers.
    pub headers: Headers,
}

impl Envelope {
    // ---
    /// Create an envelope for `destination` with a fresh message id.
    pub fn new(destination: Address, payload: Bytes) -> Self {
        Self {
            message_id: MessageId::generate(),
            destination,
            payload,
            correlation_id: None,
            content_type: None,
            headers: Headers::new(),
        }
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<Arc<str>>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// An inbound message held by a message source.
///
/// Shared (`Arc`) between the source and the receive transport. The
/// delivery count is the only mutable part and records failed dispatch
/// attempts; whether to redeliver is decided elsewhere.
#[derive(Debug)]
pub struct TransportMessage {
    envelope: Envelope,
    sent_at: SystemTime,
    delivery_count: AtomicU32,
}

impl TransportMessage {
    /// Wrap an envelope for delivery.
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            sent_at: SystemTime::now(),
            delivery_count: AtomicU32::new(0),
        }
    }

    /// Message identity.
    pub fn message_id(&self) -> MessageId {
        self.envelope.message_id
    }

    /// The wrapped envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Payload bytes.
    pub fn body(&self) -> &Bytes {
        &self.envelope.payload
    }

    /// When the message entered the source.
    pub fn sent_at(&self) -> SystemTime {
        self.sent_at
    }

    /// Number of failed dispatch attempts so far.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count.load(Ordering::Acquire)
    }

    /// Record one failed dispatch attempt; returns the new count.
    pub fn increment_delivery_count(&self) -> u32 {
        self.delivery_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// True if an earlier dispatch of this message failed.
    pub fn is_redelivered(&self) -> bool {
        self.delivery_count() > 0
    }
}

impl From<Envelope> for TransportMessage {
    fn from(envelope: Envelope) -> Self {
        Self::new(envelope)
    }
}
