// src/domain/source.rs

//! Message source contracts.
//!
//! A [`MessageSource`] is anything that pushes inbound messages to
//! registered consumers: a broker queue, or the in-process
//! [`InMemoryQueue`](crate::InMemoryQueue). Receive transports register
//! themselves as a [`QueueConsumer`] when started and disconnect the returned
//! [`ConnectHandle`] when stopped.
//!
//! Implementations should assume:
//! - messages may arrive concurrently on several tasks
//! - a source may have other consumers besides this one
//! - delivery is best-effort unless the source documents otherwise

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    Address,
    ConnectHandle,
    Result,
    TransportMessage,
};

/// A consumer of messages pushed by a [`MessageSource`].
#[async_trait::async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Handle one inbound message.
    ///
    /// Dispatch failures are recorded on the message (delivery count) and are
    /// not returned to the source.
    async fn consume(&self, message: Arc<TransportMessage>, token: &CancellationToken);
}

/// Source of inbound messages.
pub trait MessageSource: Send + Sync {
    /// Address of the queue this source reads from.
    fn address(&self) -> &Address;

    /// Register `consumer` as a receiver of this source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`](crate::Error::Connect) if the source cannot
    /// accept consumers (for example, because it has been closed).
    fn connect_consumer(&self, consumer: Arc<dyn QueueConsumer>) -> Result<ConnectHandle>;
}
