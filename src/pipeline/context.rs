// src/pipeline/context.rs

//! Per-dispatch receive context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    Address,
    PayloadCache,
    PayloadContext,
    TransportMessage,
};

/// Scoped view of one inbound message while it travels the receive pipe.
///
/// A receive context lives exactly as long as one dispatch. It is created by
/// the receive transport and dropped on every exit path (success, failure,
/// cancellation), which releases its payloads.
pub struct ReceiveContext {
    message: Arc<TransportMessage>,
    input_address: Address,
    token: CancellationToken,
    payloads: PayloadCache,
    received_at: Instant,
}

impl ReceiveContext {
    /// Create a context for `message` received on `input_address`.
    pub fn new(
        message: Arc<TransportMessage>,
        input_address: Address,
        token: CancellationToken,
    ) -> Self {
        Self {
            message,
            input_address,
            token,
            payloads: PayloadCache::new(),
            received_at: Instant::now(),
        }
    }

    /// The inbound message.
    pub fn message(&self) -> &Arc<TransportMessage> {
        &self.message
    }

    /// Payload bytes of the inbound message.
    pub fn body(&self) -> &Bytes {
        self.message.body()
    }

    /// Address the message was received on.
    pub fn input_address(&self) -> &Address {
        &self.input_address
    }

    /// Cancelled when the dispatch should be abandoned (source shutdown or transport stop).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// True if an earlier dispatch of this message failed.
    pub fn is_redelivered(&self) -> bool {
        self.message.is_redelivered()
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

impl PayloadContext for ReceiveContext {
    fn payloads(&self) -> &PayloadCache {
        &self.payloads
    }
}

impl std::fmt::Debug for ReceiveContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveContext")
            .field("message_id", &self.message.message_id())
            .field("input_address", &self.input_address)
            .field("delivery_count", &self.message.delivery_count())
            .finish()
    }
}
