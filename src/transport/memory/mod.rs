// src/transport/memory/mod.rs

//! In-process transport.
//!
//! Everything here runs without a broker and is the reference for how the
//! receive side is expected to behave:
//!
//! - [`InMemoryQueue`]: message source with buffering and round-robin fan-out
//! - [`InMemoryReceiveTransport`]: readiness-gated consumer of a source
//! - [`InMemorySendTransport`]: producer with send/publish observers
//! - [`MemoryConnection`]: broker connection stand-in for
//!   [`ConnectionContext`](crate::ConnectionContext)

mod connection;
mod queue;
mod receive;
mod send;

pub use connection::{MemoryChannel, MemoryConnection};
pub use queue::InMemoryQueue;
pub use receive::{InMemoryReceiveTransport, ReceiveTransportHandle};
pub use send::InMemorySendTransport;
