//! Transport implementations.
//!
//! Broker SDK transports live outside this crate; they plug in through
//! [`BrokerConnection`](crate::BrokerConnection) and
//! [`MessageSource`](crate::MessageSource).

mod memory;

pub use memory::{
    // ---
    InMemoryQueue,
    InMemoryReceiveTransport,
    InMemorySendTransport,
    MemoryChannel,
    MemoryConnection,
    ReceiveTransportHandle,
};
