//! Domain layer public interface.
//!
//! Abstractions that are independent of any concrete transport or broker
//! SDK. All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod connection;
mod handle;
mod message;
mod source;

pub use connection::{BrokerConnection, ShutdownReason, REPLY_SUCCESS};
pub use handle::ConnectHandle;
pub use message::{Address, Envelope, Headers, MessageId, TransportMessage};
pub use source::{MessageSource, QueueConsumer};
