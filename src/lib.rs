//! Transport-connection and message-dispatch core for message-oriented middleware.
//!
//! This crate turns a raw, thread-affine broker connection (or an in-process
//! queue) into a lifecycle-managed, observable, cancellation-aware delivery
//! pipeline. Serialization, routing, retry policy and filter composition
//! belong to higher layers.
//!
//! Two building blocks carry most of the weight:
//!
//! - [`ConnectionContext`]: runs channel creation on one dedicated
//!   [`AffinityExecutor`] thread, merges caller cancellation with broker
//!   shutdown, carries a typed [`PayloadCache`] and tears down exactly once.
//! - [`InMemoryReceiveTransport`]: an [`Agent`]-driven consumer that waits
//!   for readiness, dispatches each message through a
//!   [`ReceivePipeDispatcher`], counts failed attempts on the message and
//!   reports [`DeliveryMetrics`] when stopped.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tokio_util::sync::CancellationToken;
//! use mom_transport::{
//!     pipe_fn, Address, EndpointContext, Envelope, InMemoryQueue, InMemoryReceiveTransport,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mom_transport::Result<()> {
//! let queue = Arc::new(InMemoryQueue::new("orders", 4));
//! let endpoint = Arc::new(EndpointContext::new(
//!     "orders",
//!     pipe_fn(|message| async move {
//!         println!("received {} bytes", message.body().len());
//!         Ok(())
//!     }),
//! ));
//!
//! let transport = InMemoryReceiveTransport::new("orders", queue.clone(), endpoint);
//! let handle = transport.start()?;
//! transport.ready().await?;
//!
//! queue.send(Envelope::new(Address::from("orders"), Bytes::from_static(b"{}")))?;
//!
//! handle.stop(&CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod affinity;
mod agent;
mod config;
mod connection;
mod domain;
mod error;
mod observers;
mod payload;
mod pipeline;
mod probe;
mod signal;
mod transport;

pub use error::{Error, Result};

pub use affinity::{AffinityExecutor, DEFAULT_QUEUE_CAPACITY};
pub use agent::{ActivityGuard, Agent, AgentState};
pub use config::{HostSettings, HostSettingsBuilder, DEFAULT_PORT, DEFAULT_TLS_PORT};
pub use connection::ConnectionContext;
pub use payload::{PayloadCache, PayloadContext};
pub use probe::{ProbeContext, ProbeScope};
pub use signal::{merge, on_cancelled, on_signal, MergedCancellation, Registration};

// --- public re-exports
pub use domain::{
    // ---
    Address,
    BrokerConnection,
    ConnectHandle,
    Envelope,
    Headers,
    MessageId,
    MessageSource,
    QueueConsumer,
    ShutdownReason,
    TransportMessage,
    REPLY_SUCCESS,
};

pub use observers::{
    // ---
    ObserverRegistry,
    PublishObserver,
    PublishObservers,
    ReceiveObserver,
    ReceiveObservers,
    ReceiveTransportCompleted,
    ReceiveTransportFaulted,
    ReceiveTransportObserver,
    ReceiveTransportObservers,
    ReceiveTransportReady,
    SendObserver,
    SendObservers,
};

pub use pipeline::{
    // ---
    pipe_fn,
    DeliveryMetrics,
    EndpointContext,
    ReceiveContext,
    ReceiveEndpointContext,
    ReceivePipe,
    ReceivePipeDispatcher,
};

pub use transport::{
    // ---
    InMemoryQueue,
    InMemoryReceiveTransport,
    InMemorySendTransport,
    MemoryChannel,
    MemoryConnection,
    ReceiveTransportHandle,
};
