// src/pipeline/endpoint.rs

//! Receive endpoint context: everything a receive transport needs from the
//! endpoint it serves.

use std::sync::Arc;

use crate::{
    // ---
    Address,
    ConnectHandle,
    PublishObserver,
    PublishObservers,
    ReceiveObserver,
    ReceiveObservers,
    ReceivePipe,
    ReceivePipeDispatcher,
    ReceiveTransportObserver,
    ReceiveTransportObservers,
    SendObserver,
    SendObservers,
};

/// Capabilities a receive transport requires from its endpoint.
///
/// Implementors supply the registries and the pipe; observer connection is
/// provided on top of the registries.
pub trait ReceiveEndpointContext: Send + Sync {
    /// Address the endpoint receives on.
    fn input_address(&self) -> &Address;

    /// Build a dispatcher over the endpoint's receive pipe.
    ///
    /// Each call returns a dispatcher with its own counters.
    fn create_receive_pipe_dispatcher(&self) -> ReceivePipeDispatcher;

    /// Per-message receive observers.
    fn receive_observers(&self) -> &ReceiveObservers;

    /// Transport lifecycle observers.
    fn transport_observers(&self) -> &ReceiveTransportObservers;

    /// Publish observers.
    fn publish_observers(&self) -> &PublishObservers;

    /// Send observers.
    fn send_observers(&self) -> &SendObservers;

    /// Span entered around dispatches and lifecycle work for this endpoint.
    fn log_context(&self) -> &tracing::Span;

    fn connect_receive_observer(&self, observer: Arc<dyn ReceiveObserver>) -> ConnectHandle {
        self.receive_observers().connect(observer)
    }

    fn connect_receive_transport_observer(
        &self,
        observer: Arc<dyn ReceiveTransportObserver>,
    ) -> ConnectHandle {
        self.transport_observers().connect(observer)
    }

    fn connect_publish_observer(&self, observer: Arc<dyn PublishObserver>) -> ConnectHandle {
        self.publish_observers().connect(observer)
    }

    fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.send_observers().connect(observer)
    }
}

/// Default [`ReceiveEndpointContext`] over a single receive pipe.
pub struct EndpointContext {
    input_address: Address,
    pipe: Arc<dyn ReceivePipe>,
    receive_observers: ReceiveObservers,
    transport_observers: ReceiveTransportObservers,
    publish_observers: PublishObservers,
    send_observers: SendObservers,
    span: tracing::Span,
}

impl EndpointContext {
    /// Create a context for `input_address` dispatching into `pipe`.
    ///
    /// The log context is an `info` span named `receive_endpoint` carrying
    /// the input address.
    pub fn new(input_address: impl Into<Address>, pipe: Arc<dyn ReceivePipe>) -> Self {
        let input_address = input_address.into();
        let span = tracing::info_span!("receive_endpoint", address = %input_address);
        Self {
            input_address,
            pipe,
            receive_observers: ReceiveObservers::new(),
            transport_observers: ReceiveTransportObservers::new(),
            publish_observers: PublishObservers::new(),
            send_observers: SendObservers::new(),
            span,
        }
    }

    /// Replace the log context span.
    pub fn with_log_context(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

impl ReceiveEndpointContext for EndpointContext {
    fn input_address(&self) -> &Address {
        &self.input_address
    }

    fn create_receive_pipe_dispatcher(&self) -> ReceivePipeDispatcher {
        ReceivePipeDispatcher::new(Arc::clone(&self.pipe), self.receive_observers.clone())
    }

    fn receive_observers(&self) -> &ReceiveObservers {
        &self.receive_observers
    }

    fn transport_observers(&self) -> &ReceiveTransportObservers {
        &self.transport_observers
    }

    fn publish_observers(&self) -> &PublishObservers {
        &self.publish_observers
    }

    fn send_observers(&self) -> &SendObservers {
        &self.send_observers
    }

    fn log_context(&self) -> &tracing::Span {
        &self.span
    }
}

impl std::fmt::Debug for EndpointContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointContext")
            .field("input_address", &self.input_address)
            .field("receive_observers", &self.receive_observers.len())
            .field("transport_observers", &self.transport_observers.len())
            .finish()
    }
}
