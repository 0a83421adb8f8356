// src/transport/memory/receive.rs

//! Receive transport over an in-process message source.
//!
//! ## Lifecycle
//!
//! ```text
//!  new ──► start ──► connect consumer ──► ready event ──► Ready
//!            │                                              │
//!            └─ connect failed ──► Faulted (faulted event)  │
//!                                                           ▼
//!                 handle.stop ──► Stopping ──► drain ──► Stopped
//!                                   └─► disconnect ──► completed event
//! ```
//!
//! Messages pushed by the source before the transport is ready wait for
//! readiness. Messages arriving once it is stopping or stopped are
//! discarded; the source still owns them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    merge,
    Address,
    Agent,
    AgentState,
    ConnectHandle,
    DeliveryMetrics,
    Error,
    MessageSource,
    ProbeContext,
    PublishObserver,
    QueueConsumer,
    ReceiveContext,
    ReceiveEndpointContext,
    ReceiveObserver,
    ReceivePipeDispatcher,
    ReceiveTransportCompleted,
    ReceiveTransportFaulted,
    ReceiveTransportObserver,
    ReceiveTransportReady,
    Result,
    SendObserver,
    TransportMessage,
};

struct Inner {
    input_address: Address,
    queue: Arc<dyn MessageSource>,
    context: Arc<dyn ReceiveEndpointContext>,
    dispatcher: ReceivePipeDispatcher,
    agent: Agent,
    started: AtomicBool,
}

impl Inner {
    async fn notify_ready(&self) {
        // ---
        if self.agent.state() != AgentState::NotReady {
            log_debug!(
                "{}: ready skipped, transport is {:?}",
                self.input_address,
                self.agent.state()
            );
            return;
        }

        let event = ReceiveTransportReady {
            input_address: self.input_address.clone(),
        };
        self.context.transport_observers().ready(&event).await;

        if self.agent.set_ready() {
            log_info!("receive transport ready: {}", self.input_address);
        }
    }

    async fn dispatch(&self, message: Arc<TransportMessage>, token: &CancellationToken) {
        // ---
        tokio::select! {
            biased;
            ready = self.agent.ready() => {
                if ready.is_err() {
                    log_debug!("{}: discarding {}, transport not running", self.input_address, message.message_id());
                    return;
                }
            }
            _ = token.cancelled() => return,
        }

        let Some(_activity) = self.agent.enter() else {
            log_debug!(
                "{}: discarding {}, transport is {:?}",
                self.input_address,
                message.message_id(),
                self.agent.state()
            );
            return;
        };

        let cancellation = merge(token, self.agent.stopping_token());
        let context = ReceiveContext::new(
            Arc::clone(&message),
            self.input_address.clone(),
            cancellation.token().clone(),
        );

        if let Err(_err) = self.dispatcher.dispatch(&context).await {
            let _attempts = message.increment_delivery_count();
            log_debug!(
                "{}: delivery of {} failed (attempt {_attempts}): {_err}",
                self.input_address,
                message.message_id()
            );
        }
    }
}

#[async_trait::async_trait]
impl QueueConsumer for Inner {
    async fn consume(&self, message: Arc<TransportMessage>, token: &CancellationToken) {
        let span = self.context.log_context().clone();
        self.dispatch(message, token).instrument(span).await;
    }
}

/// Receive transport consuming from an in-process [`MessageSource`].
pub struct InMemoryReceiveTransport {
    inner: Arc<Inner>,
}

impl InMemoryReceiveTransport {
    /// Create a transport for `input_address` over `queue`.
    ///
    /// The dispatcher is built once, here, from `context`.
    pub fn new(
        input_address: impl Into<Address>,
        queue: Arc<dyn MessageSource>,
        context: Arc<dyn ReceiveEndpointContext>,
    ) -> Self {
        // ---
        let input_address = input_address.into();
        let dispatcher = context.create_receive_pipe_dispatcher();
        let agent = Agent::new(format!("receive transport {input_address}"));

        Self {
            inner: Arc::new(Inner {
                input_address,
                queue,
                context,
                dispatcher,
                agent,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to the source and begin accepting messages.
    ///
    /// Readiness is signalled asynchronously: transport observers receive
    /// the ready event, then [`ready`](Self::ready) resolves.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the transport was already started
    /// - the source's error if connecting fails; the transport is then
    ///   `Faulted` and a faulted event is published
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<ReceiveTransportHandle> {
        // ---
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::AcqRel) || inner.agent.state() != AgentState::NotReady {
            return Err(Error::InvalidState {
                operation: "start",
                state: inner.agent.state(),
            });
        }

        let span = inner.context.log_context().clone();
        let consumer: Arc<dyn QueueConsumer> = Arc::clone(inner) as Arc<dyn QueueConsumer>;

        match inner.queue.connect_consumer(consumer) {
            Ok(consumer) => {
                let ready = Arc::clone(inner);
                tokio::spawn(async move { ready.notify_ready().await }.instrument(span));

                Ok(ReceiveTransportHandle {
                    inner: Arc::clone(inner),
                    consumer,
                })
            }
            Err(err) => {
                log_error!("receive transport {} failed to start: {err}", inner.input_address);
                inner.agent.set_not_ready(&err);

                let event = ReceiveTransportFaulted {
                    input_address: inner.input_address.clone(),
                    reason: err.to_string(),
                };
                let observers = inner.context.transport_observers().clone();
                tokio::spawn(async move { observers.faulted(&event).await; }.instrument(span));

                Err(err)
            }
        }
    }

    pub fn input_address(&self) -> &Address {
        &self.inner.input_address
    }

    pub fn state(&self) -> AgentState {
        self.inner.agent.state()
    }

    /// Wait until the transport is ready.
    ///
    /// # Errors
    ///
    /// [`Error::StartupFailed`] if it faulted, [`Error::AgentStopped`] if it
    /// stopped before becoming ready.
    pub async fn ready(&self) -> Result<()> {
        self.inner.agent.ready().await
    }

    /// Wait until the transport is stopped or faulted.
    pub async fn completed(&self) -> AgentState {
        self.inner.agent.completed().await
    }

    pub fn delivery_metrics(&self) -> DeliveryMetrics {
        self.inner.dispatcher.delivery_metrics()
    }

    /// Describe the transport under an `inMemoryReceiveTransport` scope.
    pub fn probe(&self, context: &mut ProbeContext) -> Result<()> {
        // ---
        context
            .create_scope("inMemoryReceiveTransport")
            .set("address", &self.inner.input_address)?;
        Ok(())
    }

    pub fn connect_receive_observer(&self, observer: Arc<dyn ReceiveObserver>) -> ConnectHandle {
        self.inner.context.connect_receive_observer(observer)
    }

    pub fn connect_receive_transport_observer(
        &self,
        observer: Arc<dyn ReceiveTransportObserver>,
    ) -> ConnectHandle {
        self.inner.context.connect_receive_transport_observer(observer)
    }

    pub fn connect_publish_observer(&self, observer: Arc<dyn PublishObserver>) -> ConnectHandle {
        self.inner.context.connect_publish_observer(observer)
    }

    pub fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.inner.context.connect_send_observer(observer)
    }
}

impl std::fmt::Debug for InMemoryReceiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReceiveTransport")
            .field("input_address", &self.inner.input_address)
            .field("state", &self.inner.agent.state())
            .field("metrics", &self.inner.dispatcher.delivery_metrics())
            .finish()
    }
}

/// Handle to a started receive transport.
///
/// Dropping the handle without calling [`stop`](Self::stop) disconnects
/// from the source but publishes no completed event.
#[must_use = "dropping the handle disconnects the transport from its source"]
pub struct ReceiveTransportHandle {
    inner: Arc<Inner>,
    consumer: ConnectHandle,
}

impl ReceiveTransportHandle {
    /// Stop the transport.
    ///
    /// Stops the agent (draining in-flight dispatches, bounded by `token`),
    /// disconnects from the source, then publishes one completed event with
    /// the delivery metrics. Runs inside the endpoint's log span unless a
    /// span is already current.
    ///
    /// # Errors
    ///
    /// [`Error::StopCancelled`] if `token` fired before the drain finished.
    /// Disconnection and the completed event happen either way.
    pub async fn stop(self, token: &CancellationToken) -> Result<()> {
        // ---
        let current = tracing::Span::current();
        let span = if current.is_none() {
            self.inner.context.log_context().clone()
        } else {
            current
        };

        let Self { inner, consumer } = self;

        async move {
            let stopped = inner.agent.stop("Stop", token).await;

            consumer.disconnect();

            let metrics = inner.dispatcher.delivery_metrics();
            log_info!(
                "receive transport {} completed: {} delivered, {} faulted, {} peak concurrent",
                inner.input_address,
                metrics.delivery_count,
                metrics.faulted_count,
                metrics.concurrent_delivery_count
            );

            let event = ReceiveTransportCompleted {
                input_address: inner.input_address.clone(),
                metrics,
            };
            inner.context.transport_observers().completed(&event).await;

            stopped
        }
        .instrument(span)
        .await
    }

    pub fn input_address(&self) -> &Address {
        &self.inner.input_address
    }
}

impl std::fmt::Debug for ReceiveTransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveTransportHandle")
            .field("input_address", &self.inner.input_address)
            .field("consumer", &self.consumer)
            .finish()
    }
}
