// src/transport/memory/send.rs

//! Send transport into an [`InMemoryQueue`].

use std::sync::Arc;

use crate::{
    // ---
    log_warn,
    ConnectHandle,
    Envelope,
    InMemoryQueue,
    PublishObserver,
    PublishObservers,
    Result,
    SendObserver,
    SendObservers,
};

/// Producer side of an [`InMemoryQueue`].
///
/// Every send or publish is bracketed by observer notifications: `pre_*`
/// before the enqueue, then `post_*` on success or `*_fault` on failure.
pub struct InMemorySendTransport {
    queue: Arc<InMemoryQueue>,
    send_observers: SendObservers,
    publish_observers: PublishObservers,
}

impl InMemorySendTransport {
    /// Create a transport with its own observer registries.
    pub fn new(queue: Arc<InMemoryQueue>) -> Self {
        Self::with_observers(queue, SendObservers::new(), PublishObservers::new())
    }

    /// Create a transport sharing existing registries, typically the ones
    /// of a receive endpoint.
    pub fn with_observers(
        queue: Arc<InMemoryQueue>,
        send_observers: SendObservers,
        publish_observers: PublishObservers,
    ) -> Self {
        Self {
            queue,
            send_observers,
            publish_observers,
        }
    }

    /// Enqueue `envelope` as a point-to-point send.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        // ---
        self.send_observers.pre_send(&envelope).await;

        match self.queue.send(envelope.clone()) {
            Ok(()) => {
                self.send_observers.post_send(&envelope).await;
                Ok(())
            }
            Err(err) => {
                log_warn!("send of {} failed: {err}", envelope.message_id);
                self.send_observers.send_fault(&envelope, &err).await;
                Err(err)
            }
        }
    }

    /// Enqueue `envelope` as a publish.
    pub async fn publish(&self, envelope: Envelope) -> Result<()> {
        // ---
        self.publish_observers.pre_publish(&envelope).await;

        match self.queue.send(envelope.clone()) {
            Ok(()) => {
                self.publish_observers.post_publish(&envelope).await;
                Ok(())
            }
            Err(err) => {
                log_warn!("publish of {} failed: {err}", envelope.message_id);
                self.publish_observers.publish_fault(&envelope, &err).await;
                Err(err)
            }
        }
    }

    pub fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.send_observers.connect(observer)
    }

    pub fn connect_publish_observer(&self, observer: Arc<dyn PublishObserver>) -> ConnectHandle {
        self.publish_observers.connect(observer)
    }
}

impl std::fmt::Debug for InMemorySendTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySendTransport")
            .field("queue", &self.queue)
            .finish()
    }
}
