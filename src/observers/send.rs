// src/observers/send.rs

//! Outbound (send and publish) observers.

use crate::{
    // ---
    Envelope,
    Error,
    ObserverRegistry,
    Result,
};

/// Observer of point-to-point sends.
#[async_trait::async_trait]
pub trait SendObserver: Send + Sync {
    /// The envelope is about to be sent.
    async fn pre_send(&self, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    /// The envelope was accepted by the destination.
    async fn post_send(&self, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    /// Sending failed.
    async fn send_fault(&self, _envelope: &Envelope, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Observer of publishes (sends addressed by message type rather than queue).
#[async_trait::async_trait]
pub trait PublishObserver: Send + Sync {
    /// The envelope is about to be published.
    async fn pre_publish(&self, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    /// The envelope was published.
    async fn post_publish(&self, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    /// Publishing failed.
    async fn publish_fault(&self, _envelope: &Envelope, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Registry of [`SendObserver`]s.
pub type SendObservers = ObserverRegistry<dyn SendObserver>;

/// Registry of [`PublishObserver`]s.
pub type PublishObservers = ObserverRegistry<dyn PublishObserver>;

impl ObserverRegistry<dyn SendObserver> {
    /// Notify every observer before a send.
    pub async fn pre_send(&self, envelope: &Envelope) -> Vec<Error> {
        self.notify("pre-send", |observer| async move {
            observer.pre_send(envelope).await
        })
        .await
    }

    /// Notify every observer after a send.
    pub async fn post_send(&self, envelope: &Envelope) -> Vec<Error> {
        self.notify("post-send", |observer| async move {
            observer.post_send(envelope).await
        })
        .await
    }

    /// Notify every observer of a failed send.
    pub async fn send_fault(&self, envelope: &Envelope, error: &Error) -> Vec<Error> {
        self.notify("send-fault", |observer| async move {
            observer.send_fault(envelope, error).await
        })
        .await
    }
}

impl ObserverRegistry<dyn PublishObserver> {
    /// Notify every observer before a publish.
    pub async fn pre_publish(&self, envelope: &Envelope) -> Vec<Error> {
        self.notify("pre-publish", |observer| async move {
            observer.pre_publish(envelope).await
        })
        .await
    }

    /// Notify every observer after a publish.
    pub async fn post_publish(&self, envelope: &Envelope) -> Vec<Error> {
        self.notify("post-publish", |observer| async move {
            observer.post_publish(envelope).await
        })
        .await
    }

    /// Notify every observer of a failed publish.
    pub async fn publish_fault(&self, envelope: &Envelope, error: &Error) -> Vec<Error> {
        self.notify("publish-fault", |observer| async move {
            observer.publish_fault(envelope, error).await
        })
        .await
    }
}
