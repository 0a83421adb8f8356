// src/observers/transport.rs

//! Receive transport lifecycle events and their observer.

use serde::Serialize;

use crate::{
    // ---
    Address,
    DeliveryMetrics,
    Error,
    ObserverRegistry,
    Result,
};

/// Published once the transport is connected to its source and accepting messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReceiveTransportReady {
    /// Address the transport consumes from.
    pub input_address: Address,
}

/// Published once, after the transport stopped and disconnected from its source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReceiveTransportCompleted {
    /// Address the transport consumed from.
    pub input_address: Address,
    /// Dispatch totals for the transport's lifetime.
    pub metrics: DeliveryMetrics,
}

/// Published when the transport failed to start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReceiveTransportFaulted {
    /// Address the transport tried to consume from.
    pub input_address: Address,
    /// Startup error text.
    pub reason: String,
}

/// Observer of receive transport lifecycle events.
///
/// All methods default to doing nothing.
#[async_trait::async_trait]
pub trait ReceiveTransportObserver: Send + Sync {
    /// The transport became ready.
    async fn ready(&self, _event: &ReceiveTransportReady) -> Result<()> {
        Ok(())
    }

    /// The transport stopped.
    async fn completed(&self, _event: &ReceiveTransportCompleted) -> Result<()> {
        Ok(())
    }

    /// The transport failed to start.
    async fn faulted(&self, _event: &ReceiveTransportFaulted) -> Result<()> {
        Ok(())
    }
}

/// Registry of [`ReceiveTransportObserver`]s.
pub type ReceiveTransportObservers = ObserverRegistry<dyn ReceiveTransportObserver>;

impl ObserverRegistry<dyn ReceiveTransportObserver> {
    /// Notify every observer that the transport is ready.
    pub async fn ready(&self, event: &ReceiveTransportReady) -> Vec<Error> {
        self.notify("transport ready", |observer| async move {
            observer.ready(event).await
        })
        .await
    }

    /// Notify every observer that the transport completed.
    pub async fn completed(&self, event: &ReceiveTransportCompleted) -> Vec<Error> {
        self.notify("transport completed", |observer| async move {
            observer.completed(event).await
        })
        .await
    }

    /// Notify every observer that the transport faulted.
    pub async fn faulted(&self, event: &ReceiveTransportFaulted) -> Vec<Error> {
        self.notify("transport faulted", |observer| async move {
            observer.faulted(event).await
        })
        .await
    }
}
