// src/observers/receive.rs

//! Per-message receive observer.

use std::time::Duration;

use crate::{
    // ---
    Error,
    ObserverRegistry,
    ReceiveContext,
    Result,
};

/// Observer of individual message dispatches.
///
/// All methods default to doing nothing. Failures are logged by the
/// dispatcher and never change the outcome of the dispatch.
#[async_trait::async_trait]
pub trait ReceiveObserver: Send + Sync {
    /// A message is about to enter the receive pipe.
    async fn pre_receive(&self, _context: &ReceiveContext) -> Result<()> {
        Ok(())
    }

    /// The receive pipe completed successfully.
    async fn post_receive(&self, _context: &ReceiveContext, _elapsed: Duration) -> Result<()> {
        Ok(())
    }

    /// The receive pipe failed.
    async fn receive_fault(&self, _context: &ReceiveContext, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Registry of [`ReceiveObserver`]s.
pub type ReceiveObservers = ObserverRegistry<dyn ReceiveObserver>;

impl ObserverRegistry<dyn ReceiveObserver> {
    /// Notify every observer before dispatch.
    pub async fn pre_receive(&self, context: &ReceiveContext) -> Vec<Error> {
        self.notify("pre-receive", |observer| async move {
            observer.pre_receive(context).await
        })
        .await
    }

    /// Notify every observer after a successful dispatch.
    pub async fn post_receive(&self, context: &ReceiveContext, elapsed: Duration) -> Vec<Error> {
        self.notify("post-receive", |observer| async move {
            observer.post_receive(context, elapsed).await
        })
        .await
    }

    /// Notify every observer after a failed dispatch.
    pub async fn receive_fault(&self, context: &ReceiveContext, error: &Error) -> Vec<Error> {
        self.notify("receive-fault", |observer| async move {
            observer.receive_fault(context, error).await
        })
        .await
    }
}
