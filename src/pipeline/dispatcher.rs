// src/pipeline/dispatcher.rs

//! Receive pipe contract and the metering dispatcher in front of it.
//!
//! The filter pipeline itself lives outside this crate. All the transport
//! needs is [`ReceivePipe::send`] and whether it failed. The
//! [`ReceivePipeDispatcher`] wraps a pipe with receive observers and the
//! delivery counters reported when a transport completes.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;

use crate::error::panic_message;
use crate::{
    // ---
    Error,
    ReceiveContext,
    ReceiveObservers,
    Result,
    TransportMessage,
};

/// Entry point of a receive pipeline.
#[async_trait::async_trait]
pub trait ReceivePipe: Send + Sync {
    /// Process one message. Any error counts as a failed delivery.
    async fn send(&self, context: &ReceiveContext) -> Result<()>;
}

/// [`ReceivePipe`] backed by a closure over the inbound message.
struct ReceivePipeFn<F, Fut> {
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

#[async_trait::async_trait]
impl<F, Fut> ReceivePipe for ReceivePipeFn<F, Fut>
where
    F: Fn(Arc<TransportMessage>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn send(&self, context: &ReceiveContext) -> Result<()> {
        (self.func)(Arc::clone(context.message())).await
    }
}

/// Build a [`ReceivePipe`] from an async closure.
///
/// # Example
///
/// ```
/// # use mom_transport::{pipe_fn, Error};
/// let pipe = pipe_fn(|message| async move {
///     if message.body().is_empty() {
///         return Err(Error::Dispatch("empty body".into()));
///     }
///     Ok(())
/// });
/// # let _ = pipe;
/// ```
pub fn pipe_fn<F, Fut>(func: F) -> Arc<dyn ReceivePipe>
where
    F: Fn(Arc<TransportMessage>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(ReceivePipeFn {
        func,
        _phantom: PhantomData,
    })
}

/// Snapshot of a dispatcher's delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryMetrics {
    /// Messages handed to the pipe.
    pub delivery_count: u64,
    /// Deliveries that failed.
    pub faulted_count: u64,
    /// Highest number of simultaneous deliveries observed.
    pub concurrent_delivery_count: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    faulted: AtomicU64,
    active: AtomicU64,
    peak: AtomicU64,
}

struct ActiveDelivery<'a>(&'a Counters);

impl Drop for ActiveDelivery<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Metering dispatcher in front of a [`ReceivePipe`].
pub struct ReceivePipeDispatcher {
    pipe: Arc<dyn ReceivePipe>,
    observers: ReceiveObservers,
    counters: Counters,
}

impl ReceivePipeDispatcher {
    /// Create a dispatcher with fresh counters.
    pub fn new(pipe: Arc<dyn ReceivePipe>, observers: ReceiveObservers) -> Self {
        Self {
            pipe,
            observers,
            counters: Counters::default(),
        }
    }

    /// Send one context through the pipe.
    ///
    /// Receive observers are notified around the pipe; their failures are
    /// logged and do not affect the result. A panicking pipe is reported as
    /// [`Error::Dispatch`].
    pub async fn dispatch(&self, context: &ReceiveContext) -> Result<()> {
        // ---
        let counters = &self.counters;
        counters.delivered.fetch_add(1, Ordering::AcqRel);
        let active = counters.active.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak.fetch_max(active, Ordering::AcqRel);
        let _active = ActiveDelivery(counters);

        self.observers.pre_receive(context).await;

        let result = match AssertUnwindSafe(self.pipe.send(context)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(Error::Dispatch(format!(
                "receive pipe panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };

        match &result {
            Ok(()) => {
                self.observers
                    .post_receive(context, context.elapsed())
                    .await;
            }
            Err(err) => {
                counters.faulted.fetch_add(1, Ordering::AcqRel);
                self.observers.receive_fault(context, err).await;
            }
        }

        result
    }

    /// Deliveries currently inside the pipe.
    pub fn active_delivery_count(&self) -> u64 {
        self.counters.active.load(Ordering::Acquire)
    }

    /// Snapshot of the counters.
    pub fn delivery_metrics(&self) -> DeliveryMetrics {
        DeliveryMetrics {
            delivery_count: self.counters.delivered.load(Ordering::Acquire),
            faulted_count: self.counters.faulted.load(Ordering::Acquire),
            concurrent_delivery_count: self.counters.peak.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for ReceivePipeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivePipeDispatcher")
            .field("metrics", &self.delivery_metrics())
            .finish()
    }
}
