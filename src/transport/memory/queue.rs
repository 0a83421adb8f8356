// src/transport/memory/queue.rs

//! In-process message queue.
//!
//! ## Semantics
//!
//! - Messages are delivered in send order to connected consumers, round-robin.
//! - At most `concurrency_limit` deliveries run at once; each delivery runs
//!   on its own task.
//! - While no consumer is connected, messages stay buffered.
//! - Shutting the queue down cancels the token handed to consumers and drops
//!   whatever is still buffered.
//!
//! ## Non-Goals
//!
//! - Persistence or durability
//! - Redelivery; a failed delivery only bumps the message's delivery count

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    log_debug,
    Address,
    ConnectHandle,
    Envelope,
    Error,
    MessageSource,
    QueueConsumer,
    Result,
    TransportMessage,
};

#[derive(Default)]
struct Consumers {
    next_id: u64,
    cursor: usize,
    entries: Vec<(u64, Arc<dyn QueueConsumer>)>,
}

impl Consumers {
    fn next(&mut self) -> Option<Arc<dyn QueueConsumer>> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self.cursor % self.entries.len();
        self.cursor = index + 1;
        Some(Arc::clone(&self.entries[index].1))
    }
}

struct Shared {
    consumers: Mutex<Consumers>,
    consumer_added: Notify,
    buffered: AtomicUsize,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-process queue implementing [`MessageSource`].
///
/// Must be created inside a Tokio runtime; the delivery loop is spawned on
/// construction and stops when the queue is shut down or dropped.
pub struct InMemoryQueue {
    address: Address,
    concurrency_limit: usize,
    sender: mpsc::UnboundedSender<Arc<TransportMessage>>,
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl InMemoryQueue {
    /// Create a queue named `name` delivering at most `concurrency_limit`
    /// messages at a time (minimum 1).
    pub fn new(name: impl Into<Address>, concurrency_limit: usize) -> Self {
        // ---
        let address = name.into();
        let concurrency_limit = concurrency_limit.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            consumers: Mutex::new(Consumers::default()),
            consumer_added: Notify::new(),
            buffered: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();

        tokio::spawn(deliver_loop(
            address.clone(),
            receiver,
            Arc::clone(&shared),
            Arc::new(Semaphore::new(concurrency_limit)),
            token.clone(),
        ));

        Self {
            address,
            concurrency_limit,
            sender,
            shared,
            token,
        }
    }

    /// Enqueue an envelope.
    ///
    /// # Errors
    ///
    /// [`Error::Channel`] if the queue was shut down.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.send_message(Arc::new(TransportMessage::new(envelope)))
    }

    /// Enqueue an existing message, keeping its delivery count.
    pub fn send_message(&self, message: Arc<TransportMessage>) -> Result<()> {
        // ---
        if self.token.is_cancelled() {
            return Err(Error::Channel(format!("queue {} is shut down", self.address)));
        }
        self.shared.buffered.fetch_add(1, Ordering::AcqRel);
        self.sender.send(message).map_err(|_| {
            self.shared.buffered.fetch_sub(1, Ordering::AcqRel);
            Error::Channel(format!("queue {} is shut down", self.address))
        })
    }

    /// Messages accepted but not yet handed to a consumer.
    pub fn buffered(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn consumer_count(&self) -> usize {
        lock_ignore_poison(&self.shared.consumers).entries.len()
    }

    /// Token handed to consumers with each delivery.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop delivering. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            log_debug!("queue {}: shutting down", self.address);
            self.token.cancel();
        }
    }
}

impl MessageSource for InMemoryQueue {
    fn address(&self) -> &Address {
        &self.address
    }

    fn connect_consumer(&self, consumer: Arc<dyn QueueConsumer>) -> Result<ConnectHandle> {
        // ---
        if self.token.is_cancelled() {
            return Err(Error::Connect(format!("queue {} is shut down", self.address)));
        }

        let id = {
            let mut consumers = lock_ignore_poison(&self.shared.consumers);
            let id = consumers.next_id;
            consumers.next_id += 1;
            consumers.entries.push((id, consumer));
            id
        };
        self.shared.consumer_added.notify_one();
        log_debug!("queue {}: consumer {id} connected", self.address);

        let shared = Arc::downgrade(&self.shared);
        Ok(ConnectHandle::new(move || {
            if let Some(shared) = shared.upgrade() {
                lock_ignore_poison(&shared.consumers)
                    .entries
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        }))
    }
}

impl Drop for InMemoryQueue {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("address", &self.address)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("buffered", &self.buffered())
            .field("consumers", &self.consumer_count())
            .finish()
    }
}

async fn next_consumer(
    shared: &Shared,
    token: &CancellationToken,
) -> Option<Arc<dyn QueueConsumer>> {
    // ---
    loop {
        let consumer = lock_ignore_poison(&shared.consumers).next();
        if consumer.is_some() {
            return consumer;
        }
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = shared.consumer_added.notified() => {}
        }
    }
}

async fn deliver_loop(
    address: Address,
    mut receiver: mpsc::UnboundedReceiver<Arc<TransportMessage>>,
    shared: Arc<Shared>,
    limit: Arc<Semaphore>,
    token: CancellationToken,
) {
    // ---
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = receiver.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = token.cancelled() => break,
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let Some(consumer) = next_consumer(&shared, &token).await else {
            break;
        };
        shared.buffered.fetch_sub(1, Ordering::AcqRel);

        let token = token.clone();
        tokio::spawn(async move {
            consumer.consume(message, &token).await;
            drop(permit);
        });
    }

    log_debug!("queue {address}: delivery loop stopped");
}
