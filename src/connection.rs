// src/connection.rs

//! Lifecycle wrapper around a raw broker connection.
//!
//! [`ConnectionContext`] owns one [`BrokerConnection`] and:
//!
//! - runs every channel creation on a single [`AffinityExecutor`] thread;
//! - merges caller cancellation and broker-initiated shutdown into one
//!   [`CancellationToken`];
//! - exposes a per-connection [`PayloadCache`];
//! - tears the connection down exactly once, whether dispose or broker
//!   shutdown gets there first.
//!
//! The merged token is a child of the external token, so external
//! cancellation is visible synchronously.
//!
//! ```text
//!  external token ──child───┐
//!                           ├──► merged token ──► affinity executor stops
//!  broker closed() ─cancel──┘                  └► create_channel fails fast
//!         └──────────► close(code, text) ──► cleanup() once
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    on_signal,
    AffinityExecutor,
    BrokerConnection,
    Error,
    HostSettings,
    PayloadCache,
    PayloadContext,
    ProbeContext,
    Registration,
    Result,
    ShutdownReason,
    DEFAULT_QUEUE_CAPACITY,
    REPLY_SUCCESS,
};

struct State<C> {
    connection: Option<Arc<C>>,
    closed: bool,
    shutdown_watch: Registration,
}

struct Inner<C> {
    description: String,
    host_settings: HostSettings,
    state: Mutex<State<C>>,
    payloads: PayloadCache,
    token: CancellationToken,
    executor: AffinityExecutor,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<C: BrokerConnection> Inner<C> {
    fn connection(&self) -> Result<Arc<C>> {
        lock_ignore_poison(&self.state)
            .connection
            .clone()
            .ok_or(Error::ConnectionClosed)
    }

    fn close(&self, code: u16, reason: &str) {
        // ---
        let connection = {
            let mut state = lock_ignore_poison(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;

            let connection = state.connection.take();
            if let Some(connection) = &connection {
                connection.cleanup(code, reason);
            }
            connection
        };

        self.executor.shutdown();

        if connection.is_some() {
            log_debug!("[{}] connection closed: {code} {reason}", self.description);
        }
    }

    fn on_broker_shutdown(&self, reason: ShutdownReason) {
        // ---
        log_warn!("[{}] broker closed the connection: {reason}", self.description);
        self.token.cancel();
        self.close(reason.code, &reason.text);
    }
}

/// Thread-affine, cancellation-aware owner of a broker connection.
///
/// Must be created inside a Tokio runtime. Dropping the context disposes it.
pub struct ConnectionContext<C: BrokerConnection> {
    inner: Arc<Inner<C>>,
}

impl<C: BrokerConnection> ConnectionContext<C> {
    /// Wrap `connection`.
    ///
    /// Cancelling `external` cancels [`cancellation_token`](Self::cancellation_token)
    /// and makes further channel creation fail; it does not close the
    /// connection by itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the affinity thread cannot be spawned.
    pub fn new(
        connection: C,
        host_settings: HostSettings,
        external: &CancellationToken,
    ) -> Result<Self> {
        // ---
        let connection = Arc::new(connection);
        let description = format!("{} ({})", host_settings.describe(), connection.describe());
        let token = external.child_token();

        let executor = AffinityExecutor::spawn(
            host_settings.host.as_str(),
            DEFAULT_QUEUE_CAPACITY,
            &token,
        )?;

        let inner = Arc::new(Inner {
            description,
            host_settings,
            state: Mutex::new(State {
                connection: Some(Arc::clone(&connection)),
                closed: false,
                shutdown_watch: Registration::empty(),
            }),
            payloads: PayloadCache::new(),
            token,
            executor,
        });

        let weak = Arc::downgrade(&inner);
        let shutdown_watch = on_signal(
            async move { connection.closed().await },
            move |reason: ShutdownReason| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_broker_shutdown(reason);
                }
            },
        );
        lock_ignore_poison(&inner.state).shutdown_watch = shutdown_watch;

        log_info!("[{}] connection context created", inner.description);

        Ok(Self { inner })
    }

    /// Create a channel on the affinity thread.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after teardown
    /// - [`Error::ExecutorUnavailable`] once the merged token has fired
    /// - whatever [`BrokerConnection::create_channel`] returns
    pub async fn create_channel(&self) -> Result<C::Channel> {
        // ---
        self.inner.connection()?;

        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .submit(move || inner.connection()?.create_channel())
            .await
    }

    /// The live connection.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] after teardown.
    pub fn connection(&self) -> Result<Arc<C>> {
        self.inner.connection()
    }

    /// Cancelled by external cancellation or broker shutdown, whichever comes first.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn host_settings(&self) -> &HostSettings {
        &self.inner.host_settings
    }

    /// The affinity executor channel creation runs on.
    pub fn executor(&self) -> &AffinityExecutor {
        &self.inner.executor
    }

    /// True once torn down.
    pub fn is_closed(&self) -> bool {
        lock_ignore_poison(&self.inner.state).closed
    }

    /// Describe the connection under a `connection` scope.
    pub fn probe(&self, context: &mut ProbeContext) -> Result<()> {
        // ---
        let mut scope = context.create_scope("connection");
        scope
            .set("description", &self.inner.description)?
            .set("hostSettings", &self.inner.host_settings)?
            .set("closed", self.is_closed())?
            .set("cancelled", self.inner.token.is_cancelled())?;
        Ok(())
    }

    /// Close the connection with an explicit reply code and text.
    ///
    /// Idempotent. Only the first close reaches
    /// [`BrokerConnection::cleanup`].
    pub fn close(&self, code: u16, reason: &str) {
        self.inner.close(code, reason);
    }

    /// Stop watching for broker shutdown and close with `200 Connection disposed`.
    ///
    /// Idempotent; also runs on drop.
    pub fn dispose(&self) {
        // ---
        lock_ignore_poison(&self.inner.state).shutdown_watch.dispose();
        self.inner.close(REPLY_SUCCESS, "Connection disposed");
    }
}

impl<C: BrokerConnection> PayloadContext for ConnectionContext<C> {
    fn payloads(&self) -> &PayloadCache {
        &self.inner.payloads
    }
}

impl<C: BrokerConnection> Drop for ConnectionContext<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<C: BrokerConnection> std::fmt::Debug for ConnectionContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("description", &self.inner.description)
            .field("closed", &self.is_closed())
            .field("cancelled", &self.inner.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::MemoryConnection;

    fn settings() -> HostSettings {
        HostSettings::builder().host("localhost").build().unwrap()
    }

    #[tokio::test]
    async fn test_channels_are_created_on_the_affinity_thread() {
        // ---
        let context =
            ConnectionContext::new(MemoryConnection::new(), settings(), &CancellationToken::new())
                .unwrap();

        let channel = context.create_channel().await.unwrap();
        assert_eq!(channel.created_on(), context.executor().worker_thread_id());
        assert_ne!(channel.created_on(), std::thread::current().id());
    }

    #[tokio::test]
    async fn test_connection_closed_after_dispose() {
        // ---
        let connection = MemoryConnection::new();
        let probe = connection.clone();
        let context =
            ConnectionContext::new(connection, settings(), &CancellationToken::new()).unwrap();

        context.dispose();
        context.dispose();

        assert!(context.is_closed());
        assert!(matches!(context.connection(), Err(Error::ConnectionClosed)));
        assert!(matches!(
            context.create_channel().await,
            Err(Error::ConnectionClosed)
        ));
        assert_eq!(probe.cleanup_calls(), vec![(200, "Connection disposed".to_string())]);
    }

    #[tokio::test]
    async fn test_external_cancellation_fails_channel_creation() {
        // ---
        let external = CancellationToken::new();
        let context = ConnectionContext::new(MemoryConnection::new(), settings(), &external).unwrap();

        external.cancel();

        assert!(context.cancellation_token().is_cancelled());
        assert!(matches!(
            context.create_channel().await,
            Err(Error::ExecutorUnavailable)
        ));
        assert!(!context.is_closed());
    }
}
