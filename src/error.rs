use thiserror::Error;

use crate::AgentState;

/// Errors produced by connection contexts, agents and receive transports.
#[derive(Error, Debug)]
pub enum Error {
    /// The broker connection was accessed after teardown.
    #[error("the connection was closed")]
    ConnectionClosed,

    /// The affinity worker has shut down or its owning context was cancelled.
    #[error("affinity executor unavailable")]
    ExecutorUnavailable,

    /// An operation panicked on the affinity worker.
    #[error("operation panicked on affinity worker: {0}")]
    Panicked(String),

    /// The agent faulted before it became ready.
    #[error("startup failed: {0}")]
    StartupFailed(String),

    /// The agent stopped before it ever became ready.
    #[error("agent stopped before it became ready")]
    AgentStopped,

    /// An operation was attempted from a state that does not allow it.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// Operation that was rejected.
        operation: &'static str,
        /// State the agent was in.
        state: AgentState,
    },

    /// The stop token fired before in-flight dispatches drained.
    #[error("stop cancelled with {in_flight} dispatch(es) still in flight")]
    StopCancelled {
        /// Number of dispatches still running when the wait was abandoned.
        in_flight: usize,
    },

    /// The receive pipeline failed to process a message.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// The broker failed to create a channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Connecting to a message source failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An observer returned an error or panicked.
    #[error("observer failed: {0}")]
    Observer(String),

    /// A required configuration value was not provided.
    #[error("missing config: {0}")]
    MissingConfig(String),

    /// A configuration value could not be parsed or is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Operating system error, e.g. the affinity thread could not be spawned.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::ConnectionClosed => "connection_closed",
            Error::ExecutorUnavailable => "executor_unavailable",
            Error::Panicked(_) => "panicked",
            Error::StartupFailed(_) => "startup_failed",
            Error::AgentStopped => "agent_stopped",
            Error::InvalidState { .. } => "invalid_state",
            Error::StopCancelled { .. } => "stop_cancelled",
            Error::Dispatch(_) => "dispatch_failed",
            Error::Channel(_) => "channel_failed",
            Error::Connect(_) => "connect_failed",
            Error::Observer(_) => "observer_failed",
            Error::MissingConfig(_) => "missing_config",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    // ---
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
