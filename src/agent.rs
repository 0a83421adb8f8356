//! # Agent lifecycle state machine.
//!
//! An [`Agent`] is embedded by long-lived components (receive transports,
//! consumers) to track readiness and shutdown. It is a composed field, not a
//! base type: the owner exposes its own API and delegates to the agent.
//!
//! ## States
//! ```text
//!             set_ready()             stop()                  drained
//!  NotReady ─────────────► Ready ─────────────► Stopping ─────────────► Stopped
//!     │  │                   │
//!     │  └── stop() ─────────┼──────────────────────────────────────────► Stopped
//!     │                      │
//!     └── set_not_ready() ───┴──► Faulted
//! ```
//!
//! ## Rules
//! - Transitions are one-directional; nothing leaves `Stopped` or `Faulted`.
//! - [`Agent::ready`] resolves once: `Ok` when `Ready` is reached, the startup
//!   error on `Faulted`, [`Error::AgentStopped`] when stopped before ready.
//!   A fault after `Ready` does not change an `Ok` already given.
//! - Work is admitted through [`Agent::enter`] only while `Ready`; `stop` waits
//!   for admitted work to drain, bounded by the caller's token.
//! - `stop` always ends in `Stopped`, even when the drain is abandoned.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    Error,
    Result,
};

/// Lifecycle state of an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AgentState {
    /// Created, not yet accepting work.
    NotReady,
    /// Accepting work.
    Ready,
    /// Stop requested; admitted work is draining.
    Stopping,
    /// Terminal. No further work is admitted.
    Stopped,
    /// Terminal. Startup (or a ready agent) failed.
    Faulted,
}

impl AgentState {
    /// True for `Stopped` and `Faulted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Stopped | AgentState::Faulted)
    }
}

/// Readiness and shutdown state holder.
pub struct Agent {
    name: Arc<str>,
    state: watch::Sender<AgentState>,
    fault: OnceLock<String>,
    was_ready: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    stopping: CancellationToken,
}

impl Agent {
    /// Create an agent in `NotReady`. The name is used in log lines only.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        // ---
        let (state, _) = watch::channel(AgentState::NotReady);

        Self {
            name: name.into(),
            state,
            fault: OnceLock::new(),
            was_ready: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            stopping: CancellationToken::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// True while `Ready`.
    pub fn is_ready(&self) -> bool {
        self.state() == AgentState::Ready
    }

    /// True once stop has begun (`Stopping` or `Stopped`).
    pub fn is_stopping(&self) -> bool {
        matches!(self.state(), AgentState::Stopping | AgentState::Stopped)
    }

    /// True once `Stopped`.
    pub fn is_stopped(&self) -> bool {
        self.state() == AgentState::Stopped
    }

    /// Number of admitted units of work that have not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Token cancelled when stop begins.
    pub fn stopping_token(&self) -> &CancellationToken {
        &self.stopping
    }

    /// Transition `NotReady -> Ready`.
    ///
    /// Returns `false` (and changes nothing) from any other state.
    pub fn set_ready(&self) -> bool {
        // ---
        let (previous, changed) = self.transition(|state| match state {
            AgentState::NotReady => {
                self.was_ready.store(true, Ordering::SeqCst);
                Some(AgentState::Ready)
            }
            _ => None,
        });

        if changed {
            log_debug!("{}: ready", self.name);
        } else {
            log_debug!("{}: set_ready ignored while {previous:?}", self.name);
        }
        changed
    }

    /// Transition `NotReady | Ready -> Faulted`, failing readiness with `reason`.
    ///
    /// Returns `false` from any other state.
    pub fn set_not_ready(&self, reason: impl std::fmt::Display) -> bool {
        // ---
        let reason = reason.to_string();

        // Recorded under the state lock so waiters never see `Faulted` without it.
        let (previous, changed) = self.transition(|state| match state {
            AgentState::NotReady | AgentState::Ready => {
                let _ = self.fault.set(reason.clone());
                Some(AgentState::Faulted)
            }
            _ => None,
        });

        if changed {
            self.stopping.cancel();
            log_warn!("{}: faulted: {reason}", self.name);
        } else {
            log_debug!("{}: set_not_ready ignored while {previous:?}", self.name);
        }
        changed
    }

    /// Wait until the agent leaves `NotReady`.
    ///
    /// # Errors
    ///
    /// - [`Error::StartupFailed`] if the agent faulted
    /// - [`Error::AgentStopped`] if it stopped without ever becoming ready
    pub async fn ready(&self) -> Result<()> {
        // ---
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| *state != AgentState::NotReady).await {
            Ok(state) => *state,
            Err(_) => return Err(Error::AgentStopped),
        };

        if self.was_ready.load(Ordering::SeqCst) {
            return Ok(());
        }

        match state {
            AgentState::Ready => Ok(()),
            AgentState::Faulted => Err(Error::StartupFailed(
                self.fault.get().cloned().unwrap_or_default(),
            )),
            _ => Err(Error::AgentStopped),
        }
    }

    /// Wait until the agent reaches a terminal state.
    pub async fn completed(&self) -> AgentState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Admit one unit of work. Returns `None` unless `Ready`.
    ///
    /// The returned guard keeps `stop` from completing its drain until dropped.
    pub fn enter(&self) -> Option<ActivityGuard<'_>> {
        // ---
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if self.state() != AgentState::Ready {
            self.leave();
            return None;
        }

        Some(ActivityGuard { agent: self })
    }

    /// Stop the agent.
    ///
    /// - `Ready`: moves to `Stopping`, waits for admitted work, then `Stopped`.
    /// - `NotReady`: moves straight to `Stopped`.
    /// - `Stopping`: waits for the stop already in progress.
    /// - `Stopped` / `Faulted`: returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StopCancelled`] when `token` fires before the drain
    /// completes. The agent still ends in `Stopped`.
    pub async fn stop(&self, reason: &str, token: &CancellationToken) -> Result<()> {
        // ---
        let (previous, changed) = self.transition(|state| match state {
            AgentState::NotReady => Some(AgentState::Stopped),
            AgentState::Ready => Some(AgentState::Stopping),
            _ => None,
        });

        match (previous, changed) {
            (AgentState::NotReady, true) => {
                self.stopping.cancel();
                log_info!("{}: stopped before ready ({reason})", self.name);
                Ok(())
            }
            (AgentState::Ready, true) => {
                self.stopping.cancel();
                log_info!("{}: stopping ({reason})", self.name);

                let drained = self.drain(token).await;

                self.state.send_replace(AgentState::Stopped);
                match &drained {
                    Ok(()) => log_info!("{}: stopped", self.name),
                    Err(_err) => log_warn!("{}: stopped without draining: {_err}", self.name),
                }
                drained
            }
            (AgentState::Stopping, _) => self.wait_stopped(token).await,
            _ => Ok(()),
        }
    }

    async fn drain(&self, token: &CancellationToken) -> Result<()> {
        // ---
        loop {
            if self.in_flight() == 0 {
                return Ok(());
            }

            tokio::select! {
                _ = self.drained.notified() => {}
                _ = token.cancelled() => {
                    return Err(Error::StopCancelled { in_flight: self.in_flight() });
                }
            }
        }
    }

    async fn wait_stopped(&self, token: &CancellationToken) -> Result<()> {
        // ---
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = rx.wait_for(|state| state.is_terminal()) => Ok(()),
            _ = token.cancelled() => Err(Error::StopCancelled { in_flight: self.in_flight() }),
        }
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_one();
        }
    }

    // Returns the state before the call and whether it changed.
    fn transition<F>(&self, next: F) -> (AgentState, bool)
    where
        F: FnOnce(AgentState) -> Option<AgentState>,
    {
        // ---
        let mut previous = AgentState::NotReady;
        let mut next = Some(next);

        let changed = self.state.send_if_modified(|state| {
            previous = *state;
            match next.take().and_then(|f| f(*state)) {
                Some(target) => {
                    *state = target;
                    true
                }
                None => false,
            }
        });

        (previous, changed)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Admission guard returned by [`Agent::enter`].
#[must_use = "work is only tracked while the guard is alive"]
pub struct ActivityGuard<'a> {
    agent: &'a Agent,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.agent.leave();
    }
}
