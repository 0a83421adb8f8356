//! Cancellation callbacks and signal merging.
//!
//! Callbacks are registered against a [`CancellationToken`] and return a
//! [`Registration`]; disposing (or dropping) the registration detaches the
//! callback. Each callback fires at most once.
//!
//! All functions here spawn onto the current Tokio runtime and must be called
//! from within one.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Disposable handle for a registered callback.
///
/// Dropping the registration has the same effect as [`dispose`](Self::dispose).
#[derive(Debug)]
#[must_use = "dropping a Registration detaches the callback immediately"]
pub struct Registration {
    task: Option<JoinHandle<()>>,
}

impl Registration {
    /// A registration with nothing attached.
    pub fn empty() -> Self {
        Self { task: None }
    }

    fn spawn<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(fut)),
        }
    }

    /// Detach the callback. Idempotent; a callback that already ran is unaffected.
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// True once disposed, or once the callback has run.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Run `callback` once when `token` is cancelled.
///
/// If the token is already cancelled the callback runs on the next poll of
/// the spawned task, not inline.
pub fn on_cancelled<F>(token: &CancellationToken, callback: F) -> Registration
where
    F: FnOnce() + Send + 'static,
{
    let token = token.clone();
    Registration::spawn(async move {
        token.cancelled().await;
        callback();
    })
}

/// Run `callback` once with the output of `signal`.
///
/// Used for sources that are not tokens, such as a broker shutdown notification.
pub fn on_signal<S, T, F>(signal: S, callback: F) -> Registration
where
    S: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    Registration::spawn(async move {
        let value = signal.await;
        callback(value);
    })
}

/// Merged cancellation signal.
///
/// The merged token is cancelled when either upstream token is cancelled.
/// Cancelling the merged token does not propagate upstream.
#[derive(Debug)]
pub struct MergedCancellation {
    token: CancellationToken,
    _link: Registration,
}

impl MergedCancellation {
    /// The merged token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Merge two cancellation tokens into one.
///
/// The result is a child of `first`, so cancelling `first` is visible
/// immediately. `second` is linked through a spawned task and also checked
/// at merge time.
pub fn merge(first: &CancellationToken, second: &CancellationToken) -> MergedCancellation {
    // ---
    let token = first.child_token();
    if second.is_cancelled() {
        token.cancel();
        return MergedCancellation {
            token,
            _link: Registration::empty(),
        };
    }

    let merged = token.clone();
    let second = second.clone();

    let link = Registration::spawn(async move {
        tokio::select! {
            _ = second.cancelled() => merged.cancel(),
            _ = merged.cancelled() => {}
        }
    });

    MergedCancellation { token, _link: link }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_on_cancelled_fires_once() {
        // ---
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let registration = on_cancelled(&token, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        token.cancel();

        timeout(Duration::from_secs(1), async {
            while !registration.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("callback never ran");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposed_registration_does_not_fire() {
        // ---
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let mut registration = on_cancelled(&token, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registration.dispose();
        registration.dispose();

        token.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registration.is_finished());
    }

    #[tokio::test]
    async fn test_merge_fires_on_either_source() {
        // ---
        let a = CancellationToken::new();
        let b = CancellationToken::new();

        let merged = merge(&a, &b);
        assert!(!merged.token().is_cancelled());

        b.cancel();
        timeout(Duration::from_secs(1), merged.token().cancelled())
            .await
            .expect("merged token not cancelled");

        assert!(!a.is_cancelled());
    }

    #[tokio::test]
    async fn test_merge_of_cancelled_source_is_cancelled() {
        // ---
        let a = CancellationToken::new();
        a.cancel();

        let merged = merge(&a, &CancellationToken::new());
        assert!(merged.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_merge_sees_first_source_without_yielding() {
        // ---
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let merged = merge(&a, &b);

        a.cancel();

        assert!(merged.token().is_cancelled());
        assert!(!b.is_cancelled());
    }
}
