//! Single-worker affinity executor.
//!
//! Some broker SDK objects (connections, channels) must not be used from more
//! than one thread at a time, and some must stay on the thread that created
//! them. [`AffinityExecutor`] owns exactly one dedicated OS thread and runs
//! submitted operations on it, one at a time, in submission order.
//!
//! ## Concurrency model
//!
//! ```text
//!  caller A ─┐
//!  caller B ─┼─► [bounded FIFO queue] ─► affinity thread ─► op() ─► oneshot ─► caller
//!  caller C ─┘
//! ```
//!
//! - Callers await queue capacity (`send().await`); no Tokio worker blocks.
//! - The affinity thread blocks on the queue, which is all it is for.
//! - Operations are synchronous closures. They cannot await a nested
//!   submission, so the worker can never wait on itself.
//!
//! ## Shutdown
//!
//! Cancelling the owner's token, or calling [`AffinityExecutor::shutdown`],
//! makes queued and future submissions fail with
//! [`Error::ExecutorUnavailable`]. The thread exits once the queue is drained.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::panic_message;
use crate::{
    // ---
    log_debug,
    log_error,
    Error,
    Result,
};

/// Default capacity of the submission queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serialized executor bound to one dedicated thread.
pub struct AffinityExecutor {
    name: Arc<str>,
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    token: CancellationToken,
    worker_id: ThreadId,
    _worker: JoinHandle<()>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AffinityExecutor {
    /// Spawn the affinity thread.
    ///
    /// The executor becomes unavailable when `parent` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the operating system refuses to create the thread.
    pub fn spawn(
        name: impl Into<Arc<str>>,
        capacity: usize,
        parent: &CancellationToken,
    ) -> Result<Self> {
        // ---
        let name = name.into();
        let token = parent.child_token();
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));

        let worker_token = token.clone();
        let worker_name = Arc::clone(&name);

        let worker = std::thread::Builder::new()
            .name(format!("affinity-{name}"))
            .spawn(move || {
                log_debug!("[{worker_name}] affinity worker started");

                while let Some(job) = rx.blocking_recv() {
                    if worker_token.is_cancelled() {
                        // Dropping the job drops its responder; the caller sees ExecutorUnavailable.
                        drop(job);
                        continue;
                    }
                    job();
                }

                log_debug!("[{worker_name}] affinity worker stopped");
            })?;

        let worker_id = worker.thread().id();

        Ok(Self {
            name,
            queue: Mutex::new(Some(tx)),
            token,
            worker_id,
            _worker: worker,
        })
    }

    /// Name used for the thread (`affinity-{name}`) and log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the affinity thread.
    pub fn worker_thread_id(&self) -> ThreadId {
        self.worker_id
    }

    /// True once shut down or cancelled.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `operation` on the affinity thread and return its result.
    ///
    /// # Errors
    ///
    /// - [`Error::ExecutorUnavailable`] if the executor is, or becomes, shut
    ///   down before the operation completes
    /// - [`Error::Panicked`] if the operation panicked; the worker survives
    /// - any error returned by `operation`
    pub async fn submit<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        // ---
        if self.token.is_cancelled() {
            return Err(Error::ExecutorUnavailable);
        }

        let queue = lock_ignore_poison(&self.queue)
            .clone()
            .ok_or(Error::ExecutorUnavailable)?;

        let (resp_tx, resp_rx) = oneshot::channel::<Result<T>>();
        let name = Arc::clone(&self.name);

        let job: Job = Box::new(move || {
            let result = match std::panic::catch_unwind(AssertUnwindSafe(operation)) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log_error!("[{name}] operation panicked: {message}");
                    Err(Error::Panicked(message))
                }
            };
            let _ = resp_tx.send(result);
        });

        tokio::select! {
            biased;
            sent = queue.send(job) => sent.map_err(|_| Error::ExecutorUnavailable)?,
            _ = self.token.cancelled() => return Err(Error::ExecutorUnavailable),
        }
        drop(queue);

        tokio::select! {
            biased;
            result = resp_rx => result.map_err(|_| Error::ExecutorUnavailable)?,
            _ = self.token.cancelled() => Err(Error::ExecutorUnavailable),
        }
    }

    /// Stop accepting work. Idempotent.
    ///
    /// Queued operations are discarded; their callers receive
    /// [`Error::ExecutorUnavailable`].
    pub fn shutdown(&self) {
        // ---
        self.token.cancel();
        if lock_ignore_poison(&self.queue).take().is_some() {
            log_debug!("[{}] affinity executor shut down", self.name);
        }
    }
}

impl Drop for AffinityExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AffinityExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityExecutor")
            .field("name", &self.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{timeout, Duration};

    fn executor(capacity: usize) -> (AffinityExecutor, CancellationToken) {
        let token = CancellationToken::new();
        let exec = AffinityExecutor::spawn("test", capacity, &token).expect("spawn failed");
        (exec, token)
    }

    #[tokio::test]
    async fn test_operations_run_on_the_affinity_thread() {
        // ---
        let (exec, _token) = executor(DEFAULT_QUEUE_CAPACITY);

        let (id, name) = exec
            .submit(|| {
                let current = std::thread::current();
                Ok((current.id(), current.name().map(str::to_string)))
            })
            .await
            .expect("submit failed");

        assert_eq!(id, exec.worker_thread_id());
        assert_ne!(id, std::thread::current().id());
        assert_eq!(name.as_deref(), Some("affinity-test"));
    }

    #[tokio::test]
    async fn test_submissions_run_in_fifo_order() {
        // ---
        let (exec, _token) = executor(64);
        let observed = Arc::new(Mutex::new(Vec::new()));

        let submissions = (0..32).map(|i| {
            let observed = Arc::clone(&observed);
            exec.submit(move || {
                lock_ignore_poison(&observed).push(i);
                Ok(())
            })
        });

        for result in join_all(submissions).await {
            result.expect("submit failed");
        }

        let observed = lock_ignore_poison(&observed).clone();
        assert_eq!(observed, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_operations_never_overlap() {
        // ---
        let exec = Arc::new(executor(4).0);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let exec = Arc::clone(&exec);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            tasks.push(tokio::spawn(async move {
                exec.submit(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }

        for task in tasks {
            task.await.expect("task panicked").expect("submit failed");
        }
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operation_error_is_scoped_to_its_caller() {
        // ---
        let (exec, _token) = executor(DEFAULT_QUEUE_CAPACITY);

        let failed: Result<()> = exec
            .submit(|| Err(Error::Channel("no channels left".into())))
            .await;
        assert!(matches!(failed, Err(Error::Channel(_))));

        let panicked: Result<()> = exec.submit(|| panic!("boom")).await;
        assert!(matches!(panicked, Err(Error::Panicked(ref m)) if m == "boom"));

        assert_eq!(exec.submit(|| Ok(5)).await.expect("submit failed"), 5);
    }

    #[tokio::test]
    async fn test_cancelled_parent_fails_submissions() {
        // ---
        let (exec, token) = executor(DEFAULT_QUEUE_CAPACITY);

        token.cancel();

        let result = timeout(Duration::from_secs(1), exec.submit(|| Ok(())))
            .await
            .expect("submit hung");
        assert!(matches!(result, Err(Error::ExecutorUnavailable)));
        assert!(exec.is_shutdown());
    }

    #[tokio::test]
    async fn test_pending_submission_fails_on_shutdown() {
        // ---
        let exec = Arc::new(executor(DEFAULT_QUEUE_CAPACITY).0);
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let blocker = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                exec.submit(move || {
                    let _ = started_tx.send(());
                    let _ = release_rx.recv();
                    Ok(())
                })
                .await
            })
        };

        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .expect("join failed")
            .expect("blocker never started");

        let pending = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move { exec.submit(|| Ok(())).await })
        };
        tokio::task::yield_now().await;

        exec.shutdown();
        let _ = release_tx.send(());

        let pending = timeout(Duration::from_secs(1), pending)
            .await
            .expect("pending submission hung")
            .expect("task panicked");
        assert!(matches!(pending, Err(Error::ExecutorUnavailable)));

        let _ = blocker.await;
        assert!(matches!(
            exec.submit(|| Ok(())).await,
            Err(Error::ExecutorUnavailable)
        ));
    }
}
