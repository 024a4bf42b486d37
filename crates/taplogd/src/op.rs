//! Single-resume cancellable operations.
//!
//! Bridges callback-style platform work into an awaitable handle. The
//! terminal state is committed by an atomic compare-and-set: completion,
//! failure, timeout, and cancellation all race for the one transition out of
//! `Pending`, and every loser is a silent no-op. The work's stop/cleanup
//! closure runs on whichever terminal path wins - exactly once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const FAILED: u8 = 2;
const TIMED_OUT: u8 = 3;
const CANCELLED: u8 = 4;

/// Terminal outcome of a cancellable operation.
#[derive(Debug, PartialEq)]
pub enum OpOutcome<T> {
    Completed(T),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Stop/cleanup closure returned by the work when it starts.
pub type Cleanup = Box<dyn FnOnce() + Send>;

struct Shared<T> {
    state: AtomicU8,
    tx: Mutex<Option<oneshot::Sender<OpOutcome<T>>>>,
    cleanup: Mutex<Option<Cleanup>>,
}

impl<T> Shared<T> {
    /// Attempt the one terminal transition. Returns false if another
    /// transition already won.
    fn resolve(&self, state: u8, outcome: OpOutcome<T>) -> bool {
        if self
            .state
            .compare_exchange(PENDING, state, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // The winner releases the work's resources, whatever the path.
        let cleanup = self.cleanup.lock().unwrap().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        if let Some(tx) = self.tx.lock().unwrap().take() {
            // A dropped waiter is fine; the state transition already happened.
            let _ = tx.send(outcome);
        }
        true
    }

    /// Park the cleanup closure, or run it immediately if the operation
    /// already resolved while the work was starting.
    fn register_cleanup(&self, cleanup: Cleanup) {
        let mut slot = self.cleanup.lock().unwrap();
        if self.state.load(Ordering::Acquire) == PENDING {
            *slot = Some(cleanup);
        } else {
            drop(slot);
            cleanup();
        }
    }
}

/// Completion side handed to the work. Clonable; safe to fire from any
/// thread, any number of times - only the first call lands.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Completer<T> {
    pub fn complete(&self, value: T) {
        self.shared.resolve(COMPLETED, OpOutcome::Completed(value));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.shared.resolve(FAILED, OpOutcome::Failed(reason.into()));
    }

    /// True while no terminal transition has been committed.
    pub fn is_pending(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == PENDING
    }
}

/// Awaitable handle to one in-flight operation.
pub struct OperationHandle<T> {
    rx: oneshot::Receiver<OpOutcome<T>>,
    shared: Arc<Shared<T>>,
    timer: tokio::task::JoinHandle<()>,
}

impl<T: Send + 'static> OperationHandle<T> {
    /// Start one operation with a timeout.
    ///
    /// `work` receives a completer and starts the underlying subsystem,
    /// returning its stop closure. A start error commits `Failed`
    /// immediately with nothing to release.
    pub fn start<F>(timeout: Duration, work: F) -> Self
    where
        F: FnOnce(Completer<T>) -> anyhow::Result<Cleanup>,
    {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(PENDING),
            tx: Mutex::new(Some(tx)),
            cleanup: Mutex::new(None),
        });

        let completer = Completer {
            shared: shared.clone(),
        };
        match work(completer) {
            Ok(cleanup) => shared.register_cleanup(cleanup),
            Err(e) => {
                shared.resolve(FAILED, OpOutcome::Failed(e.to_string()));
            }
        }

        let timeout_shared = shared.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if timeout_shared.resolve(TIMED_OUT, OpOutcome::TimedOut) {
                warn!("operation timed out after {:?}", timeout);
            }
        });

        Self { rx, shared, timer }
    }

    /// Wait for the terminal outcome. Resolves exactly once and never
    /// outlasts the timeout.
    pub async fn wait(mut self) -> OpOutcome<T> {
        let outcome = match (&mut self.rx).await {
            Ok(outcome) => outcome,
            // The sender cannot drop before resolving unless the runtime is
            // tearing down; treat it as cancellation.
            Err(_) => OpOutcome::Cancelled,
        };
        self.timer.abort();
        outcome
    }

    /// Force `Cancelled` if still pending and signal the work to stop.
    /// Never waits for the work to acknowledge.
    pub fn cancel(&self) {
        self.shared.resolve(CANCELLED, OpOutcome::Cancelled);
        self.timer.abort();
    }
}

impl<T> Drop for OperationHandle<T> {
    /// An abandoned handle (e.g. its acquirer future was dropped at the
    /// global deadline) still releases the work's resources.
    fn drop(&mut self) {
        self.shared.resolve(CANCELLED, OpOutcome::Cancelled);
        self.timer.abort();
    }
}
