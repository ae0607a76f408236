//! Readiness signals for retry-based async operations.
//!
//! A `Signal` is the Rust rendition of a "cancellable infinite timer": a
//! waiter subscribes, retries its operation, and parks on the subscription
//! until the corresponding condition becomes true or the session goes away.
//! Public async operations are expressed as
//! `loop { try; if retry, await the signal }`.
//!
//! Subscribing *before* retrying closes the wakeup race: a notification that
//! fires between the subscribe and the retry is still delivered.

use flume::{Receiver, Sender};
use parking_lot::Mutex;

/// Outcome of a wait on a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The condition the signal tracks became true.
    Ready,
    /// The signal was torn down; the operation should fail with
    /// `OperationAborted`.
    Aborted,
}

#[derive(Default)]
struct SignalInner {
    waiters: Vec<Sender<Wake>>,
    aborted: bool,
}

/// A broadcast wakeup point for one readiness condition
/// (readable / writable / closed / accept-ready).
#[derive(Default)]
pub struct Signal {
    inner: Mutex<SignalInner>,
}

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Must be called before the retry so that a
    /// notification racing with the retry is not lost.
    pub fn subscribe(&self) -> Waiter {
        let (tx, rx) = flume::bounded(1);
        let mut inner = self.inner.lock();
        if inner.aborted {
            let _ = tx.try_send(Wake::Aborted);
        } else {
            inner.waiters.push(tx);
        }
        Waiter { rx }
    }

    /// Wake every currently subscribed waiter with [`Wake::Ready`].
    pub fn notify(&self) {
        let waiters = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.waiters)
        };
        for tx in waiters {
            let _ = tx.try_send(Wake::Ready);
        }
    }

    /// Permanently tear the signal down: current and future waiters observe
    /// [`Wake::Aborted`].
    pub fn abort(&self) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.aborted = true;
            std::mem::take(&mut inner.waiters)
        };
        for tx in waiters {
            let _ = tx.try_send(Wake::Aborted);
        }
    }

    /// True once [`Signal::abort`] has run.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }
}

/// A single-use subscription handed out by [`Signal::subscribe`].
pub struct Waiter {
    rx: Receiver<Wake>,
}

impl Waiter {
    /// Park until the signal fires. A dropped signal counts as an abort.
    pub async fn wait(self) -> Wake {
        self.rx.recv_async().await.unwrap_or(Wake::Aborted)
    }

    /// Non-blocking probe, used by tests.
    #[must_use]
    pub fn try_wake(&self) -> Option<Wake> {
        self.rx.try_recv().ok()
    }
}
