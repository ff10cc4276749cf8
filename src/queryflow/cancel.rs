//! Cooperative cancellation for in-flight work.
//!
//! Every suspension point in the engine — completion calls, tool
//! invocations, transport sends — accepts a [`CancelToken`]. The token is a
//! cheaply cloneable receiver; the matching [`CancelHandle`] is held by
//! whoever owns the work's lifetime (the session layer holds one per run
//! and fires it when the client disconnects).
//!
//! # Example
//!
//! ```rust
//! use queryflow::queryflow::cancel::CancelToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (handle, token) = CancelToken::new();
//! assert!(!token.is_cancelled());
//! handle.cancel();
//! assert!(token.is_cancelled());
//! token.cancelled().await; // resolves immediately once fired
//! # }
//! ```

use tokio::sync::watch;

/// The firing side of a cancellation pair.
///
/// Dropping the handle without calling [`CancelHandle::cancel`] leaves the
/// token permanently un-cancelled.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Fire the cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The observing side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a linked handle/token pair.
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that can never fire. Useful for one-shot invocations that
    /// have no owner interested in cancelling them.
    pub fn never() -> CancelToken {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes with a
        // pending false value.
        std::mem::forget(tx);
        CancelToken { rx }
    }

    /// Whether the handle has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the handle fires. If the handle is dropped without
    /// firing, this future never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // The handle is gone; no cancel can ever arrive.
                futures_util::future::pending::<()>().await;
            }
        }
    }
}
