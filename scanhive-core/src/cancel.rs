//! A lightweight, cloneable cancellation signal shared by every worker spawned for one
//! scan job (spec §5 "All long-running tasks honour a shared cancellation token"). The
//! teacher crate cancels scans with a one-shot `mpsc` channel per scan
//! (`streaming_scanner::ScanHandle::cancel_tx`); this core needs the same signal observed
//! by many concurrently-running tasks and checked synchronously besides, so it's built on
//! `Arc<AtomicBool>` + `Arc<Notify>` instead of a channel that only one receiver can drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already cancelled, otherwise waits for `cancel()`. Meant to
    /// be used as a branch in `tokio::select!` so blocking operations can be raced against
    /// cancellation (spec §5 "Every blocking select includes the cancellation branch").
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
