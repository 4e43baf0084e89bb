//! Worker pools (C6, C7) and the result processor (C8), plus the queue-teardown helper
//! shared by the directory-queue manager and the work-queue closer (spec §4.10 "Queue
//! teardown"). The shared-`Arc<Mutex<Receiver>>`-pulled-by-N-spawned-loops shape follows
//! `ferrex-core/src/streaming_scanner.rs`'s `folder_scan_worker`/`file_process_worker` pair.

pub mod directory_pool;
pub mod file_pool;
pub mod result_processor;

pub use directory_pool::DirectoryPool;
pub use file_pool::FilePool;
pub use result_processor::ResultProcessor;

use std::time::Duration;

use crate::cancel::CancelToken;

/// Waits out an initial grace period, then polls `is_drained` on `tick_interval`,
/// requiring `confirm_ticks` consecutive drained observations before returning. Returns
/// early (without confirming drained) if `cancel` fires. Used by both the directory-queue
/// manager and the work-queue closer so premature closure during a burst of new work
/// can't truncate a scan.
pub async fn close_when_drained(
    is_drained: impl Fn() -> bool,
    grace: Duration,
    confirm_ticks: u32,
    tick_interval: Duration,
    cancel: &CancelToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(grace) => {}
    }

    let mut consecutive = 0u32;
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if is_drained() {
                    consecutive += 1;
                    if consecutive >= confirm_ticks {
                        return;
                    }
                } else {
                    consecutive = 0;
                }
            }
        }
    }
}
