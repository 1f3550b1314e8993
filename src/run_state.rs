use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Shared stop token for the sentinel loops.
///
/// Starts running; `stop()` flips it exactly once and it never comes back.
/// Sleepers are woken as soon as it flips.
#[derive(Debug)]
pub struct RunState {
    running: AtomicBool,
    wake: Notify,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns true if this call performed the transition.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        if was_running {
            self.wake.notify_waiters();
        }
        was_running
    }

    /// Resolve once the token has been stopped.
    pub async fn stopped(&self) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register before re-checking so a concurrent stop() is not missed.
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `period` or until stopped. Returns whether still running.
    pub async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.stopped() => {}
        }
        self.is_running()
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
