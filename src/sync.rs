use std::time::Duration;

use tokio::{sync::watch, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
    /// the mux started shutting down while waiting
    Interrupted,
}

/// wakes every waiter at once, waiters re-check their own condition
///
/// a waiter subscribes before it looks at its condition, so a wake that lands in between
/// is still seen
pub struct WaitQueue {
    generation: watch::Sender<u64>,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generation: watch::channel(0).0,
        }
    }

    pub fn wake_all(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// waits until `cond` holds, `timeout` elapses or `stop` turns true
    pub async fn wait_timeout(
        &self,
        timeout: Duration,
        stop: &watch::Receiver<bool>,
        mut cond: impl FnMut() -> bool,
    ) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut woken = self.generation.subscribe();
        let mut stop = stop.clone();

        loop {
            if cond() {
                return WaitOutcome::Ready;
            }
            if *stop.borrow_and_update() {
                return WaitOutcome::Interrupted;
            }

            tokio::select! {
                _ = woken.changed() => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        return WaitOutcome::Interrupted;
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    return if cond() { WaitOutcome::Ready } else { WaitOutcome::TimedOut };
                }
            }
        }
    }
}

/// waits until the flag behind `rx` equals `value`, false once the sender is gone
pub async fn wait_until(rx: &mut watch::Receiver<bool>, value: bool) -> bool {
    rx.wait_for(|v| *v == value).await.is_ok()
}
