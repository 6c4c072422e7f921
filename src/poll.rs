//! Cancellable periodic tasks.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A background task that runs `tick` every `period` until stopped.
///
/// Stopping is cooperative: the liveness flag is checked before every
/// reschedule, and a tick already in flight runs to completion. A task
/// waiting for its next tick wakes up as soon as it is stopped.
pub struct Poller {
    alive: Arc<AtomicBool>,
    stopped: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Runs `tick` right away, then every `period`.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let stopped = Arc::new(Notify::new());
        let handle = tokio::spawn({
            let alive = alive.clone();
            let stopped = stopped.clone();
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = stopped.notified() => break,
                    }
                    if !alive.load(Ordering::Acquire) {
                        break;
                    }
                    tick().await;
                }
            }
        });
        Self {
            alive,
            stopped,
            handle,
        }
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
        // Stores a permit when the task is mid-tick.
        self.stopped.notify_one();
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.handle.is_finished()
    }

    /// Stops the poller and waits for the task to wind down.
    pub async fn join(self) {
        self.stop();
        let _ = self.handle.await;
    }
}
