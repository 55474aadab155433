//! Cancellable repeating task on the tokio runtime.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs a job every `period`, first run immediately. Runs never overlap:
/// a job that overruns its period delays the next tick instead of
/// stacking up behind it. Dropping the handle cancels the task.
pub struct RepeatingTask {
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    pub fn spawn<F, Fut>(period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                job().await;
            }
        });

        Self { handle }
    }

    /// Stop scheduling. A run in progress is abandoned at its next
    /// await point; this does not wait for it.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
