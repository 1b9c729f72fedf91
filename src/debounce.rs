use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Single-slot delayed scheduler. Scheduling a new job cancels whatever
/// was pending, so at most one job is ever waiting to fire.
pub struct DebounceScheduler {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceScheduler {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Replace any pending job with `job`, to run after `delay`.
    pub fn schedule<F>(&self, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });
        let mut slot = self.slot.lock().unwrap();
        if let Some(prev) = slot.replace(handle) {
            prev.abort();
        }
    }

    /// Drop the pending job, if any, without running it.
    pub fn cancel(&self) {
        if let Some(prev) = self.slot.lock().unwrap().take() {
            prev.abort();
        }
    }
}

impl Default for DebounceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
