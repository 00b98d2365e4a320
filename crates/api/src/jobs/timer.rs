//! One-shot timers with cancel-before-fire.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Runs callbacks at absolute deadlines on a tokio runtime.
#[derive(Clone)]
pub struct TimerService {
    runtime: Handle,
}

impl TimerService {
    /// Timer service on the runtime of the caller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_runtime(Handle::current())
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Run `task` once `deadline` is reached, or immediately if it has passed.
    pub fn schedule_at<F>(&self, deadline: Instant, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let join = self.runtime.spawn(async move {
            tokio::select! {
                biased;
                // Resolves on explicit cancel and when the handle is dropped.
                _ = cancel_rx => false,
                _ = tokio::time::sleep_until(deadline) => {
                    task.await;
                    true
                }
            }
        });

        TimerHandle {
            deadline,
            cancel: Some(cancel_tx),
            join,
        }
    }

    /// Run `task` after `delay`.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, task)
    }
}

/// Handle to a pending timer.
///
/// Dropping the handle cancels the timer unless its callback has already
/// started.
#[derive(Debug)]
pub struct TimerHandle {
    deadline: Instant,
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<bool>,
}

impl TimerHandle {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Prevent the callback from starting. No effect once it has started.
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Whether the timer task has completed, by firing or by cancellation.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_at_deadline() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = timers.schedule_after(Duration::from_secs(5), counting_task(&fired));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = timers.schedule_after(Duration::from_secs(1), counting_task(&fired));

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        drop(timers.schedule_after(Duration::from_secs(1), counting_task(&fired)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fires_immediately() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let past = Instant::now();
        tokio::time::advance(Duration::from_secs(10)).await;

        let _handle = timers.schedule_at(past, counting_task(&fired));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
