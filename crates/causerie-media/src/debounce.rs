//! Trailing-edge debouncer for settings pushes.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Runs an action after a quiet period. Each [`Debouncer::call`] cancels
/// the previous pending action, so only the last one in a burst fires.
pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn call<F>(&mut self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn only_last_call_in_a_burst_fires() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        let fired = Arc::new(AtomicU32::new(0));

        for i in 1..=3u32 {
            let f = fired.clone();
            debouncer.call(async move {
                f.store(i, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(50)).await;
        }

        tokio::time::advance(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_pending_action() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        debouncer.call(async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
