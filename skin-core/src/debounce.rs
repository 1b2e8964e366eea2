//! A cancelable delayed action.
//!
//! Each [`Debounce::schedule`] call replaces any pending action and restarts
//! the timer, so a burst of calls runs only the last action, once, after the
//! burst has been quiet for the full delay.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

type Action = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Slot {
    action: Option<Action>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

/// Debounced action runner. Must be used inside a tokio runtime.
pub struct Debounce {
    delay: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for Debounce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debounce")
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Debounce {
    /// Create a debouncer with the given quiet period.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// The quiet period.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action`, replacing any pending one and restarting the timer.
    pub fn schedule<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        slot.action = Some(Box::new(action));

        let generation = slot.generation;
        let delay = self.delay;
        let shared = Arc::clone(&self.slot);
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let action = {
                let mut slot = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                slot.action.take()
            };
            if let Some(action) = action {
                action();
            }
        }));
    }

    /// Run the pending action now, if any.
    pub fn flush(&self) {
        let action = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.generation += 1;
            slot.action.take()
        };
        if let Some(action) = action {
            action();
        }
    }

    /// Drop the pending action without running it.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        slot.action = None;
    }

    /// Whether an action is waiting to run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .action
            .is_some()
    }
}

impl Drop for Debounce {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_once() {
        let debounce = Debounce::new(Duration::from_millis(150));
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            debounce.schedule(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debounce.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_immediately() {
        let debounce = Debounce::new(Duration::from_millis(150));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        debounce.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debounce.is_pending());
        debounce.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_action() {
        let debounce = Debounce::new(Duration::from_millis(150));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        debounce.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debounce.cancel();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
