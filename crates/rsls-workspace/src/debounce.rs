//! Single-slot debouncing of update requests.
//!
//! A [`Debouncer`] holds at most one pending timer. Every submission cancels
//! the pending one; a delayed submission arms a fresh timer, an immediate one
//! runs on the caller's thread. The slot and a generation counter live under
//! one lock, so a timer that lost the race to a newer submission sees a stale
//! generation and does nothing.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct Slot {
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct DebouncerInner {
    delay: Duration,
    runtime: Handle,
    slot: Mutex<Slot>,
}

pub struct Debouncer {
    inner: Arc<DebouncerInner>,
}

impl Debouncer {
    /// Create a debouncer whose timers run on `runtime`.
    #[must_use]
    pub fn new(delay: Duration, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                delay,
                runtime,
                slot: Mutex::new(Slot {
                    generation: 0,
                    timer: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Replace any pending action with `action`.
    ///
    /// # Panics
    ///
    /// Panics if the slot mutex is poisoned.
    pub fn submit<F>(&self, action: F, immediate: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.inner.slot.lock().expect("Debouncer mutex poisoned");
        slot.generation += 1;
        let generation = slot.generation;

        if let Some(timer) = slot.timer.take() {
            tracing::debug!("Cancelling pending debounced action");
            timer.abort();
        }

        if immediate {
            drop(slot);
            action();
            return;
        }

        let inner = Arc::clone(&self.inner);
        let delay = self.inner.delay;
        slot.timer = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let current = {
                let mut slot = inner.slot.lock().expect("Debouncer mutex poisoned");
                let current = slot.generation == generation;
                if current {
                    slot.timer = None;
                }
                current
            };

            if current {
                action();
            }
        }));
    }

    /// Cancel the pending action, if any. Returns whether one was pending.
    ///
    /// # Panics
    ///
    /// Panics if the slot mutex is poisoned.
    pub fn cancel(&self) -> bool {
        let mut slot = self.inner.slot.lock().expect("Debouncer mutex poisoned");
        slot.generation += 1;
        match slot.timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a delayed action is waiting to fire.
    ///
    /// # Panics
    ///
    /// Panics if the slot mutex is poisoned.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner
            .slot
            .lock()
            .expect("Debouncer mutex poisoned")
            .timer
            .is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.inner.slot.lock() {
            slot.generation += 1;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Box<dyn FnOnce() + Send>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let make = move |value: u32| {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(value)) as Box<dyn FnOnce() + Send>
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_only_last_action() {
        let debouncer = Debouncer::new(Duration::from_millis(1000), Handle::current());
        let (fired, action) = recorder();

        for value in 0..5 {
            debouncer.submit(action(value), false);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(fired.lock().unwrap().is_empty());
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*fired.lock().unwrap(), vec![4]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_waits_for_full_delay() {
        let debouncer = Debouncer::new(Duration::from_millis(1000), Handle::current());
        let (fired, action) = recorder();

        debouncer.submit(action(1), false);
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*fired.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_runs_now_and_later_request_still_fires() {
        let debouncer = Debouncer::new(Duration::from_millis(1000), Handle::current());
        let (fired, action) = recorder();

        debouncer.submit(action(1), false);
        debouncer.submit(action(2), true);
        assert_eq!(*fired.lock().unwrap(), vec![2]);

        debouncer.submit(action(3), false);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(*fired.lock().unwrap(), vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_release_pending_timer() {
        let (fired, action) = recorder();

        let debouncer = Debouncer::new(Duration::from_millis(1000), Handle::current());
        debouncer.submit(action(1), false);
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        debouncer.submit(action(2), false);
        drop(debouncer);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_submit_from_other_threads() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let debouncer = Arc::new(Debouncer::new(
            Duration::from_millis(200),
            runtime.handle().clone(),
        ));
        let (fired, action) = recorder();
        let action = Arc::new(action);

        let threads: Vec<_> = (0..8)
            .map(|value| {
                let debouncer = Arc::clone(&debouncer);
                let action = Arc::clone(&action);
                std::thread::spawn(move || debouncer.submit(action(value), false))
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(fired.lock().unwrap().len(), 1);
    }
}
