use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use rsls_project::Progress;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::Instrument;

/// A unit of work the queue runs on a blocking thread.
pub trait Task: Send + 'static {
    type Output: Send + 'static;
    fn run(self, progress: &dyn Progress) -> Self::Output;
}

struct QueueInner<T: Task> {
    sender: mpsc::UnboundedSender<T>,
    shutdown_sender: Mutex<Option<oneshot::Sender<()>>>,
}

/// Runs tasks one at a time, in submission order.
///
/// Each task runs to completion on tokio's blocking pool before the next one
/// is taken off the channel. Outputs go to the completion callback given at
/// construction; a task that panics is logged and the queue moves on.
pub struct TaskQueue<T: Task> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Task> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Task> TaskQueue<T> {
    pub fn new<F>(runtime: &Handle, progress: Arc<dyn Progress + Send>, on_complete: F) -> Self
    where
        F: Fn(T::Output) + Send + Sync + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        runtime.spawn(
            async move {
                debug!("Task queue started");
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => {
                            debug!("Task queue received shutdown signal");
                            break;
                        }
                        Some(task) = receiver.recv() => {
                            let progress = Arc::clone(&progress);
                            let running = tokio::task::spawn_blocking(move || task.run(&*progress));
                            match running.await {
                                Ok(output) => on_complete(output),
                                Err(e) => error!(?e, "Queued task did not complete"),
                            }
                        }
                        else => break,
                    }
                }
                info!("Task queue stopped");
            }
            .in_current_span(),
        );

        Self {
            inner: Arc::new(QueueInner {
                sender,
                shutdown_sender: Mutex::new(Some(shutdown_tx)),
            }),
        }
    }

    /// Queue `task` behind everything submitted before it.
    pub fn run(&self, task: T) -> Result<()> {
        self.inner.sender.send(task).map_err(|e| {
            error!("Failed to queue task: worker stopped");
            anyhow::anyhow!("Failed to queue task: {}", e)
        })
    }

    /// Stop taking new tasks. A task already running finishes first.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl<T: Task> QueueInner<T> {
    fn shutdown(&self) {
        let sender = self
            .shutdown_sender
            .lock()
            .map(|mut sender| sender.take())
            .unwrap_or_default();
        if let Some(sender) = sender {
            // the worker may already be gone
            let _ = sender.send(());
        }
    }
}

impl<T: Task> Drop for QueueInner<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use rsls_project::NoProgress;

    use super::*;

    struct Recorded {
        id: usize,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Task for Recorded {
        type Output = Result<usize, usize>;

        fn run(self, progress: &dyn Progress) -> Self::Output {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            progress.report(&format!("task {}", self.id));
            std::thread::sleep(Duration::from_millis(10));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(self.id)
            } else {
                Ok(self.id)
            }
        }
    }

    struct Panics;

    impl Task for Panics {
        type Output = Result<usize, usize>;

        fn run(self, _progress: &dyn Progress) -> Self::Output {
            panic!("task blew up");
        }
    }

    fn collecting_queue<T>() -> (TaskQueue<T>, mpsc::UnboundedReceiver<T::Output>)
    where
        T: Task,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = TaskQueue::new(&Handle::current(), Arc::new(NoProgress), move |output| {
            let _ = tx.send(output);
        });
        (queue, rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tasks_run_serially_in_order() {
        let (queue, mut rx) = collecting_queue::<Recorded>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        for id in 0..10 {
            queue
                .run(Recorded {
                    id,
                    in_flight: Arc::clone(&in_flight),
                    max_in_flight: Arc::clone(&max_in_flight),
                    fail: id % 3 == 0,
                })
                .unwrap();
        }

        let mut completed = Vec::new();
        for _ in 0..10 {
            let output = rx.recv().await.unwrap();
            completed.push(output.unwrap_or_else(|id| id));
        }

        assert_eq!(completed, (0..10).collect::<Vec<_>>());
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = TaskQueue::<Panics>::new(&Handle::current(), Arc::new(NoProgress), move |output| {
            let _ = tx.send(output);
        });
        queue.run(Panics).unwrap();
        queue.run(Panics).unwrap();

        // nothing is delivered for panicking tasks, and the queue keeps accepting work
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(queue.run(Panics).is_ok());
    }

    #[tokio::test]
    async fn test_progress_is_forwarded() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let progress = move |text: &str| sink.lock().unwrap().push(text.to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = TaskQueue::<Recorded>::new(&Handle::current(), Arc::new(progress), move |output| {
            let _ = tx.send(output);
        });

        queue
            .run(Recorded {
                id: 7,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                fail: false,
            })
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Ok(7));
        assert_eq!(*reported.lock().unwrap(), vec!["task 7"]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks() {
        let (queue, _rx) = collecting_queue::<Recorded>();
        queue.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = queue.run(Recorded {
            id: 1,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        assert!(result.is_err());
    }
}
