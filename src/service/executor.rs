// Bounded executor: a fixed pool of OS worker threads for blocking OCR calls
//
// Submission is channel-based and never blocks the async caller; results come
// back through oneshot channels. A panicking task drops its oneshot sender,
// which the awaiting side observes as a failed receive rather than a dead
// worker.

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::errors::ExecutorError;

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct BoundedExecutor {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BoundedExecutor {
    /// Spawn a pool of `worker_threads` OS threads fed from a shared channel.
    pub fn new(worker_threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Task>();

        let mut workers = Vec::with_capacity(worker_threads);
        for i in 0..worker_threads {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ocr-worker-{}", i))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                    debug!("OCR worker exiting");
                })
                .expect("Failed to spawn OCR worker thread");
            workers.push(handle);
        }

        debug!("Started {} OCR worker threads", worker_threads);

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a blocking function on the pool. Returns immediately with a
    /// receiver for the result; fails once `drain_and_stop` has begun.
    pub fn submit<T, F>(&self, f: F) -> Result<oneshot::Receiver<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: Task = Box::new(move || match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                // Receiver may have been dropped; nothing to do then
                let _ = tx.send(value);
            }
            Err(_) => {
                warn!("OCR worker task panicked; dropping its result channel");
            }
        });

        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(s) => {
                s.send(task).map_err(|_| ExecutorError::Stopped)?;
                Ok(rx)
            }
            None => Err(ExecutorError::Stopped),
        }
    }

    /// Close the intake, let queued and running work finish, then join the
    /// workers. Idempotent; new submissions fail from the moment this begins.
    pub fn drain_and_stop(&self) {
        let sender = self.sender.lock().take();
        drop(sender);

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("OCR worker thread panicked during drain");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_executor_runs_submitted_work() {
        let executor = BoundedExecutor::new(2);
        let rx = executor.submit(|| 21 * 2).unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_executor_bounds_parallelism() {
        let executor = Arc::new(BoundedExecutor::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut receivers = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let rx = executor
                .submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
            receivers.push(rx);
        }

        for rx in receivers {
            rx.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_failed_result_not_executor_crash() {
        let executor = BoundedExecutor::new(1);

        let rx = executor.submit(|| -> usize { panic!("synthetic failure") }).unwrap();
        assert!(rx.await.is_err());

        // The worker survives and keeps serving
        let rx = executor.submit(|| 7).unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_drain_waits_for_running_work_and_rejects_new() {
        let executor = Arc::new(BoundedExecutor::new(1));

        let rx = executor
            .submit(|| {
                std::thread::sleep(Duration::from_millis(30));
                1
            })
            .unwrap();

        let drainer = Arc::clone(&executor);
        let drain = tokio::task::spawn_blocking(move || drainer.drain_and_stop());

        assert_eq!(rx.await.unwrap(), 1);
        drain.await.unwrap();

        assert!(executor.is_stopped());
        assert!(matches!(executor.submit(|| 2), Err(ExecutorError::Stopped)));

        // Second drain is a no-op
        executor.drain_and_stop();
    }
}
