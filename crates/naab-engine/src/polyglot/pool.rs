//! Bounded worker pool for polyglot block execution.
//!
//! Submission enqueues a closure and returns a [`TaskHandle`] future.
//! Workers dequeue under a mutex/condvar pair. Shutdown stops intake,
//! wakes every worker, drains the remaining queue, and joins.
//!
//! Workers that may call into an embedded foreign runtime need
//! per-thread setup (the Python thread state and warmup must happen
//! before the worker's first task — see the python executor module).
//! The pool runs an optional init hook once per worker before it starts
//! taking work.

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Default worker count: one per CPU, capped to keep thread pressure
/// bounded on constrained targets.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 8)
}

/// Pool errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Submission after shutdown.
    #[error("thread pool is stopped")]
    Stopped,

    /// The task was dropped without producing a result (worker panic).
    #[error("task was cancelled or its worker panicked")]
    Lost,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Per-worker initialisation hook, run once before the worker's first
/// task.
pub type WorkerInit = Arc<dyn Fn(usize) + Send + Sync>;

struct Queue {
    jobs: VecDeque<Job>,
    stopped: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Future for a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes.
    pub fn wait(self) -> Result<T, PoolError> {
        self.rx.recv().map_err(|_| PoolError::Lost)
    }

    /// Poll without blocking.
    pub fn try_wait(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Fixed-size worker pool.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Pool with [`default_worker_count`] workers.
    pub fn new() -> Self {
        Self::with_workers(default_worker_count(), None)
    }

    /// Pool with `count` workers and an optional per-worker init hook.
    pub fn with_workers(count: usize, init: Option<WorkerInit>) -> Self {
        let count = count.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..count)
            .map(|id| {
                let shared = shared.clone();
                let init = init.clone();
                thread::Builder::new()
                    .name(format!("naab-worker-{id}"))
                    .spawn(move || {
                        if let Some(init) = init {
                            init(id);
                        }
                        Self::run_loop(&shared);
                    })
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Self { shared, workers }
    }

    fn run_loop(shared: &Shared) {
        loop {
            let job = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some(job) = queue.jobs.pop_front() {
                        break job;
                    }
                    if queue.stopped {
                        return;
                    }
                    shared.available.wait(&mut queue);
                }
            };
            job();
        }
    }

    /// Submit a closure; returns a future for its result.
    ///
    /// Fails with [`PoolError::Stopped`] after shutdown.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx): (Sender<T>, Receiver<T>) = bounded(1);
        let job: Job = Box::new(move || {
            let result = task();
            // The receiver may be gone if the caller gave up; nothing to do.
            let _ = tx.send(result);
        });

        {
            let mut queue = self.shared.queue.lock();
            if queue.stopped {
                return Err(PoolError::Stopped);
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();
        Ok(TaskHandle { rx })
    }

    /// Number of queued (not yet started) tasks.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop intake, drain the queue, and join every worker.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopped {
                return;
            }
            queue.stopped = true;
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_submit_returns_result() {
        let pool = ThreadPool::with_workers(2, None);
        let handle = pool.submit(|| 21 * 2).unwrap();
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_tasks_run_concurrently() {
        let pool = ThreadPool::with_workers(4, None);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();
        for h in handles {
            h.wait().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_shutdown_drains_queue_then_rejects() {
        let mut pool = ThreadPool::with_workers(1, None);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 8, "queued work must drain");
        for h in handles {
            h.wait().unwrap();
        }
        assert_eq!(pool.submit(|| ()).unwrap_err(), PoolError::Stopped);
    }

    #[test]
    fn test_worker_init_runs_once_per_worker() {
        let inits = Arc::new(AtomicUsize::new(0));
        let hook: WorkerInit = {
            let inits = inits.clone();
            Arc::new(move |_id| {
                inits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut pool = ThreadPool::with_workers(3, Some(hook));
        let handles: Vec<_> = (0..12)
            .map(|_| pool.submit(|| thread::sleep(Duration::from_millis(2))).unwrap())
            .collect();
        for h in handles {
            h.wait().unwrap();
        }
        // Join every worker so each one's startup init has run.
        pool.shutdown();
        assert_eq!(inits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_worker_count_bounds() {
        let n = default_worker_count();
        assert!((1..=8).contains(&n));
    }
}
