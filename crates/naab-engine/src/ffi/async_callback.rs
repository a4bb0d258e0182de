//! Thread-safe async callbacks across the FFI boundary.
//!
//! An [`AsyncCallback`] owns a callable, a name and a timeout.
//! `execute_blocking` runs the callable on the current thread;
//! `execute_async` schedules it on a dedicated thread and returns a
//! future. Cancellation is a flag the callable can observe — it never
//! preempts. A bounded pool limits concurrent submissions, and helpers
//! provide retry with exponential backoff, parallel-all, and race.

use crate::error::NaabError;
use crate::interpreter::Value;
use crossbeam::channel::{bounded, Receiver};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The callable type: observes the cancellation token, returns a value
/// or an error.
pub type CallbackFn = Arc<dyn Fn(&CancelToken) -> Result<Value, NaabError> + Send + Sync>;

/// Cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Does not preempt a running callable.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of one callback execution.
#[derive(Debug, Clone)]
pub struct AsyncCallbackResult {
    /// True when the callable returned a value in time.
    pub success: bool,
    /// The returned value (Null on failure).
    pub value: Value,
    /// Failure message.
    pub error_message: String,
    /// Failure type name (`timeout`, `cancelled`, an error kind, ...).
    pub error_type: String,
    /// Wall-clock execution time.
    pub elapsed: Duration,
}

impl AsyncCallbackResult {
    fn success(value: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            value,
            error_message: String::new(),
            error_type: String::new(),
            elapsed,
        }
    }

    fn failure(error_type: &str, message: String, elapsed: Duration) -> Self {
        Self {
            success: false,
            value: Value::Null,
            error_message: message,
            error_type: error_type.to_string(),
            elapsed,
        }
    }
}

/// A named callable with a timeout and a cancellation token.
pub struct AsyncCallback {
    callback: CallbackFn,
    name: String,
    timeout: Duration,
    token: CancelToken,
}

impl AsyncCallback {
    /// Wrap `callback` under `name` with `timeout`.
    pub fn new(callback: CallbackFn, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            callback,
            name: name.into(),
            timeout,
            token: CancelToken::new(),
        }
    }

    /// The callback name (for logs and error messages).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The cancellation token; clone it into the callable's closure to
    /// observe cancellation.
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Run on the current thread.
    ///
    /// The timeout is cooperative here: an over-deadline completion is
    /// reported as a timeout failure, but the callable is not preempted.
    pub fn execute_blocking(&self) -> AsyncCallbackResult {
        let started = Instant::now();
        if self.token.is_cancelled() {
            return AsyncCallbackResult::failure(
                "cancelled",
                format!("callback '{}' was cancelled before it ran", self.name),
                started.elapsed(),
            );
        }
        let outcome = (self.callback)(&self.token);
        let elapsed = started.elapsed();
        match outcome {
            Ok(_) if elapsed > self.timeout => AsyncCallbackResult::failure(
                "timeout",
                format!(
                    "callback '{}' exceeded {} ms",
                    self.name,
                    self.timeout.as_millis()
                ),
                elapsed,
            ),
            Ok(value) => AsyncCallbackResult::success(value, elapsed),
            Err(err) => {
                AsyncCallbackResult::failure(err.kind.name(), err.message, elapsed)
            }
        }
    }

    /// Schedule on a dedicated thread; returns a future.
    ///
    /// Waiting past the timeout yields a timeout failure and cancels the
    /// token; the thread itself runs to completion in the background.
    pub fn execute_async(&self) -> AsyncCallbackFuture {
        let (tx, rx) = bounded(1);
        let callback = self.callback.clone();
        let token = self.token.clone();
        let name = self.name.clone();
        let started = Instant::now();

        thread::Builder::new()
            .name(format!("naab-callback-{name}"))
            .spawn(move || {
                let outcome = callback(&token);
                let elapsed = started.elapsed();
                let result = match outcome {
                    Ok(value) => AsyncCallbackResult::success(value, elapsed),
                    Err(err) => {
                        AsyncCallbackResult::failure(err.kind.name(), err.message, elapsed)
                    }
                };
                let _ = tx.send(result);
            })
            .expect("failed to spawn callback thread");

        AsyncCallbackFuture {
            rx,
            token: self.token.clone(),
            name: self.name.clone(),
            timeout: self.timeout,
        }
    }
}

/// Future for an async callback execution.
pub struct AsyncCallbackFuture {
    rx: Receiver<AsyncCallbackResult>,
    token: CancelToken,
    name: String,
    timeout: Duration,
}

impl AsyncCallbackFuture {
    /// Wait for the result, up to the callback's timeout.
    pub fn wait(self) -> AsyncCallbackResult {
        match self.rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => {
                self.token.cancel();
                AsyncCallbackResult::failure(
                    "timeout",
                    format!(
                        "callback '{}' exceeded {} ms",
                        self.name,
                        self.timeout.as_millis()
                    ),
                    self.timeout,
                )
            }
        }
    }

    /// Poll without blocking.
    pub fn try_wait(&self) -> Option<AsyncCallbackResult> {
        self.rx.try_recv().ok()
    }
}

/// Bounds the number of concurrently running callbacks.
pub struct AsyncCallbackPool {
    max_concurrent: usize,
    active: Arc<(Mutex<usize>, Condvar)>,
}

impl AsyncCallbackPool {
    /// Pool allowing `max_concurrent` callbacks at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            active: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    /// Number of callbacks currently running.
    pub fn active_count(&self) -> usize {
        *self.active.0.lock()
    }

    /// Submit a callback, blocking while the pool is full.
    pub fn submit(
        &self,
        callback: CallbackFn,
        name: &str,
        timeout: Duration,
    ) -> AsyncCallbackFuture {
        {
            let (lock, cv) = &*self.active;
            let mut active = lock.lock();
            while *active >= self.max_concurrent {
                cv.wait(&mut active);
            }
            *active += 1;
        }

        let slot = self.active.clone();
        let inner = callback;
        let wrapped: CallbackFn = Arc::new(move |token| {
            let result = inner(token);
            let (lock, cv) = &*slot;
            *lock.lock() -= 1;
            cv.notify_one();
            result
        });

        AsyncCallback::new(wrapped, name, timeout).execute_async()
    }
}

/// Run `callback` up to `max_attempts` times with exponential backoff,
/// doubling `initial_delay` between attempts.
pub fn execute_with_retry(
    callback: CallbackFn,
    name: &str,
    max_attempts: usize,
    initial_delay: Duration,
    timeout: Duration,
) -> AsyncCallbackResult {
    let attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut last = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            thread::sleep(delay);
            delay = delay.saturating_mul(2);
        }
        let result = AsyncCallback::new(callback.clone(), name, timeout).execute_blocking();
        if result.success {
            return result;
        }
        last = Some(result);
    }
    last.expect("at least one attempt runs")
}

/// Run every callback concurrently and collect all results in order.
pub fn execute_parallel(
    callbacks: Vec<CallbackFn>,
    group_name: &str,
    timeout: Duration,
) -> Vec<AsyncCallbackResult> {
    let futures: Vec<AsyncCallbackFuture> = callbacks
        .into_iter()
        .enumerate()
        .map(|(i, cb)| {
            AsyncCallback::new(cb, format!("{group_name}[{i}]"), timeout).execute_async()
        })
        .collect();
    futures.into_iter().map(AsyncCallbackFuture::wait).collect()
}

/// Run every callback concurrently; the first success wins and the rest
/// are cancelled. Returns the last failure when none succeed.
pub fn execute_race(
    callbacks: Vec<CallbackFn>,
    group_name: &str,
    timeout: Duration,
) -> AsyncCallbackResult {
    if callbacks.is_empty() {
        return AsyncCallbackResult::failure("empty_race", "no callbacks to race".to_string(), Duration::ZERO);
    }

    let wrappers: Vec<AsyncCallback> = callbacks
        .into_iter()
        .enumerate()
        .map(|(i, cb)| AsyncCallback::new(cb, format!("{group_name}[{i}]"), timeout))
        .collect();
    let tokens: Vec<CancelToken> = wrappers.iter().map(AsyncCallback::cancel_token).collect();
    let mut futures: Vec<Option<AsyncCallbackFuture>> =
        wrappers.iter().map(|w| Some(w.execute_async())).collect();

    let deadline = Instant::now() + timeout;
    let mut last_failure = None;
    loop {
        let mut outstanding = 0;
        for slot in futures.iter_mut() {
            let Some(future) = slot else { continue };
            match future.try_wait() {
                Some(result) if result.success => {
                    for token in &tokens {
                        token.cancel();
                    }
                    return result;
                }
                Some(result) => {
                    last_failure = Some(result);
                    *slot = None;
                }
                None => outstanding += 1,
            }
        }
        if outstanding == 0 {
            return last_failure.unwrap_or_else(|| {
                AsyncCallbackResult::failure(
                    "empty_race",
                    "no callbacks to race".to_string(),
                    Duration::ZERO,
                )
            });
        }
        if Instant::now() >= deadline {
            for token in &tokens {
                token.cancel();
            }
            return AsyncCallbackResult::failure(
                "timeout",
                format!("race '{group_name}' exceeded {} ms", timeout.as_millis()),
                timeout,
            );
        }
        thread::sleep(Duration::from_millis(1));
    }
}
