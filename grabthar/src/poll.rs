//! Periodic polling with backoff and last-known-good results.
//!
//! A [`Poller`] runs an async handler in a background task, one invocation at
//! a time:
//!
//! - The first outcome, success or failure, is published as soon as it is
//!   available.
//! - Later outcomes replace it only when they succeed, so [`Poller::result`]
//!   keeps returning the most recent good value through transient failures.
//! - After a failure the wait before the next cycle is multiplied by
//!   `multiplier` (capped at `max_interval`); any success resets it to
//!   `period`.
//! - [`Poller::stop`] only prevents the next cycle; a running cycle finishes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::BoxFuture;
use crate::config::{DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_POLL_INTERVAL, DEFAULT_POLL_PERIOD};

/// Produces one poll cycle.
pub type PollHandler<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Observes failed cycles.
pub type ErrorCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerConfig {
    /// Wait between successful cycles.
    pub period: Duration,
    /// Growth factor applied to the wait after each failed cycle.
    pub multiplier: f64,
    /// Upper bound on the wait. Never effectively below `period`.
    pub max_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_POLL_PERIOD,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_interval: DEFAULT_MAX_POLL_INTERVAL,
        }
    }
}

impl PollerConfig {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Wait before the cycle following one that took `current` and
    /// succeeded or failed.
    pub fn next_interval(&self, current: Duration, succeeded: bool) -> Duration {
        if succeeded {
            return self.period;
        }
        let cap = self.max_interval.max(self.period);
        let grown = current.as_secs_f64() * self.multiplier.max(1.0);
        if !grown.is_finite() || grown >= cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(grown)
        }
    }
}

struct Shared<T, E> {
    result: watch::Sender<Option<Result<T, E>>>,
    interval_ms: AtomicU64,
    running: AtomicBool,
    /// Held for the duration of each handler invocation, so a restarted
    /// poller never overlaps a cycle still finishing in the old task.
    cycle: tokio::sync::Mutex<()>,
}

impl<T, E> Shared<T, E> {
    fn publish(&self, outcome: Result<T, E>) {
        self.result.send_if_modified(|current| {
            if current.is_none() || outcome.is_ok() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }
}

struct Running {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

/// Background scheduler for a fallible async task.
pub struct Poller<T, E> {
    config: PollerConfig,
    handler: PollHandler<T, E>,
    on_error: Option<ErrorCallback<E>>,
    shared: Arc<Shared<T, E>>,
    running: Mutex<Option<Running>>,
}

impl<T, E> Poller<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: PollerConfig, handler: PollHandler<T, E>) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            config,
            handler,
            on_error: None,
            shared: Arc::new(Shared {
                result,
                interval_ms: AtomicU64::new(config.period.as_millis() as u64),
                running: AtomicBool::new(false),
                cycle: tokio::sync::Mutex::new(()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Call `on_error` with every failed cycle's error.
    pub fn with_on_error(mut self, on_error: ErrorCallback<E>) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Start polling. The first cycle begins immediately.
    ///
    /// Must be called from within a tokio runtime. Starting a running poller
    /// does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        self.shared.running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.handler),
            self.on_error.clone(),
            self.config,
            token.clone(),
        ));
        *running = Some(Running { token, _task: task });
    }

    /// Stop scheduling further cycles.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(running) = running {
            running.token.cancel();
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Wait currently scheduled between cycles.
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.shared.interval_ms.load(Ordering::SeqCst))
    }

    /// The published outcome, waiting for the first cycle if needed.
    ///
    /// Never resolves on a poller that was never started.
    pub async fn result(&self) -> Result<T, E> {
        let mut rx = self.shared.result.subscribe();
        // The sender lives in `self.shared`, so the wait cannot fail while
        // `self` is borrowed.
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(current) => current.clone(),
            Err(_) => None,
        };
        match outcome {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }

    /// The published outcome, if the first cycle has finished.
    pub fn try_result(&self) -> Option<Result<T, E>> {
        self.shared.result.borrow().clone()
    }
}

impl<T, E> Drop for Poller<T, E> {
    fn drop(&mut self) {
        if let Some(running) = self
            .running
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            running.token.cancel();
        }
    }
}

async fn run_loop<T, E>(
    shared: Arc<Shared<T, E>>,
    handler: PollHandler<T, E>,
    on_error: Option<ErrorCallback<E>>,
    config: PollerConfig,
    token: CancellationToken,
) {
    let mut interval = config.period;

    loop {
        let outcome = {
            let _cycle = shared.cycle.lock().await;
            handler().await
        };

        let succeeded = outcome.is_ok();
        if let (Err(e), Some(on_error)) = (&outcome, &on_error) {
            on_error(e);
        }
        shared.publish(outcome);

        interval = config.next_interval(interval, succeeded);
        shared
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);

        if token.is_cancelled() {
            break;
        }

        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("poller stopped");
}
