//! Bounded polling and transient-error retry.
//!
//! Every wait in the recycler goes through a [`Poller`]: a fixed poll
//! interval, an upper timeout, and a shutdown signal checked on each
//! iteration. Time comes from an injectable [`Clock`] so tests can run a
//! whole recycle against a virtual clock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ApiError, RecycleError, RecycleResult};

/// Source of monotonic time and sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Receiving side of the operator's interrupt.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the signal fires. Pending forever if it cannot.
    pub async fn triggered(&self) {
        match &self.rx {
            Some(rx) => {
                let mut rx = rx.clone();
                if rx.wait_for(|stop| *stop).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Interval and upper bound for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Result of one check of a polled condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<T, S> {
    /// Condition met.
    Ready(T),
    /// Not yet; carries the observation for the timeout report.
    Waiting(S),
}

/// Why a poll did not complete.
#[derive(Debug)]
pub enum PollError<S> {
    Api(ApiError),
    TimedOut { last: S, elapsed: Duration },
    Interrupted,
}

impl<S> From<ApiError> for PollError<S> {
    fn from(e: ApiError) -> Self {
        Self::Api(e)
    }
}

/// Clock + shutdown signal + retry policy, shared by every component.
#[derive(Clone)]
pub struct Poller {
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    retry: RetryConfig,
}

impl Poller {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            shutdown: ShutdownSignal::never(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn check_interrupted(&self) -> RecycleResult<()> {
        if self.shutdown.is_triggered() {
            return Err(RecycleError::Interrupted);
        }
        Ok(())
    }

    /// Sleep unless interrupted first.
    pub async fn pause(&self, duration: Duration) -> RecycleResult<()> {
        if duration.is_zero() {
            return self.check_interrupted();
        }
        tokio::select! {
            _ = self.clock.sleep(duration) => Ok(()),
            _ = self.shutdown.triggered() => Err(RecycleError::Interrupted),
        }
    }

    /// Check until the condition is met, the timeout elapses, or the
    /// run is interrupted. The first check happens immediately.
    pub async fn until<T, S, F, Fut>(&self, policy: PollPolicy, mut check: F) -> Result<T, PollError<S>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Check<T, S>, ApiError>>,
    {
        let start = self.clock.now();
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                return Err(PollError::Interrupted);
            }
            attempt += 1;

            let last = match check().await? {
                Check::Ready(value) => return Ok(value),
                Check::Waiting(last) => last,
            };

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= policy.timeout {
                return Err(PollError::TimedOut { last, elapsed });
            }

            debug!(
                attempt,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = policy.timeout.as_secs(),
                "condition not met, waiting"
            );

            let wait = policy.interval.min(policy.timeout - elapsed);
            if self.pause(wait).await.is_err() {
                return Err(PollError::Interrupted);
            }
        }
    }

    /// Run an API call, retrying throttled failures with exponential
    /// backoff. Other failures are returned immediately, and so is the
    /// throttling error if the run is interrupted while backing off.
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut delay = self.retry.base_delay();
        let mut attempt: u32 = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient API error, backing off"
                    );
                    if self.check_interrupted().is_err() || self.pause(delay).await.is_err() {
                        warn!(operation, "interrupted during backoff");
                        return Err(e);
                    }
                    delay = (delay * 2).min(self.retry.max_delay());
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex;

    use crate::error::ApiErrorKind;

    /// Advances instantly on sleep and records every sleep.
    #[derive(Default)]
    struct StepClock {
        now_ms: AtomicU64,
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for StepClock {
        fn now(&self) -> Duration {
            Duration::from_millis(self.now_ms.load(Ordering::SeqCst))
        }

        async fn sleep(&self, duration: Duration) {
            self.now_ms
                .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn poller() -> (Arc<StepClock>, Poller) {
        let clock = Arc::new(StepClock::default());
        (clock.clone(), Poller::new(clock))
    }

    fn policy(interval: u64, timeout: u64) -> PollPolicy {
        PollPolicy::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }

    #[tokio::test]
    async fn ready_on_first_check_does_not_sleep() {
        let (clock, poller) = poller();
        let value: u32 = poller
            .until(policy(15, 60), || async { Ok(Check::<u32, ()>::Ready(7)) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn becomes_ready_after_some_polls() {
        let (clock, poller) = poller();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value = poller
            .until(policy(15, 60), move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Ok(Check::Waiting(n))
                } else {
                    Ok(Check::Ready(n))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(clock.now(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn times_out_with_last_observation() {
        let (clock, poller) = poller();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let err = poller
            .until(policy(15, 60), move || async move {
                Ok(Check::<(), u32>::Waiting(calls.fetch_add(1, Ordering::SeqCst)))
            })
            .await
            .unwrap_err();

        match err {
            PollError::TimedOut { last, elapsed } => {
                assert_eq!(last, 4);
                assert_eq!(elapsed, Duration::from_secs(60));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(clock.now(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn last_sleep_is_clamped_to_timeout() {
        let (clock, poller) = poller();
        let _ = poller
            .until(policy(40, 60), || async { Ok(Check::<(), ()>::Waiting(())) })
            .await;
        let sleeps = clock.sleeps.lock().unwrap().clone();
        assert_eq!(sleeps, vec![Duration::from_secs(40), Duration::from_secs(20)]);
    }

    #[tokio::test]
    async fn api_error_aborts_poll() {
        let (_, poller) = poller();
        let err = poller
            .until(policy(15, 60), || async {
                Err::<Check<(), ()>, _>(ApiError::new("describe", ApiErrorKind::Auth, "expired"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Api(e) if e.kind == ApiErrorKind::Auth));
    }

    #[tokio::test]
    async fn interrupted_before_first_check() {
        let (tx, rx) = watch::channel(false);
        let (_, poller) = poller();
        let poller = poller.with_shutdown(ShutdownSignal::new(rx));
        tx.send(true).unwrap();

        let err = poller
            .until(policy(15, 60), || async { Ok(Check::<(), ()>::Ready(())) })
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Interrupted));
        assert!(matches!(
            poller.check_interrupted(),
            Err(RecycleError::Interrupted)
        ));
    }

    #[tokio::test]
    async fn retry_recovers_from_throttling() {
        let (clock, poller) = poller();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value = poller
            .retry("set_desired", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::new("set_desired", ApiErrorKind::Throttled, "rate"))
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        let sleeps = clock.sleeps.lock().unwrap().clone();
        assert_eq!(
            sleeps,
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let (_, poller) = poller();
        let poller = poller.with_retry(RetryConfig {
            max_attempts: 3,
            ..Default::default()
        });
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let err = poller
            .retry("describe", move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::new("describe", ApiErrorKind::Throttled, "rate"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Throttled);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_backing_off_when_interrupted() {
        let (tx, rx) = watch::channel(false);
        let (clock, poller) = poller();
        let poller = poller.with_shutdown(ShutdownSignal::new(rx));
        tx.send(true).unwrap();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let err = poller
            .retry("describe", move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::new("describe", ApiErrorKind::Throttled, "rate"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Throttled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_does_not_repeat_permanent_errors() {
        let (clock, poller) = poller();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let err = poller
            .retry("terminate", move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::new("terminate", ApiErrorKind::NotFound, "gone"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        let (clock, poller) = poller();
        let poller = poller.with_retry(RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 3000,
        });

        let _ = poller
            .retry("describe", || async {
                Err::<(), _>(ApiError::new("describe", ApiErrorKind::Throttled, "rate"))
            })
            .await;

        let sleeps = clock.sleeps.lock().unwrap().clone();
        assert_eq!(
            sleeps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }
}
