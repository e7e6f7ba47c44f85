//! Classified retry with exponential backoff.
//!
//! [`RetryExecutor`] runs one asynchronous upstream operation, retrying
//! transient failures up to `max_retries` times with jittered exponential
//! backoff. Permanent failures are returned immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lumagate_core::log::{self, LogLevel, LogSink};
use lumagate_core::{RetryConfig, UpstreamError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backoff::{backoff_delay, is_rate_limit, is_retryable};

/// Retry classifier: returns true when an error is worth retrying.
pub type Classifier = Arc<dyn Fn(&UpstreamError) -> bool + Send + Sync>;

/// Retry bounds and backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff(), config.max_backoff())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: initial_backoff.as_millis() as u64,
            max_backoff_ms: max_backoff.as_millis() as u64,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Jittered delay before the retry that follows `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Result of [`RetryExecutor::execute_with_result`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    /// Final value or the error that ended the loop.
    pub result: Result<T, UpstreamError>,
    /// Number of times the operation ran.
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&UpstreamError> {
        self.result.as_ref().err()
    }
}

/// Runs upstream operations under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: Classifier,
    sink: Option<Arc<dyn LogSink>>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl RetryExecutor {
    /// Create an executor with the default classifier and no log sink.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: Arc::new(is_retryable),
            sink: None,
        }
    }

    /// Replace the retry classifier.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&UpstreamError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Report retry decisions to `sink`.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Fails with the last observed error. If that error was a rate limit
    /// signal it is surfaced as [`UpstreamError::RateLimited`].
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.run(None, operation).await.result
    }

    /// [`execute`](Self::execute) with a correlation id attached to log records.
    pub async fn execute_with_correlation<T, F, Fut>(
        &self,
        correlation_id: &str,
        operation: F,
    ) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.run(Some(correlation_id), operation).await.result
    }

    /// Same loop as [`execute`](Self::execute), returning the outcome and the
    /// attempt count as data.
    pub async fn execute_with_result<T, F, Fut>(&self, operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.run(None, operation).await
    }

    async fn run<T, F, Fut>(&self, correlation_id: Option<&str>, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                    };
                }
                Err(error) => error,
            };

            if !(self.classifier)(&error) {
                self.report(
                    LogLevel::Warn,
                    "Upstream operation failed with a non-retryable error",
                    attempt,
                    None,
                    correlation_id,
                    &error,
                );
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt + 1,
                };
            }

            if attempt >= self.policy.max_retries {
                self.report(
                    LogLevel::Warn,
                    "Upstream operation failed after exhausting retries",
                    attempt,
                    None,
                    correlation_id,
                    &error,
                );
                let error = if is_rate_limit(&error) {
                    UpstreamError::RateLimited
                } else {
                    error
                };
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt + 1,
                };
            }

            let delay = self.policy.delay_for_attempt(attempt);
            self.report(
                LogLevel::Debug,
                "Retrying upstream operation",
                attempt,
                Some(delay),
                correlation_id,
                &error,
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn report(
        &self,
        level: LogLevel,
        message: &str,
        attempt: u32,
        delay: Option<Duration>,
        correlation_id: Option<&str>,
        error: &UpstreamError,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        let mut context = log::context(json!({
            "attempt": attempt + 1,
            "max_retries": self.policy.max_retries,
            "error": error.to_string(),
        }));
        if let Some(delay) = delay {
            context.insert("delay_ms".to_string(), json!(delay.as_millis() as u64));
        }
        if let Some(id) = correlation_id {
            context.insert("correlation_id".to_string(), json!(id));
        }
        sink.log(level, message, &context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumagate_core::log::LogContext;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(LogLevel, String, LogContext)>>,
    }

    impl LogSink for RecordingSink {
        fn log(&self, level: LogLevel, message: &str, context: &LogContext) {
            self.records
                .lock()
                .push((level, message.to_string(), context.clone()));
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(10), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(3));

        let result = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, UpstreamError>(42) }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(5));

        let outcome = executor
            .execute_with_result(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(UpstreamError::status(503, "unavailable"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.value(), Some(&"done"));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(5));
        let started = tokio::time::Instant::now();

        let result = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(UpstreamError::status(400, "bad brightness")) }
            })
            .await;

        assert_eq!(result, Err(UpstreamError::status(400, "bad brightness")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_retryable_runs_n_plus_one_times() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(4)).with_classifier(|_| true);

        let outcome = executor
            .execute_with_result(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(UpstreamError::status(404, "missing")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(outcome.error(), Some(&UpstreamError::status(404, "missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_is_remapped() {
        let executor = RetryExecutor::new(policy(2));

        let result = executor
            .execute(|| async { Err::<(), _>(UpstreamError::vendor(429, "quota")) })
            .await;

        assert_eq!(result, Err(UpstreamError::RateLimited));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_keeps_last_error() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(2));

        let result = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err::<(), _>(UpstreamError::RateLimited)
                    } else {
                        Err(UpstreamError::status(500 + n as u16, "server"))
                    }
                }
            })
            .await;

        assert_eq!(result, Err(UpstreamError::status(502, "server")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_entry_points_agree() {
        let script = [
            UpstreamError::Timeout,
            UpstreamError::status(502, "bad gateway"),
            UpstreamError::status(401, "denied"),
        ];
        let executor = RetryExecutor::new(policy(5));

        let calls_a = AtomicU32::new(0);
        let raised = executor
            .execute(|| {
                let n = calls_a.fetch_add(1, Ordering::SeqCst) as usize;
                let err = script[n].clone();
                async move { Err::<(), _>(err) }
            })
            .await;

        let calls_b = AtomicU32::new(0);
        let outcome = executor
            .execute_with_result(|| {
                let n = calls_b.fetch_add(1, Ordering::SeqCst) as usize;
                let err = script[n].clone();
                async move { Err::<(), _>(err) }
            })
            .await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 3);
        assert_eq!(calls_b.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(raised, outcome.result);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let executor = RetryExecutor::new(RetryPolicy::new(
            2,
            Duration::from_millis(100),
            Duration::from_secs(10),
        ));
        let started = tokio::time::Instant::now();

        let _ = executor
            .execute(|| async { Err::<(), _>(UpstreamError::Timeout) })
            .await;

        // 100ms + 200ms of base delay, plus at most 30% jitter.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(391), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_sink_records_decisions() {
        let sink = Arc::new(RecordingSink::default());
        let executor = RetryExecutor::new(policy(1)).with_log_sink(sink.clone());

        let _ = executor
            .execute_with_correlation("req-7", || async {
                Err::<(), _>(UpstreamError::Connection("reset".into()))
            })
            .await;

        let records = sink.records.lock();
        assert_eq!(records.len(), 2);

        let (level, _, context) = &records[0];
        assert_eq!(*level, LogLevel::Debug);
        assert_eq!(context.get("attempt"), Some(&json!(1)));
        assert_eq!(context.get("correlation_id"), Some(&json!("req-7")));
        assert!(context.contains_key("delay_ms"));

        let (level, _, context) = &records[1];
        assert_eq!(*level, LogLevel::Warn);
        assert_eq!(context.get("attempt"), Some(&json!(2)));
        assert!(!context.contains_key("delay_ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_is_logged_once() {
        let sink = Arc::new(RecordingSink::default());
        let executor = RetryExecutor::new(policy(3)).with_log_sink(sink.clone());

        let _ = executor
            .execute(|| async { Err::<(), _>(UpstreamError::DeviceNotFound("lamp".into())) })
            .await;

        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, LogLevel::Warn);
        assert!(!records[0].2.contains_key("correlation_id"));
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_retries: 6,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 6);
        assert_eq!(policy.initial_backoff_ms, 250);
        assert_eq!(policy.max_backoff_ms, 4000);
        assert!(policy.delay_for_attempt(0) >= Duration::from_millis(250));
        assert!(policy.delay_for_attempt(10) <= Duration::from_millis(4000));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
