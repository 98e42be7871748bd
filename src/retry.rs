//! Bounded retry for remote calls
//!
//! Every call to the simulation API (submit, poll, fetch) goes through
//! [`RateLimitedTransport::call`]. The policy is a fixed number of attempts with a
//! fixed backoff, applied to rate-limit responses, transient network
//! failures and malformed payloads. Authentication and rejection errors are returned
//! immediately. Cancellation is observed before every attempt and during every wait.
//!
//! # Example
//!
//! ```no_run
//! use alpha_batch::config::RetryConfig;
//! use alpha_batch::error::ApiError;
//! use alpha_batch::retry::{NoopAttemptObserver, RateLimitedTransport};
//! use alpha_batch::types::Step;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let transport = RateLimitedTransport::new(&RetryConfig::default());
//! let cancel = CancellationToken::new();
//! let result = transport
//!     .call(Step::Submit, &cancel, &NoopAttemptObserver, || async {
//!         Ok::<_, ApiError>("https://api.example.com/simulations/1".to_string())
//!     })
//!     .await;
//! # let _ = result;
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::ApiError;
use crate::types::Step;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, throttling) should return `true`.
/// Permanent failures (expired credentials, refused jobs) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } => true,
            ApiError::Transient(_) => true,
            ApiError::MalformedResponse(_) => true,
            ApiError::AuthExpired(_) => false,
            ApiError::Rejected { .. } => false,
        }
    }
}

/// Why a call through the transport did not produce a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// Cancellation was requested before or between attempts
    Cancelled,
    /// Every attempt failed with a retryable error
    RetryExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: ApiError,
    },
    /// A non-retryable error ended the call
    Fatal(ApiError),
}

/// A failed attempt, reported before the transport waits or gives up
#[derive(Debug, Clone, Copy)]
pub struct FailedAttempt<'a> {
    /// Protocol step being retried
    pub step: Step,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Error returned by the attempt
    pub error: &'a ApiError,
    /// Whether the transport will wait and try again
    pub will_retry: bool,
}

/// Receives failed-attempt notifications from the transport
#[async_trait::async_trait]
pub trait AttemptObserver: Send + Sync {
    /// Called once per failed retryable attempt
    async fn attempt_failed(&self, attempt: FailedAttempt<'_>);
}

/// Observer that ignores every notification
pub struct NoopAttemptObserver;

#[async_trait::async_trait]
impl AttemptObserver for NoopAttemptObserver {
    async fn attempt_failed(&self, _attempt: FailedAttempt<'_>) {}
}

/// Fixed-backoff retry wrapper shared by all three protocol steps
#[derive(Clone, Debug)]
pub struct RateLimitedTransport {
    max_attempts: u32,
    backoff: Duration,
}

impl RateLimitedTransport {
    /// Build a transport from the retry configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
        }
    }

    /// Attempt budget per call
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of attempts, or the
    /// token is cancelled
    ///
    /// The token is checked before every attempt, so a cancelled call never reaches the
    /// network. An attempt already in flight is allowed to finish.
    pub async fn call<F, Fut, T>(
        &self,
        step: Step,
        cancel: &CancellationToken,
        observer: &dyn AttemptObserver,
        mut operation: F,
    ) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CallFailure::Cancelled);
            }
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(%step, attempts = attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    let will_retry = attempt < self.max_attempts;

                    tracing::warn!(
                        %step,
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        will_retry,
                        "Call failed"
                    );
                    observer
                        .attempt_failed(FailedAttempt {
                            step,
                            attempt,
                            max_attempts: self.max_attempts,
                            error: &e,
                            will_retry,
                        })
                        .await;

                    if !will_retry {
                        return Err(CallFailure::RetryExhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    if !sleep_or_cancel(self.backoff, cancel).await {
                        tracing::debug!(%step, attempt, "Cancelled during backoff");
                        return Err(CallFailure::Cancelled);
                    }
                }
                Err(e) => {
                    tracing::error!(%step, error = %e, "Call failed with non-retryable error");
                    return Err(CallFailure::Fatal(e));
                }
            }
        }
    }
}

/// Sleep for `duration` unless the token fires first
///
/// Returns `false` when cancelled. Cancellation wakes the wait immediately instead of at
/// the next time slice.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
