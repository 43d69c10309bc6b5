//! Retry with exponential backoff.
//!
//! Used wherever the runtime must not give up on the first transient error:
//! persisting `CommandProcessed` outcomes and draining history in a
//! replay-then-live source. Every backoff sleep observes a [`CancelToken`].
//!
//! # Example
//!
//! ```rust
//! use eventide_core::cancel::CancelToken;
//! use eventide_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let value = retry_with_backoff(&policy, &CancelToken::none(), || async {
//!     Ok::<_, String>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use eventide_core::cancel::CancelToken;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for the exponential backoff.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * factor;

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs.max(0.0))
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}

/// Why a retried operation did not produce a value.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    #[error("Operation failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: usize,
        /// The error of the final attempt.
        last: E,
    },

    /// The predicate rejected the error; no further attempts were made.
    #[error("Operation failed with a non-retryable error: {0}")]
    NotRetryable(E),

    /// The cancel token fired between attempts.
    #[error("Retry cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying error, if one was observed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } | Self::NotRetryable(last) => Some(last),
            Self::Cancelled => None,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// The operation runs once, then up to `policy.max_retries` more times.
///
/// # Errors
///
/// [`RetryError::Exhausted`] with the last error once the budget is spent, or
/// [`RetryError::Cancelled`] if `cancel` fires during a backoff sleep.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry_with_predicate(policy, cancel, operation, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts its errors.
///
/// # Errors
///
/// [`RetryError::NotRetryable`] as soon as the predicate rejects an error,
/// otherwise as [`retry_with_backoff`].
///
/// # Example
///
/// ```rust
/// use eventide_core::cancel::CancelToken;
/// use eventide_runtime::retry::{RetryError, RetryPolicy, retry_with_predicate};
///
/// # async fn example() {
/// let result = retry_with_predicate(
///     &RetryPolicy::default(),
///     &CancelToken::none(),
///     || async { Err::<i32, _>("permanent") },
///     |err: &&str| err.contains("transient"),
/// )
/// .await;
/// assert!(matches!(result, Err(RetryError::NotRetryable("permanent"))));
/// # }
/// ```
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    RetryMetrics::record_success();
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err(RetryError::NotRetryable(err));
                }

                if attempt >= policy.max_retries {
                    RetryMetrics::record_exhausted();
                    tracing::error!(attempt, error = %err, "Operation failed after max retries");
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: err,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                RetryMetrics::record_attempt();
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );

                tokio::select! {
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
