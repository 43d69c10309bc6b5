//! Runtime configuration.

use crate::retry::RetryPolicy;
use crate::wake_up::WakeUpConfig;
use std::time::Duration;

/// Configuration shared by the runtime's components.
///
/// # Example
///
/// ```
/// use eventide_runtime::config::RuntimeConfig;
/// use eventide_runtime::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let config = RuntimeConfig::default()
///     .with_min_poll_interval(Duration::from_millis(5))
///     .with_skip_after_permanent_failures(3)
///     .with_persist_retry(RetryPolicy::builder().max_retries(10).build());
///
/// assert_eq!(config.skip_after_permanent_failures, Some(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Poll loop wake-up bounds.
    pub wake_up: WakeUpConfig,
    /// Skip an unreadable position after this many permanent failures.
    ///
    /// `None` retries forever.
    pub skip_after_permanent_failures: Option<usize>,
    /// Retry policy for writing `CommandProcessed` outcomes.
    pub persist_retry: RetryPolicy,
}

impl RuntimeConfig {
    /// Create a configuration with explicit values.
    #[must_use]
    pub const fn new(
        wake_up: WakeUpConfig,
        skip_after_permanent_failures: Option<usize>,
        persist_retry: RetryPolicy,
    ) -> Self {
        Self {
            wake_up,
            skip_after_permanent_failures,
            persist_retry,
        }
    }

    /// Set the wake-up bounds.
    #[must_use]
    pub const fn with_wake_up(mut self, wake_up: WakeUpConfig) -> Self {
        self.wake_up = wake_up;
        self
    }

    /// Set the minimum poll interval.
    #[must_use]
    pub const fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.wake_up = self.wake_up.with_min_interval(interval);
        self
    }

    /// Set the maximum poll interval.
    #[must_use]
    pub const fn with_max_poll_interval(mut self, interval: Duration) -> Self {
        self.wake_up = self.wake_up.with_max_interval(interval);
        self
    }

    /// Skip unreadable positions after `max_retries` permanent failures.
    #[must_use]
    pub const fn with_skip_after_permanent_failures(mut self, max_retries: usize) -> Self {
        self.skip_after_permanent_failures = Some(max_retries);
        self
    }

    /// Set the retry policy for persisting command outcomes.
    #[must_use]
    pub fn with_persist_retry(mut self, policy: RetryPolicy) -> Self {
        self.persist_retry = policy;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wake_up: WakeUpConfig::default(),
            skip_after_permanent_failures: None,
            persist_retry: RetryPolicy::builder()
                .max_retries(5)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_secs(5))
                .build(),
        }
    }
}
