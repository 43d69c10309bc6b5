//! Adaptive wait between polls.
//!
//! A poll loop sleeps between reads but wakes immediately when someone
//! signals "more work". Idle waits back off exponentially up to a cap; a
//! signal or a hot stream resets the interval to the minimum.
//!
//! The signal is a single slot: repeated signals before a wait collapse into
//! one, and a signal sent while nobody waits is kept for the next wait until
//! [`WakeUp::work_is_scheduled`] clears it.

use eventide_core::cancel::CancelToken;
use eventide_core::command::Cancelled;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Interval bounds of a [`WakeUp`].
///
/// # Default Values
///
/// - `min_interval`: 10ms
/// - `max_interval`: 2 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeUpConfig {
    /// Interval after a signal or a hot poll.
    pub min_interval: Duration,
    /// Cap for the idle backoff.
    pub max_interval: Duration,
}

impl WakeUpConfig {
    /// Create a configuration with explicit bounds.
    #[must_use]
    pub const fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            min_interval,
            max_interval,
        }
    }

    /// Set the minimum interval.
    #[must_use]
    pub const fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set the maximum interval.
    #[must_use]
    pub const fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }
}

impl Default for WakeUpConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_secs(2))
    }
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// [`WakeUp::signal`] was called.
    Signalled,
    /// The interval elapsed.
    TimedOut,
}

/// Adaptive interval primitive used by the poll loop.
#[derive(Debug)]
pub struct WakeUp {
    config: WakeUpConfig,
    signal: watch::Sender<bool>,
    current: Mutex<Duration>,
}

impl WakeUp {
    /// Create a wake-up starting at the minimum interval.
    #[must_use]
    pub fn new(config: WakeUpConfig) -> Self {
        let (signal, _) = watch::channel(false);
        let max_interval = config.max_interval.max(config.min_interval);
        let config = config.with_max_interval(max_interval);
        Self {
            config,
            signal,
            current: Mutex::new(config.min_interval),
        }
    }

    /// The configured bounds.
    #[must_use]
    pub const fn config(&self) -> WakeUpConfig {
        self.config
    }

    /// The interval the next idle wait will use.
    #[must_use]
    pub fn current_interval(&self) -> Duration {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the signal slot before a poll starts.
    pub fn work_is_scheduled(&self) {
        self.signal.send_replace(false);
    }

    /// Wake the current wait, or the next one if nobody is waiting.
    pub fn signal(&self) {
        self.signal.send_replace(true);
    }

    /// Wait for a signal or for the current interval, then adapt the interval.
    ///
    /// A hot stream waits only the minimum interval. After a signal or a hot
    /// wait the next interval is the minimum; after an idle timeout it
    /// doubles, capped at the maximum.
    ///
    /// # Errors
    ///
    /// [`Cancelled`] as soon as `cancel` fires.
    pub async fn wait_for_signal_or_timeout(
        &self,
        stream_is_hot: bool,
        cancel: &CancelToken,
    ) -> Result<WakeReason, Cancelled> {
        let timeout = if stream_is_hot {
            self.config.min_interval
        } else {
            self.current_interval()
        };

        let mut signalled = self.signal.subscribe();
        let reason = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Cancelled::new("wake-up wait cancelled")),
            Ok(_) = signalled.wait_for(|signal| *signal) => WakeReason::Signalled,
            () = tokio::time::sleep(timeout) => WakeReason::TimedOut,
        };

        let next = if reason == WakeReason::Signalled || stream_is_hot {
            self.config.min_interval
        } else {
            timeout.saturating_mul(2).min(self.config.max_interval)
        };
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next;

        Ok(reason)
    }
}

impl Default for WakeUp {
    fn default() -> Self {
        Self::new(WakeUpConfig::default())
    }
}

/// Handle for signalling "more work" to a poll loop.
///
/// A notifier without a target (for push-fed streams) does nothing.
#[derive(Debug, Clone, Default)]
pub struct WakeUpNotifier {
    target: Option<Arc<WakeUp>>,
}

impl WakeUpNotifier {
    /// A notifier that signals `wake_up`.
    #[must_use]
    pub const fn new(wake_up: Arc<WakeUp>) -> Self {
        Self {
            target: Some(wake_up),
        }
    }

    /// A notifier that does nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self { target: None }
    }

    /// Signal the target, if any.
    pub fn signal(&self) {
        if let Some(wake_up) = &self.target {
            wake_up.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventide_core::cancel::CancelSource;
    use tokio::time::Instant;

    fn wake_up() -> WakeUp {
        WakeUp::new(WakeUpConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeouts_double_up_to_the_cap() {
        let wake_up = wake_up();
        let cancel = CancelToken::none();

        let mut observed = Vec::new();
        for _ in 0..6 {
            wake_up.work_is_scheduled();
            let started = Instant::now();
            let reason = wake_up.wait_for_signal_or_timeout(false, &cancel).await;
            assert_eq!(reason, Ok(WakeReason::TimedOut));
            observed.push(started.elapsed());
        }

        let millis: Vec<u128> = observed.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![10, 20, 40, 80, 80, 80]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_signal_resets_to_the_minimum() {
        let wake_up = Arc::new(wake_up());
        let cancel = CancelToken::none();

        for _ in 0..3 {
            let _ = wake_up.wait_for_signal_or_timeout(false, &cancel).await;
        }
        assert_eq!(wake_up.current_interval(), Duration::from_millis(80));

        let signaller = Arc::clone(&wake_up);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            signaller.signal();
        });

        wake_up.work_is_scheduled();
        let started = Instant::now();
        let reason = wake_up.wait_for_signal_or_timeout(false, &cancel).await;
        assert_eq!(reason, Ok(WakeReason::Signalled));
        assert!(started.elapsed() < Duration::from_millis(80));
        assert_eq!(wake_up.current_interval(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn a_hot_stream_waits_the_minimum() {
        let wake_up = wake_up();
        let cancel = CancelToken::none();
        for _ in 0..3 {
            let _ = wake_up.wait_for_signal_or_timeout(false, &cancel).await;
        }

        let started = Instant::now();
        let reason = wake_up.wait_for_signal_or_timeout(true, &cancel).await;
        assert_eq!(reason, Ok(WakeReason::TimedOut));
        assert_eq!(started.elapsed().as_millis(), 10);
        assert_eq!(wake_up.current_interval(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn a_pending_signal_wakes_the_next_wait_until_cleared() {
        let wake_up = wake_up();
        let cancel = CancelToken::none();

        wake_up.signal();
        wake_up.signal();
        let reason = wake_up.wait_for_signal_or_timeout(false, &cancel).await;
        assert_eq!(reason, Ok(WakeReason::Signalled));

        wake_up.work_is_scheduled();
        let reason = wake_up.wait_for_signal_or_timeout(false, &cancel).await;
        assert_eq!(reason, Ok(WakeReason::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_wait() {
        let wake_up = Arc::new(WakeUp::new(WakeUpConfig::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        )));
        let source = CancelSource::new();
        let token = source.token();

        let waiter = Arc::clone(&wake_up);
        let task =
            tokio::spawn(async move { waiter.wait_for_signal_or_timeout(false, &token).await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        source.cancel();

        let result = task.await;
        assert!(matches!(result, Ok(Err(_))));
    }

    #[test]
    fn notifier_without_target_is_a_no_op() {
        WakeUpNotifier::none().signal();
        let wake_up = Arc::new(WakeUp::default());
        WakeUpNotifier::new(Arc::clone(&wake_up)).signal();
        assert!(*wake_up.signal.borrow());
    }
}
