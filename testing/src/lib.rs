//! # Eventide Testing
//!
//! Testing utilities and helpers for the Eventide event-sourcing runtime.
//!
//! This crate provides:
//! - [`InMemoryEventStore`]: an in-memory log driver with failure injection
//!   and read counting
//! - Mock implementations of environment traits ([`FixedClock`])
//! - Helpers for draining subscriptions and initializing test logging
//!
//! ## Example
//!
//! ```ignore
//! use eventide_testing::{InMemoryEventStore, helpers::collect_n};
//!
//! #[tokio::test]
//! async fn follows_the_log() {
//!     let store = Arc::new(InMemoryEventStore::new().with_max_batch_size(3));
//!     let stream = EventStream::new(Arc::new(PollingSource::new(store.clone())));
//!     let mut events = stream.subscribe();
//!     stream.start();
//!
//!     store.write_events(payloads).await.unwrap();
//!     let seen = collect_n(&mut events, 5, Duration::from_secs(1)).await;
//!     assert_eq!(seen.len(), 5);
//! }
//! ```

use chrono::{DateTime, Utc};
use eventide_core::environment::Clock;

mod event_store;

pub use event_store::InMemoryEventStore;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventide_testing::mocks::FixedClock;
    /// use eventide_core::environment::Clock;
    /// use eventide_core::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use futures::{Stream, StreamExt};
    use std::time::Duration;
    use tracing_subscriber::EnvFilter;

    /// Take up to `n` items from `stream`, giving up after `within`.
    ///
    /// Returns what arrived in time; assert on its length.
    pub async fn collect_n<S>(stream: &mut S, n: usize, within: Duration) -> Vec<S::Item>
    where
        S: Stream + Unpin,
    {
        let mut items = Vec::with_capacity(n);
        let _ = tokio::time::timeout(within, async {
            while items.len() < n {
                match stream.next().await {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
        })
        .await;
        items
    }

    /// Take the first item `matches` accepts, skipping others, giving up
    /// after `within`.
    pub async fn next_matching<S, F>(stream: &mut S, within: Duration, mut matches: F) -> Option<S::Item>
    where
        S: Stream + Unpin,
        F: FnMut(&S::Item) -> bool,
    {
        tokio::time::timeout(within, async {
            while let Some(item) = stream.next().await {
                if matches(&item) {
                    return Some(item);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn collect_n_stops_at_n_or_end() {
        let mut numbers = stream::iter(0..10);
        assert_eq!(helpers::collect_n(&mut numbers, 3, Duration::from_secs(1)).await, vec![0, 1, 2]);

        let mut short = stream::iter(0..2);
        assert_eq!(helpers::collect_n(&mut short, 5, Duration::from_secs(1)).await, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_n_gives_up_after_the_deadline() {
        let mut pending = stream::pending::<u8>();
        let items = helpers::collect_n(&mut pending, 1, Duration::from_millis(50)).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn next_matching_skips_until_accepted() {
        let mut numbers = stream::iter(0..10);
        let found = helpers::next_matching(&mut numbers, Duration::from_secs(1), |n| *n > 6).await;
        assert_eq!(found, Some(7));
    }
}
