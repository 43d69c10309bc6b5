//! Retry-aware polling loop.
//!
//! The [`PollEngine`] turns "read the items at or after cursor X" into a
//! continuous, ordered [`Stream`]. Each iteration:
//!
//! 1. clears the wake-up signal,
//! 2. reads from the current cursor,
//! 3. emits the batch in order (or logs the failure and emits nothing),
//! 4. asks the [`CursorStrategy`] for the next cursor,
//! 5. waits on the [`WakeUp`], reporting the stream as hot if the cursor
//!    moved.
//!
//! Cancellation ends the stream cleanly at any suspension point.
//!
//! # Cursor strategies
//!
//! - [`RetryForever`]: a failed read is retried at the same cursor forever.
//! - [`RetryThenSkip`]: temporary failures retry forever; after
//!   `max_retries` consecutive *permanent* failures the cursor is advanced
//!   past the failing position by a supplied skip function, trading
//!   completeness for liveness.

use crate::metrics::PollMetrics;
use crate::wake_up::WakeUp;
use eventide_core::cancel::CancelToken;
use eventide_core::event_store::ReadFailure;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a single poll produced, as seen by a [`CursorStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<C> {
    /// A non-empty batch was emitted; carries the cursor after its last item.
    Advanced(C),
    /// The read succeeded but nothing new was there.
    Empty,
    /// The read failed.
    Failed(ReadFailure),
}

/// Decides the cursor of the next poll.
pub trait CursorStrategy<C>: Send {
    /// The cursor to poll next, given the cursor just polled and its outcome.
    fn next_cursor(&mut self, polled: C, outcome: &PollOutcome<C>) -> C;
}

/// Retry a failed read at the same cursor, forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryForever;

impl<C: Clone> CursorStrategy<C> for RetryForever {
    fn next_cursor(&mut self, polled: C, outcome: &PollOutcome<C>) -> C {
        match outcome {
            PollOutcome::Advanced(next) => next.clone(),
            PollOutcome::Empty | PollOutcome::Failed(_) => polled,
        }
    }
}

/// Retry permanent failures `max_retries` times, then skip past the cursor.
///
/// Temporary failures never consume the budget. A successful read resets it.
pub struct RetryThenSkip<C> {
    max_retries: usize,
    skip: Box<dyn Fn(&C) -> C + Send>,
    failures: usize,
}

impl<C> RetryThenSkip<C> {
    /// Create the strategy; `skip` maps the failing cursor to the one after it.
    pub fn new(max_retries: usize, skip: impl Fn(&C) -> C + Send + 'static) -> Self {
        Self {
            max_retries,
            skip: Box::new(skip),
            failures: 0,
        }
    }

    /// Consecutive permanent failures at the current cursor.
    #[must_use]
    pub const fn consecutive_failures(&self) -> usize {
        self.failures
    }
}

impl<C> fmt::Debug for RetryThenSkip<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryThenSkip")
            .field("max_retries", &self.max_retries)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl<C: Clone + fmt::Display> CursorStrategy<C> for RetryThenSkip<C> {
    fn next_cursor(&mut self, polled: C, outcome: &PollOutcome<C>) -> C {
        match outcome {
            PollOutcome::Advanced(next) => {
                self.failures = 0;
                next.clone()
            }
            PollOutcome::Empty => {
                self.failures = 0;
                polled
            }
            PollOutcome::Failed(ReadFailure::Temporary(_)) => polled,
            PollOutcome::Failed(ReadFailure::Permanent(reason)) => {
                self.failures += 1;
                if self.failures <= self.max_retries {
                    return polled;
                }
                self.failures = 0;
                let skipped_to = (self.skip)(&polled);
                PollMetrics::record_skip();
                tracing::error!(
                    cursor = %polled,
                    skipped_to = %skipped_to,
                    reason = %reason,
                    max_retries = self.max_retries,
                    "Skipping unreadable cursor; items at it are permanently lost to this stream"
                );
                skipped_to
            }
        }
    }
}

type InitialCursor<C> = Box<dyn FnOnce() -> BoxFuture<'static, C> + Send>;
type ReadFrom<C, T> =
    Box<dyn Fn(C) -> BoxFuture<'static, Result<Vec<T>, ReadFailure>> + Send + Sync>;
type CursorAfter<C, T> = Box<dyn Fn(&T) -> C + Send + Sync>;

/// A configured polling loop, ready to be turned into a stream.
///
/// # Example
///
/// ```
/// use eventide_core::cancel::CancelToken;
/// use eventide_runtime::poll::PollEngine;
/// use eventide_runtime::wake_up::WakeUp;
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let log: Arc<Vec<u64>> = Arc::new((0..10).collect());
/// let engine = PollEngine::new(
///     || async { 0_u64 },
///     move |cursor: u64| {
///         let log = Arc::clone(&log);
///         async move {
///             let from = usize::try_from(cursor).unwrap_or(usize::MAX);
///             Ok(log.iter().skip(from).take(3).copied().collect())
///         }
///     },
///     |item: &u64| item + 1,
///     Arc::new(WakeUp::default()),
/// );
///
/// let items: Vec<u64> = engine.into_stream(CancelToken::none()).take(10).collect().await;
/// assert_eq!(items, (0..10).collect::<Vec<_>>());
/// # }
/// ```
pub struct PollEngine<C, T> {
    initial: InitialCursor<C>,
    read: ReadFrom<C, T>,
    cursor_after: CursorAfter<C, T>,
    strategy: Box<dyn CursorStrategy<C>>,
    wake_up: Arc<WakeUp>,
}

impl<C, T> PollEngine<C, T>
where
    C: Clone + PartialEq + fmt::Display + Send + 'static,
    T: Send + 'static,
{
    /// Create an engine using [`RetryForever`].
    pub fn new<I, IF, R, RF, A>(initial: I, read: R, cursor_after: A, wake_up: Arc<WakeUp>) -> Self
    where
        I: FnOnce() -> IF + Send + 'static,
        IF: Future<Output = C> + Send + 'static,
        R: Fn(C) -> RF + Send + Sync + 'static,
        RF: Future<Output = Result<Vec<T>, ReadFailure>> + Send + 'static,
        A: Fn(&T) -> C + Send + Sync + 'static,
    {
        Self {
            initial: Box::new(move || initial().boxed()),
            read: Box::new(move |cursor| read(cursor).boxed()),
            cursor_after: Box::new(cursor_after),
            strategy: Box::new(RetryForever),
            wake_up,
        }
    }

    /// Replace the cursor strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl CursorStrategy<C> + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// The wake-up this engine waits on.
    #[must_use]
    pub fn wake_up(&self) -> Arc<WakeUp> {
        Arc::clone(&self.wake_up)
    }

    /// Run the loop as a stream of items in increasing cursor order.
    ///
    /// The stream ends when `cancel` fires.
    pub fn into_stream(self, cancel: CancelToken) -> impl Stream<Item = T> + Send + 'static {
        let Self {
            initial,
            read,
            cursor_after,
            mut strategy,
            wake_up,
        } = self;

        async_stream::stream! {
            let mut cursor = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                cursor = initial() => cursor,
            };
            tracing::debug!(cursor = %cursor, "Poll loop started");

            loop {
                wake_up.work_is_scheduled();

                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = read(cursor.clone()) => result,
                };

                let outcome = match result {
                    Ok(batch) => match batch.last().map(&cursor_after) {
                        None => PollOutcome::Empty,
                        Some(next) => {
                            PollMetrics::record_batch(batch.len());
                            for item in batch {
                                yield item;
                            }
                            PollOutcome::Advanced(next)
                        }
                    },
                    Err(failure) => {
                        PollMetrics::record_failure(failure.is_temporary());
                        tracing::warn!(cursor = %cursor, error = %failure, "Poll read failed");
                        PollOutcome::Failed(failure)
                    }
                };

                let next = strategy.next_cursor(cursor.clone(), &outcome);
                let hot = next != cursor;
                cursor = next;

                if wake_up.wait_for_signal_or_timeout(hot, &cancel).await.is_err() {
                    break;
                }
            }
            tracing::debug!(cursor = %cursor, "Poll loop cancelled");
        }
    }
}

impl<C, T> fmt::Debug for PollEngine<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollEngine")
            .field("wake_up", &self.wake_up)
            .finish_non_exhaustive()
    }
}
