//! The hot event feed.
//!
//! An [`EventStream`] owns exactly one underlying pull of an [`EventSource`]
//! and fans every event out to all of its subscribers, so N consumers cost
//! one read loop. It is started and stopped explicitly:
//!
//! - [`start`](EventStream::start) when already running is a no-op
//! - [`stop`](EventStream::stop) cancels the pull; subscribers stay registered
//!   and see events again after the next `start`
//!
//! # Sources
//!
//! - [`PollingSource`]: polls an [`EventReader`] through the
//!   [`PollEngine`], resuming after the last event it emitted
//! - [`PushSource`]: events are pushed in-process
//! - [`ReplayThenLiveSource`]: drains history from a position, then follows a
//!   live stream without gaps or duplicates

use crate::config::RuntimeConfig;
use crate::fanout::{Broadcaster, Subscription};
use crate::poll::{PollEngine, RetryThenSkip};
use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use crate::wake_up::{WakeUp, WakeUpConfig, WakeUpNotifier};
use eventide_core::cancel::{CancelSource, CancelToken};
use eventide_core::event::Event;
use eventide_core::event_store::{EventReader, ReadFailure};
use eventide_core::stream::Position;
use futures::stream::BoxStream;
use futures::{StreamExt, future};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Something an [`EventStream`] can pull events from.
pub trait EventSource: Send + Sync {
    /// Open a fresh pull that ends when `cancel` fires.
    fn open(&self, cancel: CancelToken) -> BoxStream<'static, Event>;

    /// Handle for telling the source that new events were written.
    fn notifier(&self) -> WakeUpNotifier {
        WakeUpNotifier::none()
    }
}

/// Polls a reader for events at or after a position.
pub struct PollingSource {
    reader: Arc<dyn EventReader>,
    wake_up: Arc<WakeUp>,
    next_position: Arc<Mutex<Position>>,
    skip_after_permanent_failures: Option<usize>,
}

impl PollingSource {
    /// Poll `reader` from position 0 with default wake-up bounds.
    #[must_use]
    pub fn new(reader: Arc<dyn EventReader>) -> Self {
        Self::with_wake_up(reader, WakeUpConfig::default())
    }

    /// Poll `reader` with explicit wake-up bounds.
    #[must_use]
    pub fn with_wake_up(reader: Arc<dyn EventReader>, config: WakeUpConfig) -> Self {
        Self {
            reader,
            wake_up: Arc::new(WakeUp::new(config)),
            next_position: Arc::new(Mutex::new(Position::ZERO)),
            skip_after_permanent_failures: None,
        }
    }

    /// Poll `reader` as configured by `config`.
    #[must_use]
    pub fn from_config(reader: Arc<dyn EventReader>, config: &RuntimeConfig) -> Self {
        let source = Self::with_wake_up(reader, config.wake_up);
        match config.skip_after_permanent_failures {
            Some(max_retries) => source.with_skip_after_permanent_failures(max_retries),
            None => source,
        }
    }

    /// Start from `position` instead of 0.
    #[must_use]
    pub fn starting_at(self, position: Position) -> Self {
        *self
            .next_position
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = position;
        self
    }

    /// Skip an unreadable position after `max_retries` permanent failures.
    #[must_use]
    pub const fn with_skip_after_permanent_failures(mut self, max_retries: usize) -> Self {
        self.skip_after_permanent_failures = Some(max_retries);
        self
    }

    /// The position the next pull starts at.
    #[must_use]
    pub fn next_position(&self) -> Position {
        *self
            .next_position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSource for PollingSource {
    fn open(&self, cancel: CancelToken) -> BoxStream<'static, Event> {
        let reader = Arc::clone(&self.reader);
        let resume = Arc::clone(&self.next_position);
        let initial = Arc::clone(&self.next_position);

        let engine = PollEngine::new(
            move || {
                let start = *initial.lock().unwrap_or_else(PoisonError::into_inner);
                async move { start }
            },
            move |cursor: Position| {
                let reader = Arc::clone(&reader);
                async move { reader.read_from(cursor).await }
            },
            |event: &Event| event.position().next(),
            Arc::clone(&self.wake_up),
        );
        let engine = match self.skip_after_permanent_failures {
            Some(max_retries) => engine.with_strategy(RetryThenSkip::new(
                max_retries,
                |position: &Position| position.next(),
            )),
            None => engine,
        };

        engine
            .into_stream(cancel)
            .inspect(move |event| {
                *resume.lock().unwrap_or_else(PoisonError::into_inner) = event.position().next();
            })
            .boxed()
    }

    fn notifier(&self) -> WakeUpNotifier {
        WakeUpNotifier::new(Arc::clone(&self.wake_up))
    }
}

/// A source fed by in-process pushes.
#[derive(Debug, Default)]
pub struct PushSource {
    broadcaster: Arc<Broadcaster<Event>>,
}

impl PushSource {
    /// Create a source with no pushed events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that pushes events into this source.
    #[must_use]
    pub fn sender(&self) -> PushSender {
        PushSender {
            broadcaster: Arc::clone(&self.broadcaster),
        }
    }
}

impl EventSource for PushSource {
    fn open(&self, cancel: CancelToken) -> BoxStream<'static, Event> {
        let subscription = self.broadcaster.subscribe();
        subscription
            .take_until(async move { cancel.cancelled().await })
            .boxed()
    }
}

/// Pushes events into a [`PushSource`].
#[derive(Debug, Clone)]
pub struct PushSender {
    broadcaster: Arc<Broadcaster<Event>>,
}

impl PushSender {
    /// Deliver `event` to the open pulls; returns how many received it.
    pub fn push(&self, event: Event) -> usize {
        self.broadcaster.publish(&event)
    }
}

/// Drains history from a position, then follows a live [`EventStream`].
///
/// The live subscription is taken before the drain starts, so events that
/// arrive meanwhile are buffered; those at or below the last replayed
/// position are dropped.
pub struct ReplayThenLiveSource {
    reader: Arc<dyn EventReader>,
    live: Arc<EventStream>,
    from: Position,
    retry: RetryPolicy,
}

impl ReplayThenLiveSource {
    /// Replay `reader` from `from`, then follow `live`.
    #[must_use]
    pub fn new(reader: Arc<dyn EventReader>, live: Arc<EventStream>, from: Position) -> Self {
        Self {
            reader,
            live,
            from,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for temporary failures while draining.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl EventSource for ReplayThenLiveSource {
    fn open(&self, cancel: CancelToken) -> BoxStream<'static, Event> {
        let mut live = self.live.subscribe();
        let reader = Arc::clone(&self.reader);
        let retry = self.retry.clone();
        let from = self.from;

        let stream = async_stream::stream! {
            let mut cursor = from;
            let mut last_replayed: Option<Position> = None;

            loop {
                let batch = retry_with_predicate(
                    &retry,
                    &cancel,
                    || reader.read_from(cursor),
                    ReadFailure::is_temporary,
                )
                .await;

                match batch {
                    Ok(batch) if batch.is_empty() => break,
                    Ok(batch) => {
                        for event in batch {
                            cursor = event.position().next();
                            last_replayed = Some(event.position());
                            yield event;
                        }
                    }
                    Err(RetryError::Cancelled) => return,
                    Err(RetryError::NotRetryable(failure)) => {
                        tracing::error!(
                            position = %cursor,
                            error = %failure,
                            "Replay skipped an unreadable position"
                        );
                        cursor = cursor.next();
                    }
                    Err(RetryError::Exhausted { last, .. }) => {
                        tracing::error!(
                            position = %cursor,
                            error = %last,
                            "Replay gave up; ending stream"
                        );
                        return;
                    }
                }
            }
            tracing::debug!(
                last_replayed = ?last_replayed.map(Position::value),
                "Replay drained, following live stream"
            );

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    event = live.recv() => event,
                };
                let Some(event) = next else { break };
                if event.position() < from || last_replayed.is_some_and(|last| event.position() <= last) {
                    continue;
                }
                last_replayed = Some(event.position());
                yield event;
            }
        };
        stream.boxed()
    }

    fn notifier(&self) -> WakeUpNotifier {
        self.live.notifier()
    }
}

struct Running {
    cancel: CancelSource,
    task: JoinHandle<()>,
}

/// A shareable, explicitly started hot feed of events.
///
/// # Example
///
/// ```
/// use eventide_runtime::event_stream::{EventStream, PushSource};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let stream = EventStream::new(Arc::new(PushSource::new()));
/// let _events = stream.subscribe();
///
/// stream.start();
/// assert!(stream.is_running());
/// stream.stop();
/// assert!(!stream.is_running());
/// # }
/// ```
pub struct EventStream {
    source: Arc<dyn EventSource>,
    broadcaster: Arc<Broadcaster<Event>>,
    running: Mutex<Option<Running>>,
}

impl EventStream {
    /// Create a stopped stream over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            broadcaster: Arc::new(Broadcaster::new()),
            running: Mutex::new(None),
        }
    }

    /// Open the underlying pull. No-op if it is already running.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            tracing::debug!("Event stream already running");
            return;
        }

        let cancel = CancelSource::new();
        let mut events = self.source.open(cancel.token());
        let broadcaster = Arc::clone(&self.broadcaster);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                broadcaster.publish(&event);
            }
            tracing::debug!("Event stream pull ended");
        });

        tracing::info!("Event stream started");
        *running = Some(Running { cancel, task });
    }

    /// Cancel the underlying pull. Subscribers stay registered.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Running { cancel, task }) = running {
            cancel.cancel();
            task.abort();
            tracing::info!("Event stream stopped");
        }
    }

    /// Whether a pull is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<Event> {
        self.broadcaster.subscribe()
    }

    /// Handle that tells the source new events were written.
    #[must_use]
    pub fn notifier(&self) -> WakeUpNotifier {
        self.source.notifier()
    }

    /// Subscribe, keeping only events `filter` accepts.
    pub fn subscribe_filtered<F>(&self, filter: F) -> BoxStream<'static, Event>
    where
        F: Fn(&Event) -> bool + Send + 'static,
    {
        self.subscribe()
            .filter(move |event| future::ready(filter(event)))
            .boxed()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("running", &self.is_running())
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}
