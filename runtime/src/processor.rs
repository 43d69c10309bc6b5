//! Command dispatch, execution and outcome persistence.
//!
//! The [`CommandProcessor`] is the execution boundary of the command
//! pipeline. Whatever a handler does (succeeds, fails, returns an error,
//! panics, stops on cancellation) is turned into exactly one
//! [`ProcessingResult`], and exactly one [`CommandProcessed`] event is
//! written for it.
//!
//! # Flow
//!
//! ```text
//! Command ──► HandlerRegistry ──► handler task ──► ProcessingResult
//!                                                     │
//!                        write events (Processed only)◄┘
//!                                   │
//!                        write CommandProcessed (retried)
//!                                   │
//!                 signal WakeUp, publish on results()/processed feed
//! ```
//!
//! Handlers are never retried automatically.

use crate::command_stream::ProcessedFeed;
use crate::config::RuntimeConfig;
use crate::fanout::{Broadcaster, Subscription};
use crate::metrics::CommandMetrics;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::wake_up::WakeUpNotifier;
use eventide_core::cancel::CancelToken;
use eventide_core::command::{
    Cancelled, Command, CommandHandler, CommandId, CommandProcessed, Handled, ProcessingResult,
};
use eventide_core::event::EventPayload;
use eventide_core::event_store::{EventReader, EventWriter};
use eventide_core::stream::{Position, StreamId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Handled>> + Send + 'static>>;

/// A handler with its command type erased.
trait ErasedHandler: Send + Sync {
    fn call(&self, command: Arc<dyn Command>, cancel: CancelToken) -> HandlerFuture;
}

/// Downcast the erased command back to `C`.
fn downcast<C: Command>(command: &dyn Command) -> anyhow::Result<&C> {
    command.as_any().downcast_ref::<C>().ok_or_else(|| {
        anyhow::anyhow!(
            "handler for {} received {}",
            std::any::type_name::<C>(),
            command.command_type()
        )
    })
}

struct Shared<C, H> {
    handler: Arc<H>,
    _command: PhantomData<fn() -> C>,
}

impl<C, H> ErasedHandler for Shared<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    fn call(&self, command: Arc<dyn Command>, cancel: CancelToken) -> HandlerFuture {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let command = downcast::<C>(command.as_ref())?;
            handler.handle(command, cancel).await
        })
    }
}

struct Factory<C, H, F> {
    factory: F,
    _types: PhantomData<fn() -> (C, H)>,
}

impl<C, H, F> ErasedHandler for Factory<C, H, F>
where
    C: Command,
    H: CommandHandler<C>,
    F: Fn() -> H + Send + Sync,
{
    fn call(&self, command: Arc<dyn Command>, cancel: CancelToken) -> HandlerFuture {
        let handler = (self.factory)();
        Box::pin(async move {
            let command = downcast::<C>(command.as_ref())?;
            handler.handle(command, cancel).await
        })
    }
}

/// Maps command types to handlers.
///
/// Keyed by the command's runtime type. A type registered twice keeps the
/// later handler.
///
/// # Example
///
/// ```
/// use eventide_core::prelude::*;
/// use eventide_runtime::processor::HandlerRegistry;
///
/// #[derive(Debug)]
/// struct Ping {
///     id: CommandId,
/// }
///
/// impl Command for Ping {
///     fn command_id(&self) -> CommandId {
///         self.id
///     }
/// }
///
/// struct PingHandler;
///
/// impl CommandHandler<Ping> for PingHandler {
///     async fn handle(&self, _command: &Ping, _cancel: CancelToken) -> anyhow::Result<Handled> {
///         Ok(Handled::ok(Vec::new(), "pong"))
///     }
/// }
///
/// let mut handlers = HandlerRegistry::new();
/// handlers.register::<Ping, _>(PingHandler);
/// assert!(handlers.contains::<Ping>());
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TypeId, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle every `C` with one shared `handler`.
    pub fn register<C, H>(&mut self, handler: H) -> &mut Self
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let erased = Shared::<C, H> {
            handler: Arc::new(handler),
            _command: PhantomData,
        };
        self.handlers.insert(TypeId::of::<C>(), Arc::new(erased));
        self
    }

    /// Handle every `C` with a fresh handler built by `factory`.
    pub fn register_factory<C, H, F>(&mut self, factory: F) -> &mut Self
    where
        C: Command,
        H: CommandHandler<C>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let erased = Factory::<C, H, F> {
            factory,
            _types: PhantomData,
        };
        self.handlers.insert(TypeId::of::<C>(), Arc::new(erased));
        self
    }

    /// Whether a handler is registered for `C`.
    #[must_use]
    pub fn contains<C: Command>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<C>())
    }

    /// Number of registered command types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn lookup(&self, command: &dyn Command) -> Option<Arc<dyn ErasedHandler>> {
        let type_id = command.as_any().type_id();
        self.handlers.get(&type_id).cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Runs commands through their handlers and persists the outcomes.
pub struct CommandProcessor {
    handlers: HandlerRegistry,
    writer: Arc<dyn EventWriter>,
    outcome_reader: Option<Arc<dyn EventReader>>,
    notifier: WakeUpNotifier,
    persist_retry: RetryPolicy,
    results: Broadcaster<ProcessingResult>,
    processed: Broadcaster<CommandProcessed>,
}

impl CommandProcessor {
    /// Create a processor writing through `writer`.
    #[must_use]
    pub fn new(handlers: HandlerRegistry, writer: Arc<dyn EventWriter>, config: &RuntimeConfig) -> Self {
        Self {
            handlers,
            writer,
            outcome_reader: None,
            notifier: WakeUpNotifier::none(),
            persist_retry: config.persist_retry.clone(),
            results: Broadcaster::new(),
            processed: Broadcaster::new(),
        }
    }

    /// Signal `notifier` after every write, so a polling event stream picks
    /// new events up without waiting out its interval.
    #[must_use]
    pub fn with_notifier(mut self, notifier: WakeUpNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Before retrying a `CommandProcessed` write, look in `reader` for the
    /// outcome and stop if an earlier attempt committed it.
    ///
    /// Without a reader, a write that committed but reported failure is
    /// written again.
    #[must_use]
    pub fn with_outcome_reader(mut self, reader: Arc<dyn EventReader>) -> Self {
        self.outcome_reader = Some(reader);
        self
    }

    /// Every result produced from now on, in completion order.
    #[must_use]
    pub fn results(&self) -> Subscription<ProcessingResult> {
        self.results.subscribe()
    }

    /// Dispatch `command` to its handler and classify what happened.
    ///
    /// Nothing is written. The handler runs in its own task, so a panic is
    /// contained and reported as [`ProcessingResult::Faulted`].
    pub async fn process(&self, command: Arc<dyn Command>, cancel: CancelToken) -> ProcessingResult {
        let command_id = command.command_id();

        let Some(handler) = self.handlers.lookup(command.as_ref()) else {
            tracing::warn!(
                command_id = %command_id,
                command_type = command.command_type(),
                "No handler registered"
            );
            return ProcessingResult::Unhandled {
                command_id,
                reason: format!("no handler registered for {}", command.command_type()),
            };
        };

        if cancel.is_cancelled() {
            return cancelled(command_id, "cancelled before execution");
        }

        let mut task = tokio::spawn(handler.call(command, cancel.clone()));
        let joined = tokio::select! {
            biased;
            joined = &mut task => joined,
            () = cancel.cancelled() => {
                task.abort();
                return cancelled(command_id, "cancelled during execution");
            }
        };

        match joined {
            Ok(Ok(Handled { events, result })) => ProcessingResult::Processed {
                command_id,
                events,
                result,
            },
            Ok(Err(error)) => classify_error(command_id, &error, &cancel),
            Err(join_error) => classify_join_error(command_id, join_error),
        }
    }

    /// [`process`](Self::process), then persist.
    ///
    /// Events of a `Processed` result are written first; if that fails the
    /// result becomes `Faulted`. Then one [`CommandProcessed`] is written,
    /// retried with the configured policy. A retry is skipped when the
    /// [outcome reader](Self::with_outcome_reader) already finds it.
    #[tracing::instrument(skip_all, fields(command_id = %command.command_id()))]
    pub async fn process_and_persist(
        &self,
        command: Arc<dyn Command>,
        cancel: CancelToken,
    ) -> ProcessingResult {
        let started = Instant::now();
        let mut result = self.process(command, cancel).await;

        let write_failure = match &result {
            ProcessingResult::Processed { events, .. } if !events.is_empty() => {
                match self.writer.write_events(events.clone()).await {
                    Ok(written) => {
                        tracing::debug!(count = written.len(), "Events persisted");
                        self.notifier.signal();
                        None
                    }
                    Err(e) => Some(e),
                }
            }
            _ => None,
        };
        if let Some(e) = write_failure {
            tracing::error!(error = %e, "Failed to persist events");
            result = ProcessingResult::Faulted {
                command_id: result.command_id(),
                error: format!("failed to persist events: {e}"),
            };
        }

        let processed = CommandProcessed::from_result(&result);
        self.persist_outcome(&processed).await;

        CommandMetrics::record_processed(result.kind(), started.elapsed());
        tracing::debug!(outcome = result.kind(), "Command processed");

        self.processed.publish(&processed);
        self.results.publish(&result);
        result
    }

    /// Consume `commands`, processing each in its own task, until `cancel`
    /// fires or the subscription ends. In-flight commands are awaited.
    pub async fn run(self: Arc<Self>, mut commands: Subscription<Arc<dyn Command>>, cancel: CancelToken) {
        let mut in_flight = JoinSet::new();
        tracing::info!("Command processor started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let processor = Arc::clone(&self);
                    let cancel = cancel.clone();
                    in_flight.spawn(async move {
                        processor.process_and_persist(command, cancel).await;
                    });
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        tracing::info!("Command processor stopped");
    }

    /// Write `processed`, retrying failed writes.
    ///
    /// Without an outcome reader this is at-least-once: a write that
    /// committed but lost its acknowledgement is written again.
    async fn persist_outcome(&self, processed: &CommandProcessed) {
        let payload: Arc<dyn EventPayload> = Arc::new(processed.clone());
        let stream_id = processed.stream_id();
        let mut retrying = false;

        // The outcome is written even for cancelled commands.
        let written = retry_with_backoff(&self.persist_retry, &CancelToken::none(), || {
            let check = std::mem::replace(&mut retrying, true);
            let payload = Arc::clone(&payload);
            let stream_id = &stream_id;
            async move {
                if check && self.outcome_written(stream_id).await {
                    tracing::debug!(stream_id = %stream_id, "Outcome already written");
                    return Ok(());
                }
                self.writer.write_events(vec![payload]).await.map(|_| ())
            }
        })
        .await;

        match written {
            Ok(()) => self.notifier.signal(),
            Err(e) => {
                CommandMetrics::record_outcome_write_failure();
                tracing::error!(
                    command_id = %processed.command_id,
                    error = %e,
                    "Failed to persist CommandProcessed"
                );
            }
        }
    }

    async fn outcome_written(&self, stream_id: &StreamId) -> bool {
        let Some(reader) = &self.outcome_reader else {
            return false;
        };
        match reader.read_stream(stream_id, Position::MAX).await {
            Ok(events) => !events.is_empty(),
            Err(e) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "Could not look for an earlier outcome write");
                false
            }
        }
    }
}

impl ProcessedFeed for CommandProcessor {
    fn subscribe_processed(&self) -> Subscription<CommandProcessed> {
        self.processed.subscribe()
    }
}

impl std::fmt::Debug for CommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessor")
            .field("handlers", &self.handlers)
            .field("persist_retry", &self.persist_retry)
            .finish_non_exhaustive()
    }
}

fn cancelled(command_id: CommandId, reason: impl Into<String>) -> ProcessingResult {
    tracing::info!(command_id = %command_id, "Command cancelled");
    ProcessingResult::Cancelled {
        command_id,
        reason: reason.into(),
    }
}

fn classify_error(command_id: CommandId, error: &anyhow::Error, cancel: &CancelToken) -> ProcessingResult {
    if let Some(stop) = error.downcast_ref::<Cancelled>() {
        return cancelled(command_id, stop.reason());
    }
    if cancel.is_cancelled() {
        return cancelled(command_id, format!("cancelled: {error}"));
    }
    tracing::error!(command_id = %command_id, error = %error, "Handler failed");
    ProcessingResult::Faulted {
        command_id,
        error: format!("{error:#}"),
    }
}

fn classify_join_error(command_id: CommandId, join_error: JoinError) -> ProcessingResult {
    if join_error.is_cancelled() {
        return cancelled(command_id, "handler task aborted");
    }
    let message = join_error.try_into_panic().map_or_else(
        |e| e.to_string(),
        |payload| panic_message(payload.as_ref()),
    );
    tracing::error!(command_id = %command_id, panic = %message, "Handler panicked");
    ProcessingResult::Faulted {
        command_id,
        error: format!("handler panicked: {message}"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use eventide_core::cancel::CancelSource;
    use eventide_core::failure::Failure;
    use eventide_core::stream::StreamId;
    use eventide_testing::InMemoryEventStore;
    use serde::{Deserialize, Serialize};
    use eventide_core::event::Event;
    use eventide_core::event_store::EventStoreError;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct Greet {
        id: CommandId,
        name: String,
    }

    impl Greet {
        fn new(name: &str) -> Arc<dyn Command> {
            Arc::new(Self {
                id: CommandId::new(),
                name: name.to_string(),
            })
        }
    }

    impl Command for Greet {
        fn command_id(&self) -> CommandId {
            self.id
        }
    }

    #[derive(Debug)]
    struct Unknown {
        id: CommandId,
    }

    impl Command for Unknown {
        fn command_id(&self) -> CommandId {
            self.id
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Greeted {
        name: String,
    }

    impl EventPayload for Greeted {
        fn event_type(&self) -> &'static str {
            "Greeted.v1"
        }

        fn stream_id(&self) -> StreamId {
            StreamId::new("Greeting", self.name.clone())
        }
    }

    struct GreetHandler;

    impl CommandHandler<Greet> for GreetHandler {
        async fn handle(&self, command: &Greet, _cancel: CancelToken) -> anyhow::Result<Handled> {
            match command.name.as_str() {
                "" => Ok(Handled::failed(Failure::invalid_input("name is empty"))),
                "error" => anyhow::bail!("handler error"),
                "panic" => panic!("handler panic"),
                "stop" => Err(Cancelled::new("handler stopped").into()),
                name => Ok(Handled::ok(
                    vec![Arc::new(Greeted { name: name.to_string() })],
                    format!("hello {name}"),
                )),
            }
        }
    }

    struct SlowHandler;

    impl CommandHandler<Greet> for SlowHandler {
        async fn handle(&self, _command: &Greet, cancel: CancelToken) -> anyhow::Result<Handled> {
            cancel.cancelled().await;
            Err(Cancelled::new("observed cancellation").into())
        }
    }

    fn processor(store: &Arc<InMemoryEventStore>) -> CommandProcessor {
        let mut handlers = HandlerRegistry::new();
        handlers.register::<Greet, _>(GreetHandler);
        let config = RuntimeConfig::default().with_persist_retry(
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(1))
                .build(),
        );
        CommandProcessor::new(handlers, store.clone(), &config)
    }

    fn outcomes(store: &InMemoryEventStore) -> Vec<CommandProcessed> {
        store
            .events()
            .iter()
            .filter_map(|event| event.payload_as::<CommandProcessed>().cloned())
            .collect()
    }

    #[tokio::test]
    async fn processed_command_writes_events_then_outcome() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = processor(&store);
        let command = Greet::new("ada");
        let id = command.command_id();

        let result = processor
            .process_and_persist(command, CancelToken::none())
            .await;

        assert!(matches!(result, ProcessingResult::Processed { ref events, .. } if events.len() == 1));
        let events = store.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "Greeted.v1");
        assert_eq!(
            outcomes(&store),
            vec![CommandProcessed {
                command_id: id,
                result: Ok("hello ada".into()),
            }]
        );
    }

    #[tokio::test]
    async fn business_failure_writes_only_the_outcome() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = processor(&store);

        let result = processor
            .process_and_persist(Greet::new(""), CancelToken::none())
            .await;

        assert!(matches!(
            result,
            ProcessingResult::Processed { result: Err(Failure::InvalidInput(_)), .. }
        ));
        assert_eq!(store.events().len(), 1);
        assert_eq!(outcomes(&store).len(), 1);
    }

    #[tokio::test]
    async fn unregistered_command_is_unhandled() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = processor(&store);

        let result = processor
            .process_and_persist(Arc::new(Unknown { id: CommandId::new() }), CancelToken::none())
            .await;

        assert!(matches!(result, ProcessingResult::Unhandled { .. }));
        assert!(matches!(outcomes(&store)[0].result, Err(Failure::Internal(_))));
    }

    #[tokio::test]
    async fn handler_error_and_panic_are_faulted() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = processor(&store);

        let error = processor
            .process_and_persist(Greet::new("error"), CancelToken::none())
            .await;
        let panic = processor
            .process_and_persist(Greet::new("panic"), CancelToken::none())
            .await;
        let after = processor
            .process_and_persist(Greet::new("grace"), CancelToken::none())
            .await;

        assert!(matches!(error, ProcessingResult::Faulted { ref error, .. } if error.contains("handler error")));
        assert!(matches!(panic, ProcessingResult::Faulted { ref error, .. } if error.contains("handler panic")));
        assert!(matches!(after, ProcessingResult::Processed { result: Ok(_), .. }));
        assert_eq!(outcomes(&store).len(), 3);
    }

    #[tokio::test]
    async fn cancelled_error_from_handler_is_cancelled() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = processor(&store);

        let result = processor
            .process_and_persist(Greet::new("stop"), CancelToken::none())
            .await;

        assert!(matches!(result, ProcessingResult::Cancelled { ref reason, .. } if reason == "handler stopped"));
        assert_eq!(outcomes(&store)[0].result, Err(Failure::cancelled("handler stopped")));
    }

    #[tokio::test]
    async fn firing_the_token_cancels_a_running_handler() {
        let store = Arc::new(InMemoryEventStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register::<Greet, _>(SlowHandler);
        let processor = CommandProcessor::new(handlers, store.clone(), &RuntimeConfig::default());

        let source = CancelSource::new();
        let token = source.token();
        let running = tokio::spawn(async move {
            processor.process_and_persist(Greet::new("slow"), token).await
        });
        tokio::task::yield_now().await;
        source.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, ProcessingResult::Cancelled { .. }));
        assert_eq!(outcomes(&store).len(), 1);
    }

    #[tokio::test]
    async fn failed_event_write_downgrades_to_faulted() {
        let store = Arc::new(InMemoryEventStore::new());
        store.fail_next_writes(1);
        let processor = processor(&store);

        let result = processor
            .process_and_persist(Greet::new("ada"), CancelToken::none())
            .await;

        assert!(matches!(result, ProcessingResult::Faulted { ref error, .. } if error.contains("persist")));
        let events = store.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].payload_as::<CommandProcessed>().is_some());
    }

    #[tokio::test]
    async fn outcome_write_is_retried() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = processor(&store);
        // Greet("") writes no events, so both failures hit the outcome write.
        store.fail_next_writes(2);

        processor
            .process_and_persist(Greet::new(""), CancelToken::none())
            .await;

        assert_eq!(outcomes(&store).len(), 1);
    }

    #[tokio::test]
    async fn factory_builds_a_handler_per_command() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let mut handlers = HandlerRegistry::new();
        handlers.register_factory::<Greet, _, _>(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            GreetHandler
        });
        let store = Arc::new(InMemoryEventStore::new());
        let processor = CommandProcessor::new(handlers, store, &RuntimeConfig::default());

        processor.process(Greet::new("a"), CancelToken::none()).await;
        processor.process(Greet::new("b"), CancelToken::none()).await;

        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn results_and_processed_feeds_see_every_outcome() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = processor(&store);
        let mut results = processor.results();
        let mut processed = processor.subscribe_processed();

        let command = Greet::new("ada");
        let id = command.command_id();
        processor.process_and_persist(command, CancelToken::none()).await;

        assert_eq!(results.try_recv().map(|r| r.command_id()), Some(id));
        assert_eq!(processed.try_recv().map(|p| p.command_id), Some(id));
    }

    /// Commits the first write but reports it as failed.
    struct LostAckWriter {
        inner: Arc<InMemoryEventStore>,
        acked: AtomicBool,
    }

    impl EventWriter for LostAckWriter {
        fn write_events(
            &self,
            events: Vec<Arc<dyn EventPayload>>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, EventStoreError>> + Send + '_>> {
            Box::pin(async move {
                let written = self.inner.write_events(events).await?;
                if self.acked.swap(true, Ordering::SeqCst) {
                    Ok(written)
                } else {
                    Err(EventStoreError::IoError("connection reset".into()))
                }
            })
        }
    }

    fn lost_ack_processor(store: &Arc<InMemoryEventStore>) -> CommandProcessor {
        let writer = Arc::new(LostAckWriter {
            inner: store.clone(),
            acked: AtomicBool::new(false),
        });
        let mut handlers = HandlerRegistry::new();
        handlers.register::<Greet, _>(GreetHandler);
        let config = RuntimeConfig::default().with_persist_retry(
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(1))
                .build(),
        );
        CommandProcessor::new(handlers, writer, &config)
    }

    #[tokio::test]
    async fn outcome_reader_stops_a_retry_after_a_lost_ack() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = lost_ack_processor(&store).with_outcome_reader(store.clone());
        let command = Greet::new("");
        let id = command.command_id();

        processor.process_and_persist(command, CancelToken::none()).await;

        let persisted = outcomes(&store);
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].command_id, id);
        assert_eq!(store.stream_read_count(), 1);
    }

    #[tokio::test]
    async fn without_an_outcome_reader_a_lost_ack_writes_twice() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = lost_ack_processor(&store);
        let command = Greet::new("");
        let id = command.command_id();

        processor.process_and_persist(command, CancelToken::none()).await;

        let persisted = outcomes(&store);
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().all(|p| p.command_id == id));
    }
}
