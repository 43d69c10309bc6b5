//! In-memory log driver for fast, deterministic tests.
//!
//! [`InMemoryEventStore`] implements both driver traits over a `Vec`. It can
//! keep payloads as-is or, given a serializer, store bytes and decode them on
//! every read (so the replay rule applies, as with a real driver).
//!
//! Failures can be scripted per read position, for the next by-stream read,
//! and for the next N writes; reads are counted so tests can assert that a
//! cache did or did not go back to the log.

use eventide_core::environment::{Clock, SystemClock};
use eventide_core::event::{Event, EventPayload, RecordedEvent, SerializedEvent};
use eventide_core::event_store::{EventReader, EventStoreError, EventWriter, ReadFailure, decode_batch};
use eventide_core::registry::EventSerializer;
use eventide_core::stream::{Position, StreamId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

enum Log {
    Payloads(Vec<Event>),
    Records {
        serializer: Arc<dyn EventSerializer>,
        records: Vec<RecordedEvent>,
    },
}

impl Log {
    fn len(&self) -> usize {
        match self {
            Self::Payloads(events) => events.len(),
            Self::Records { records, .. } => records.len(),
        }
    }

    /// Up to `limit` events from index `from`, below `bound`, optionally of
    /// one stream only.
    fn read(
        &self,
        from: usize,
        limit: usize,
        stream_id: Option<&StreamId>,
        bound: Position,
    ) -> Result<Vec<Event>, ReadFailure> {
        match self {
            Self::Payloads(events) => Ok(events
                .iter()
                .skip(from)
                .filter(|event| event.position() < bound)
                .filter(|event| stream_id.is_none_or(|id| &event.stream_id() == id))
                .take(limit)
                .cloned()
                .collect()),
            Self::Records {
                serializer,
                records,
            } => {
                let selected: Vec<RecordedEvent> = records
                    .iter()
                    .skip(from)
                    .filter(|record| record.position < bound)
                    .filter(|record| stream_id.is_none_or(|id| &record.stream_id == id))
                    .take(limit)
                    .cloned()
                    .collect();
                decode_batch(serializer.as_ref(), &selected)
            }
        }
    }
}

struct State {
    log: Log,
    streams: HashSet<StreamId>,
    read_failures: HashMap<Position, VecDeque<ReadFailure>>,
    stream_read_failures: VecDeque<ReadFailure>,
    failing_writes: usize,
    read_from_count: usize,
    stream_read_count: usize,
}

/// In-memory [`EventReader`] + [`EventWriter`].
///
/// # Example
///
/// ```
/// use eventide_core::command::{CommandId, CommandProcessed};
/// use eventide_core::event_store::{EventReader, EventWriter};
/// use eventide_core::stream::Position;
/// use eventide_testing::InMemoryEventStore;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryEventStore::new();
/// let outcome = CommandProcessed { command_id: CommandId::new(), result: Ok("ok".into()) };
///
/// let written = store.write_events(vec![Arc::new(outcome)]).await.unwrap();
/// assert_eq!(written[0].position(), Position::ZERO);
///
/// let read = store.read_from(Position::ZERO).await.unwrap();
/// assert_eq!(read.len(), 1);
/// # });
/// ```
pub struct InMemoryEventStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    max_batch_size: usize,
}

impl InMemoryEventStore {
    /// An empty store that keeps payloads as-is.
    #[must_use]
    pub fn new() -> Self {
        Self::with_log(Log::Payloads(Vec::new()))
    }

    /// An empty store that encodes with `serializer` on write and decodes on
    /// every read.
    #[must_use]
    pub fn with_serializer(serializer: Arc<dyn EventSerializer>) -> Self {
        Self::with_log(Log::Records {
            serializer,
            records: Vec::new(),
        })
    }

    fn with_log(log: Log) -> Self {
        Self {
            state: Mutex::new(State {
                log,
                streams: HashSet::new(),
                read_failures: HashMap::new(),
                stream_read_failures: VecDeque::new(),
                failing_writes: 0,
                read_from_count: 0,
                stream_read_count: 0,
            }),
            clock: Arc::new(SystemClock),
            max_batch_size: usize::MAX,
        }
    }

    /// Stamp written events with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return at most `size` events per `read_from` (at least one).
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Fail the next `read_from(position)` with `failure`.
    ///
    /// Calls queue up: scripting two failures for one position fails the
    /// next two reads from it.
    pub fn fail_read_from(&self, position: Position, failure: ReadFailure) {
        self.lock()
            .read_failures
            .entry(position)
            .or_default()
            .push_back(failure);
    }

    /// Fail the next by-stream read with `failure`.
    pub fn fail_next_stream_read(&self, failure: ReadFailure) {
        self.lock().stream_read_failures.push_back(failure);
    }

    /// Fail the next `count` writes; nothing they carry is appended.
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes += count;
    }

    /// Append an already encoded record, bypassing the serializer.
    ///
    /// Lets tests plant undecodable records. Ignored by stores without a
    /// serializer.
    pub fn append_raw(&self, stream_id: StreamId, event: SerializedEvent) -> Option<Position> {
        let mut state = self.lock();
        if matches!(state.log, Log::Payloads(_)) {
            return None;
        }
        let position = Position::new(state.log.len() as u64);
        let is_first_of_stream = state.streams.insert(stream_id.clone());
        let record = RecordedEvent {
            position,
            timestamp: self.clock.now(),
            stream_id,
            is_first_of_stream,
            event,
        };
        if let Log::Records { records, .. } = &mut state.log {
            records.push(record);
        }
        Some(position)
    }

    /// Every decodable event, in position order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        let state = self.lock();
        match &state.log {
            Log::Payloads(events) => events.clone(),
            Log::Records {
                serializer,
                records,
            } => records
                .iter()
                .filter_map(|record| {
                    decode_batch(serializer.as_ref(), std::slice::from_ref(record))
                        .ok()
                        .and_then(|mut events| events.pop())
                })
                .collect(),
        }
    }

    /// Events of `stream_id`, in position order.
    #[must_use]
    pub fn events_of(&self, stream_id: &StreamId) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| &event.stream_id() == stream_id)
            .collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    /// Whether nothing was written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `read_from` calls so far.
    #[must_use]
    pub fn read_from_count(&self) -> usize {
        self.lock().read_from_count
    }

    /// Number of `read_stream` calls so far.
    #[must_use]
    pub fn stream_read_count(&self) -> usize {
        self.lock().stream_read_count
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, payloads: Vec<Arc<dyn EventPayload>>) -> Result<Vec<Event>, EventStoreError> {
        let mut state = self.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(EventStoreError::DatabaseError("scripted write failure".to_string()));
        }

        let timestamp = self.clock.now();
        let start = state.log.len() as u64;

        // Encode everything before touching the log so a failure appends nothing.
        let encoded = match &state.log {
            Log::Payloads(_) => None,
            Log::Records { serializer, .. } => Some(
                payloads
                    .iter()
                    .map(|payload| serializer.serialize(payload.as_ref()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| EventStoreError::SerializationError(e.to_string()))?,
            ),
        };

        let mut written = Vec::with_capacity(payloads.len());
        let mut encoded = encoded.map(Vec::into_iter);
        for (offset, payload) in payloads.into_iter().enumerate() {
            let position = Position::new(start + offset as u64);
            let stream_id = payload.stream_id();
            let is_first_of_stream = state.streams.insert(stream_id.clone());
            let event = Event::new(position, timestamp, Arc::clone(&payload))
                .with_first_of_stream_hint(is_first_of_stream);

            match (&mut state.log, encoded.as_mut().and_then(Iterator::next)) {
                (Log::Payloads(events), _) => events.push(event.clone()),
                (Log::Records { records, .. }, Some(bytes)) => records.push(RecordedEvent {
                    position,
                    timestamp,
                    stream_id,
                    is_first_of_stream,
                    event: bytes,
                }),
                (Log::Records { .. }, None) => {}
            }
            written.push(event);
        }
        Ok(written)
    }

    fn read_page(&self, from: Position) -> Result<Vec<Event>, ReadFailure> {
        let mut state = self.lock();
        state.read_from_count += 1;

        if let Some(failure) = state
            .read_failures
            .get_mut(&from)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure);
        }

        let Ok(from_index) = usize::try_from(from.value()) else {
            return Ok(Vec::new());
        };
        state
            .log
            .read(from_index, self.max_batch_size, None, Position::MAX)
    }

    fn read_stream_events(&self, stream_id: &StreamId, bound: Position) -> Result<Vec<Event>, ReadFailure> {
        let mut state = self.lock();
        state.stream_read_count += 1;

        if let Some(failure) = state.stream_read_failures.pop_front() {
            return Err(failure);
        }
        state.log.read(0, usize::MAX, Some(stream_id), bound)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("len", &self.len())
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}

impl EventReader for InMemoryEventStore {
    fn read_stream(
        &self,
        stream_id: &StreamId,
        up_to_exclusive: Position,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, ReadFailure>> + Send + '_>> {
        let result = self.read_stream_events(stream_id, up_to_exclusive);
        Box::pin(async move { result })
    }

    fn read_from(
        &self,
        from_inclusive: Position,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, ReadFailure>> + Send + '_>> {
        let result = self.read_page(from_inclusive);
        Box::pin(async move { result })
    }
}

impl EventWriter for InMemoryEventStore {
    fn write_events(
        &self,
        events: Vec<Arc<dyn EventPayload>>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, EventStoreError>> + Send + '_>> {
        let result = self.append(events);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::test_clock;
    use eventide_core::command::{CommandId, CommandProcessed};
    use eventide_core::event::PayloadType;
    use eventide_core::registry::PayloadRegistry;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Noted {
        topic: String,
    }

    impl PayloadType for Noted {
        const EVENT_TYPE: &'static str = "Noted.v1";
    }

    impl EventPayload for Noted {
        fn event_type(&self) -> &'static str {
            Self::EVENT_TYPE
        }

        fn stream_id(&self) -> StreamId {
            StreamId::new("Topic", self.topic.clone())
        }
    }

    fn noted(topic: &str) -> Arc<dyn EventPayload> {
        Arc::new(Noted {
            topic: topic.to_string(),
        })
    }

    fn positions(events: &[Event]) -> Vec<u64> {
        events.iter().map(|e| e.position().value()).collect()
    }

    #[tokio::test]
    async fn positions_are_assigned_in_write_order() {
        let store = InMemoryEventStore::new().with_clock(Arc::new(test_clock()));
        let first = store.write_events(vec![noted("a"), noted("b")]).await.unwrap();
        let second = store.write_events(vec![noted("a")]).await.unwrap();

        assert_eq!(positions(&first), vec![0, 1]);
        assert_eq!(positions(&second), vec![2]);
        assert_eq!(first[0].is_first_of_stream(), Some(true));
        assert_eq!(second[0].is_first_of_stream(), Some(false));
        assert_eq!(first[0].timestamp(), test_clock().now());
    }

    #[tokio::test]
    async fn read_stream_respects_the_bound() {
        let store = InMemoryEventStore::new();
        store
            .write_events(vec![noted("a"), noted("b"), noted("a"), noted("a")])
            .await
            .unwrap();

        let all = store.read_stream(&StreamId::new("Topic", "a"), Position::MAX).await.unwrap();
        let bounded = store.read_stream(&StreamId::new("Topic", "a"), Position::new(3)).await.unwrap();

        assert_eq!(positions(&all), vec![0, 2, 3]);
        assert_eq!(positions(&bounded), vec![0, 2]);
        assert_eq!(store.stream_read_count(), 2);
    }

    #[tokio::test]
    async fn read_from_pages_by_max_batch_size() {
        let store = InMemoryEventStore::new().with_max_batch_size(2);
        store
            .write_events(vec![noted("a"), noted("b"), noted("c")])
            .await
            .unwrap();

        assert_eq!(positions(&store.read_from(Position::ZERO).await.unwrap()), vec![0, 1]);
        assert_eq!(positions(&store.read_from(Position::new(2)).await.unwrap()), vec![2]);
        assert!(store.read_from(Position::new(3)).await.unwrap().is_empty());
        assert!(store.read_from(Position::MAX).await.unwrap().is_empty());
        assert_eq!(store.read_from_count(), 4);
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let store = InMemoryEventStore::new();
        store.write_events(vec![noted("a")]).await.unwrap();
        store.fail_read_from(Position::ZERO, ReadFailure::Temporary("blip".into()));
        store.fail_next_stream_read(ReadFailure::Permanent("gone".into()));
        store.fail_next_writes(1);

        assert!(store.read_from(Position::ZERO).await.is_err());
        assert_eq!(store.read_from(Position::ZERO).await.unwrap().len(), 1);

        let stream = StreamId::new("Topic", "a");
        assert!(store.read_stream(&stream, Position::MAX).await.is_err());
        assert_eq!(store.read_stream(&stream, Position::MAX).await.unwrap().len(), 1);

        assert!(store.write_events(vec![noted("b")]).await.is_err());
        assert_eq!(store.len(), 1);
        assert!(store.write_events(vec![noted("b")]).await.is_ok());
    }

    #[tokio::test]
    async fn serializing_store_round_trips_registered_payloads() {
        let mut registry = PayloadRegistry::new();
        registry.register::<Noted>().unwrap();
        let store = InMemoryEventStore::with_serializer(Arc::new(registry));

        store
            .write_events(vec![
                noted("a"),
                Arc::new(CommandProcessed {
                    command_id: CommandId::new(),
                    result: Ok("ok".into()),
                }),
            ])
            .await
            .unwrap();

        let events = store.read_from(Position::ZERO).await.unwrap();
        assert_eq!(events[0].payload_as::<Noted>().map(|n| n.topic.as_str()), Some("a"));
        assert!(events[1].payload_as::<CommandProcessed>().is_some());
    }

    #[tokio::test]
    async fn serializing_store_rejects_unregistered_payloads() {
        let store = InMemoryEventStore::with_serializer(Arc::new(PayloadRegistry::new()));

        let result = store.write_events(vec![noted("a")]).await;

        assert!(matches!(result, Err(EventStoreError::SerializationError(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn undecodable_records_follow_the_replay_rule() {
        let mut registry = PayloadRegistry::new();
        registry.register::<Noted>().unwrap();
        let store = InMemoryEventStore::with_serializer(Arc::new(registry));

        let bad = SerializedEvent::new("Missing.v1".to_string(), vec![0], None);
        store.append_raw(StreamId::new("Topic", "x"), bad.clone());
        store.write_events(vec![noted("a")]).await.unwrap();
        store.append_raw(StreamId::new("Topic", "x"), bad);
        store.write_events(vec![noted("b")]).await.unwrap();

        assert!(matches!(
            store.read_from(Position::ZERO).await,
            Err(ReadFailure::Permanent(_))
        ));
        let from_one = store.read_from(Position::new(1)).await.unwrap();
        assert_eq!(positions(&from_one), vec![1, 3]);
        assert_eq!(positions(&store.events()), vec![1, 3]);
    }
}
