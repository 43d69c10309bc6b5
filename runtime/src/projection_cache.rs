//! Lazily populated read-model caches.
//!
//! A [`ProjectionCache`] folds the events of matching streams into a
//! projection per [`StreamId`] and keeps it current from a live
//! [`EventStream`].
//!
//! # Consistency
//!
//! - Entries remember the position of the last event folded into them.
//! - The live path skips events at or below an entry's position and at or
//!   below the cache's high-water mark, so nothing is applied twice.
//! - A backfill (a `get` miss) reads without holding the cache lock and is
//!   stored only if no entry exists or the existing entry is older, so a
//!   `get` never hides a newer live value.
//! - State lives in a copy-on-write snapshot; readers never block writers.
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = Arc::new(ProjectionCache::new(AccountProjector, store.clone()));
//! cache.attach(&events);
//!
//! let outcome = commands.submit_and_await(open_account, cache.as_ref()).await?;
//! let account = cache.get(&StreamId::new("Account", "A")).await?;
//! ```

use crate::command_stream::ProcessedFeed;
use crate::error::RuntimeError;
use crate::event_stream::EventStream;
use crate::fanout::{Broadcaster, Subscription};
use crate::metrics::ProjectionMetrics;
use eventide_core::command::CommandProcessed;
use eventide_core::event::Event;
use eventide_core::event_store::{EventReader, ReadFailure};
use eventide_core::stream::{Position, StreamId};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::AbortHandle;

/// Folds events of matching streams into a projection.
pub trait Projector: Send + Sync + 'static {
    /// The projection type.
    type State: Clone + PartialEq + Send + Sync + 'static;

    /// Whether events of `stream_id` feed this projection.
    fn matches(&self, stream_id: &StreamId) -> bool;

    /// Fold `event` into `state`. `None` means "no projection" (not created
    /// yet, or removed).
    fn apply(
        &self,
        state: Option<Self::State>,
        event: &Event,
    ) -> impl Future<Output = Option<Self::State>> + Send;
}

/// A cached projection and the position of the last event folded into it.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry<S> {
    /// The folded projection.
    pub state: Option<S>,
    /// Position of the last folded event.
    pub position: Position,
}

/// Storage for cache entries.
pub trait CacheCollection<S>: Clone + Send + Sync + 'static {
    /// The entry for `stream_id`.
    fn get(&self, stream_id: &StreamId) -> Option<&Entry<S>>;

    /// Insert or replace the entry for `stream_id`.
    fn insert(&mut self, stream_id: StreamId, entry: Entry<S>);

    /// Every entry currently held.
    fn entries(&self) -> Vec<(&StreamId, &Entry<S>)>;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Whether the collection is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every inserted entry is kept.
    ///
    /// Only such collections can answer `get_all` from memory.
    fn retains_all(&self) -> bool {
        true
    }

    /// A collection with the same settings and no entries.
    #[must_use]
    fn emptied(&self) -> Self;
}

/// Keeps every entry.
#[derive(Clone, Debug)]
pub struct Unbounded<S> {
    entries: HashMap<StreamId, Entry<S>>,
}

impl<S> Default for Unbounded<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> CacheCollection<S> for Unbounded<S> {
    fn get(&self, stream_id: &StreamId) -> Option<&Entry<S>> {
        self.entries.get(stream_id)
    }

    fn insert(&mut self, stream_id: StreamId, entry: Entry<S>) {
        self.entries.insert(stream_id, entry);
    }

    fn entries(&self) -> Vec<(&StreamId, &Entry<S>)> {
        self.entries.iter().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn emptied(&self) -> Self {
        Self::default()
    }
}

/// Keeps at most `capacity` entries, evicting the one written longest ago.
#[derive(Clone, Debug)]
pub struct Bounded<S> {
    capacity: usize,
    entries: HashMap<StreamId, Entry<S>>,
    write_order: VecDeque<StreamId>,
}

impl<S> Bounded<S> {
    /// A collection holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            write_order: VecDeque::new(),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> CacheCollection<S> for Bounded<S> {
    fn get(&self, stream_id: &StreamId) -> Option<&Entry<S>> {
        self.entries.get(stream_id)
    }

    fn insert(&mut self, stream_id: StreamId, entry: Entry<S>) {
        if self.entries.insert(stream_id.clone(), entry).is_some() {
            self.write_order.retain(|id| id != &stream_id);
        }
        self.write_order.push_back(stream_id);

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.write_order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::trace!(stream_id = %oldest, "Evicted projection");
        }
    }

    fn entries(&self) -> Vec<(&StreamId, &Entry<S>)> {
        self.entries.iter().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn retains_all(&self) -> bool {
        false
    }

    fn emptied(&self) -> Self {
        Self::new(self.capacity)
    }
}

#[derive(Clone, Debug)]
struct Snapshot<C> {
    entries: C,
    high_water: Option<Position>,
    all_loaded: bool,
}

/// How [`ProjectionCache::apply_event`] classified an event.
#[derive(Clone, Debug)]
pub enum ApplyOutcome<S> {
    /// A matching event changed its projection.
    Applied {
        /// The event.
        event: Event,
        /// The projection after folding it.
        projection: Option<S>,
    },
    /// A matching event left its projection as it was.
    Unchanged,
    /// The event recorded a command outcome.
    CommandProcessed(CommandProcessed),
    /// The event does not concern this cache, or was already applied.
    Ignored,
}

/// A projection that changed through the live path: the event and the new
/// projection it produced.
#[derive(Clone, Debug)]
pub struct ItemChanged<S> {
    /// The stream whose projection changed.
    pub stream_id: StreamId,
    /// The event that changed it.
    pub event: Event,
    /// The new projection.
    pub projection: Option<S>,
}

impl<S> ItemChanged<S> {
    /// Position of the event that changed the projection.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.event.position()
    }
}

/// A consistent, lazily populated cache of projections.
pub struct ProjectionCache<P: Projector, C = Unbounded<<P as Projector>::State>> {
    projector: P,
    reader: Arc<dyn EventReader>,
    snapshot: RwLock<Arc<Snapshot<C>>>,
    apply_lock: AsyncMutex<()>,
    changed: Broadcaster<ItemChanged<P::State>>,
    processed: Broadcaster<CommandProcessed>,
    consumer: Mutex<Option<AbortHandle>>,
}

impl<P: Projector> ProjectionCache<P> {
    /// An unbounded cache backfilling from `reader`.
    #[must_use]
    pub fn new(projector: P, reader: Arc<dyn EventReader>) -> Self {
        Self::with_collection(projector, reader, Unbounded::default())
    }
}

impl<P, C> ProjectionCache<P, C>
where
    P: Projector,
    C: CacheCollection<P::State>,
{
    /// A cache storing its entries in `collection`.
    #[must_use]
    pub fn with_collection(projector: P, reader: Arc<dyn EventReader>, collection: C) -> Self {
        Self {
            projector,
            reader,
            snapshot: RwLock::new(Arc::new(Snapshot {
                entries: collection,
                high_water: None,
                all_loaded: false,
            })),
            apply_lock: AsyncMutex::new(()),
            changed: Broadcaster::new(),
            processed: Broadcaster::new(),
            consumer: Mutex::new(None),
        }
    }

    /// The current projection of `stream_id`.
    ///
    /// Served from memory when cached, otherwise backfilled from the log.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Read`] if the backfill read fails.
    #[tracing::instrument(skip(self), fields(stream_id = %stream_id))]
    pub async fn get(&self, stream_id: &StreamId) -> Result<Option<P::State>, RuntimeError> {
        {
            let snapshot = self.load();
            if let Some(entry) = snapshot.entries.get(stream_id) {
                return Ok(entry.state.clone());
            }
            if snapshot.all_loaded || !self.projector.matches(stream_id) {
                return Ok(None);
            }
        }

        let Some(backfilled) = self.backfill(stream_id, Position::MAX).await? else {
            return Ok(None);
        };

        let _guard = self.apply_lock.lock().await;
        let stored = self.update(|snapshot| {
            let newer = snapshot
                .entries
                .get(stream_id)
                .is_none_or(|current| current.position < backfilled.position);
            if newer {
                snapshot.entries.insert(stream_id.clone(), backfilled.clone());
            }
        });
        Ok(stored
            .entries
            .get(stream_id)
            .map_or(backfilled.state, |entry| entry.state.clone()))
    }

    /// The projection of `stream_id` folded from events strictly below
    /// `bound`. Always read from the log; never cached.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Read`] if the read fails.
    pub async fn get_up_to(
        &self,
        stream_id: &StreamId,
        bound: Position,
    ) -> Result<Option<P::State>, RuntimeError> {
        if bound.is_max() {
            return self.get(stream_id).await;
        }
        Ok(self
            .backfill(stream_id, bound)
            .await?
            .and_then(|entry| entry.state))
    }

    /// Every projection, keyed by stream.
    ///
    /// The first call reads the whole log; later calls are answered from
    /// memory when the collection keeps every entry.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Read`] if reading the log fails.
    #[tracing::instrument(skip(self))]
    pub async fn get_all(&self) -> Result<HashMap<StreamId, P::State>, RuntimeError> {
        let _guard = self.apply_lock.lock().await;
        if self.load().all_loaded {
            return Ok(collect_states(&self.load().entries));
        }

        let mut folded: HashMap<StreamId, Entry<P::State>> = HashMap::new();
        let mut cursor = Position::ZERO;
        let mut read_any = false;
        loop {
            let batch = match self.reader.read_from(cursor).await {
                Ok(batch) => batch,
                Err(ReadFailure::Permanent(reason)) if read_any => {
                    tracing::warn!(
                        position = %cursor,
                        error = %reason,
                        "Skipping unreadable position while loading all projections"
                    );
                    cursor = cursor.next();
                    continue;
                }
                Err(failure) => return Err(failure.into()),
            };
            read_any = true;
            let Some(last) = batch.last() else { break };
            cursor = last.position().next();

            for event in &batch {
                let stream_id = event.stream_id();
                if !self.projector.matches(&stream_id) {
                    continue;
                }
                let previous = folded.remove(&stream_id).and_then(|entry| entry.state);
                let state = self.projector.apply(previous, event).await;
                folded.insert(
                    stream_id,
                    Entry {
                        state,
                        position: event.position(),
                    },
                );
            }
        }
        ProjectionMetrics::record_backfill();

        let stored = self.update(|snapshot| {
            for (stream_id, entry) in folded {
                let newer = snapshot
                    .entries
                    .get(&stream_id)
                    .is_none_or(|current| current.position < entry.position);
                if newer {
                    snapshot.entries.insert(stream_id, entry);
                }
            }
            snapshot.all_loaded = snapshot.entries.retains_all();
        });
        tracing::debug!(entries = stored.entries.len(), "Loaded all projections");
        Ok(collect_states(&stored.entries))
    }

    /// Drop every entry. The next reads backfill from the log.
    pub async fn invalidate(&self) {
        let _guard = self.apply_lock.lock().await;
        self.update(|snapshot| {
            snapshot.entries = snapshot.entries.emptied();
            snapshot.all_loaded = false;
        });
        tracing::debug!("Projection cache invalidated");
    }

    /// Apply one live event.
    pub async fn apply_event(&self, event: Event) -> ApplyOutcome<P::State> {
        let _guard = self.apply_lock.lock().await;
        let position = event.position();

        if self.load().high_water.is_some_and(|high| position <= high) {
            tracing::trace!(position = %position, "Skipping already applied event");
            return ApplyOutcome::Ignored;
        }

        if let Some(processed) = event.payload_as::<CommandProcessed>() {
            self.raise_high_water(position);
            self.processed.publish(processed);
            return ApplyOutcome::CommandProcessed(processed.clone());
        }

        let stream_id = event.stream_id();
        if !self.projector.matches(&stream_id) {
            self.raise_high_water(position);
            return ApplyOutcome::Ignored;
        }

        let (existing, all_loaded) = {
            let snapshot = self.load();
            (snapshot.entries.get(&stream_id).cloned(), snapshot.all_loaded)
        };
        let current = match existing {
            Some(entry) if entry.position >= position => {
                self.raise_high_water(position);
                return ApplyOutcome::Ignored;
            }
            Some(entry) => entry.state,
            None if all_loaded || event.is_first_of_stream() == Some(true) => None,
            None => match self.backfill(&stream_id, position).await {
                Ok(entry) => entry.and_then(|entry| entry.state),
                Err(e) => {
                    // Leave the entry missing; the next get backfills it.
                    tracing::error!(
                        stream_id = %stream_id,
                        position = %position,
                        error = %e,
                        "Backfill failed while applying live event"
                    );
                    self.raise_high_water(position);
                    return ApplyOutcome::Ignored;
                }
            },
        };

        let projection = self.projector.apply(current.clone(), &event).await;
        self.update(|snapshot| {
            snapshot.entries.insert(
                stream_id.clone(),
                Entry {
                    state: projection.clone(),
                    position,
                },
            );
            snapshot.high_water = Some(position);
        });
        ProjectionMetrics::record_applied(position.value());

        if projection == current {
            return ApplyOutcome::Unchanged;
        }
        self.changed.publish(&ItemChanged {
            stream_id,
            event: event.clone(),
            projection: projection.clone(),
        });
        ApplyOutcome::Applied { event, projection }
    }

    /// Follow `events` with a single consumer task, replacing any previous
    /// one. The task ends when the cache is dropped or the feed ends.
    pub fn attach(self: &Arc<Self>, events: &EventStream) {
        let mut subscription = events.subscribe();
        let cache: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(cache) = cache.upgrade() else { break };
                cache.apply_event(event).await;
            }
            tracing::debug!("Projection cache consumer ended");
        });

        let previous = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Projections changed through the live path from now on.
    #[must_use]
    pub fn item_changed(&self) -> Subscription<ItemChanged<P::State>> {
        self.changed.subscribe()
    }

    /// Command outcomes observed through the live path from now on.
    #[must_use]
    pub fn command_processed(&self) -> Subscription<CommandProcessed> {
        self.processed.subscribe()
    }

    /// Highest position applied through the live path.
    #[must_use]
    pub fn high_water(&self) -> Option<Position> {
        self.load().high_water
    }

    fn load(&self) -> Arc<Snapshot<C>> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Copy-on-write update; clones only when readers still hold the old
    /// snapshot. Callers hold `apply_lock`.
    fn update(&self, change: impl FnOnce(&mut Snapshot<C>)) -> Arc<Snapshot<C>> {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        change(Arc::make_mut(&mut *guard));
        Arc::clone(&guard)
    }

    fn raise_high_water(&self, position: Position) {
        self.update(|snapshot| {
            if snapshot.high_water.is_none_or(|high| high < position) {
                snapshot.high_water = Some(position);
            }
        });
    }

    /// Fold the events of `stream_id` below `bound`; `None` for an empty
    /// stream.
    async fn backfill(
        &self,
        stream_id: &StreamId,
        bound: Position,
    ) -> Result<Option<Entry<P::State>>, RuntimeError> {
        let events = self.reader.read_stream(stream_id, bound).await?;
        ProjectionMetrics::record_backfill();

        let mut state = None;
        let mut position = None;
        for event in &events {
            state = self.projector.apply(state, event).await;
            position = Some(event.position());
        }
        Ok(position.map(|position| Entry { state, position }))
    }
}

impl<P, C> ProcessedFeed for ProjectionCache<P, C>
where
    P: Projector,
    C: CacheCollection<P::State>,
{
    fn subscribe_processed(&self) -> Subscription<CommandProcessed> {
        self.processed.subscribe()
    }
}

impl<P: Projector, C> Drop for ProjectionCache<P, C> {
    fn drop(&mut self) {
        if let Some(consumer) = self
            .consumer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            consumer.abort();
        }
    }
}

impl<P: Projector, C: CacheCollection<P::State>> std::fmt::Debug for ProjectionCache<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.load();
        f.debug_struct("ProjectionCache")
            .field("entries", &snapshot.entries.len())
            .field("high_water", &snapshot.high_water)
            .field("all_loaded", &snapshot.all_loaded)
            .finish_non_exhaustive()
    }
}

fn collect_states<S: Clone, C: CacheCollection<S>>(entries: &C) -> HashMap<StreamId, S> {
    entries
        .entries()
        .into_iter()
        .filter_map(|(stream_id, entry)| {
            entry
                .state
                .clone()
                .map(|state| (stream_id.clone(), state))
        })
        .collect()
}
