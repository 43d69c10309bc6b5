//! Driver traits for the event log.
//!
//! The runtime never talks to storage directly. It reads and writes through
//! two injected traits:
//!
//! - [`EventReader`]: by-stream reads (projection backfill) and
//!   read-from-position (polling)
//! - [`EventWriter`]: append payloads, positions assigned by the driver
//!
//! # Dyn Compatibility
//!
//! Both traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! they can be shared as `Arc<dyn EventReader>` between the poll loop, the
//! projection caches and the command processor.
//!
//! # Replay
//!
//! Drivers that store bytes decode them with [`decode_batch`], which applies
//! the replay rule: a malformed or unregistered event is skipped with a
//! warning, unless nothing in the batch has decoded yet, in which case the
//! whole read fails permanently so the poll loop's cursor strategy decides
//! what to do with it.

use crate::event::{Event, EventPayload, RecordedEvent};
use crate::registry::EventSerializer;
use crate::stream::{Position, StreamId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// A classified read failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    /// Transient; retrying the same read may succeed.
    #[error("Temporary read failure: {0}")]
    Temporary(String),

    /// Retrying will not help (e.g. an undecodable event).
    #[error("Permanent read failure: {0}")]
    Permanent(String),
}

impl ReadFailure {
    /// Whether this failure is transient.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

/// Errors that can occur while appending events.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Database connection error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Read side of the log.
pub trait EventReader: Send + Sync {
    /// All events of `stream_id` with a position strictly below
    /// `up_to_exclusive`, in increasing position order.
    ///
    /// Pass [`Position::MAX`] for "everything so far". A stream that does not
    /// exist yields an empty batch.
    ///
    /// # Errors
    ///
    /// A classified [`ReadFailure`].
    fn read_stream(
        &self,
        stream_id: &StreamId,
        up_to_exclusive: Position,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, ReadFailure>> + Send + '_>>;

    /// Events at or after `from_inclusive`, in increasing position order.
    ///
    /// A driver may return any prefix of the remaining log; the poll loop
    /// keeps asking from the position after the last event it received.
    ///
    /// # Errors
    ///
    /// A classified [`ReadFailure`].
    fn read_from(
        &self,
        from_inclusive: Position,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, ReadFailure>> + Send + '_>>;
}

/// Write side of the log.
pub trait EventWriter: Send + Sync {
    /// Append `events` atomically, in order.
    ///
    /// Returns the written events with the positions and timestamps the
    /// driver assigned.
    ///
    /// # Errors
    ///
    /// [`EventStoreError`] if nothing could be appended.
    fn write_events(
        &self,
        events: Vec<Arc<dyn EventPayload>>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, EventStoreError>> + Send + '_>>;
}

/// Decode stored records into events, applying the replay rule.
///
/// # Errors
///
/// [`ReadFailure::Permanent`] if a record fails to decode before any record
/// of the batch has decoded.
pub fn decode_batch<S>(serializer: &S, records: &[RecordedEvent]) -> Result<Vec<Event>, ReadFailure>
where
    S: EventSerializer + ?Sized,
{
    let mut events = Vec::with_capacity(records.len());
    for record in records {
        match serializer.deserialize(&record.event) {
            Ok(payload) => events.push(
                Event::new(record.position, record.timestamp, payload)
                    .with_first_of_stream_hint(record.is_first_of_stream),
            ),
            Err(e) if events.is_empty() => {
                return Err(ReadFailure::Permanent(format!(
                    "event at position {} ({}) could not be decoded: {e}",
                    record.position, record.event.event_type
                )));
            }
            Err(e) => {
                tracing::warn!(
                    position = %record.position,
                    stream_id = %record.stream_id,
                    event_type = %record.event.event_type,
                    error = %e,
                    "Skipping undecodable event"
                );
            }
        }
    }
    Ok(events)
}
