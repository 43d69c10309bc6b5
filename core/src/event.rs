//! Events and event payloads.
//!
//! An [`Event`] is an immutable fact read back from the log: the payload a
//! writer appended, plus the [`Position`] and timestamp the driver assigned at
//! write time.
//!
//! # Payloads
//!
//! Payloads are plain value types implementing [`EventPayload`]. Each concrete
//! payload type maps 1:1 to a stable event type tag, declared through
//! [`PayloadType::EVENT_TYPE`]; the tag is what the
//! [`PayloadRegistry`](crate::registry::PayloadRegistry) uses to find the
//! right decoder for stored bytes.
//!
//! # Example
//!
//! ```
//! use eventide_core::event::{EventPayload, PayloadType};
//! use eventide_core::stream::StreamId;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! struct AccountCreated {
//!     account_id: String,
//!     owner: String,
//! }
//!
//! impl PayloadType for AccountCreated {
//!     const EVENT_TYPE: &'static str = "AccountCreated.v1";
//! }
//!
//! impl EventPayload for AccountCreated {
//!     fn event_type(&self) -> &'static str {
//!         Self::EVENT_TYPE
//!     }
//!
//!     fn stream_id(&self) -> StreamId {
//!         StreamId::new("Account", self.account_id.clone())
//!     }
//! }
//! ```

use crate::stream::{Position, StreamId};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error types for event payload operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize a payload to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize a payload from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// No payload type is registered for this event type tag.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The tag is already registered for a different payload type.
    #[error("Event type {0} is already registered for another payload type")]
    DuplicateEventType(String),
}

/// Upcast helper so trait objects can be downcast to their concrete type.
///
/// Implemented for every `'static` type; payloads and commands get it for free.
pub trait AsAny: Any {
    /// Borrow `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The data part of an event.
///
/// Payloads are immutable values. Every payload knows which stream it belongs
/// to and which event type tag identifies it.
///
/// # Thread Safety
///
/// Payloads are shared between the poll loop, every subscriber of a hot feed
/// and every projection cache, so they must be `Send + Sync`.
pub trait EventPayload: AsAny + fmt::Debug + Send + Sync {
    /// The stable event type tag (e.g. `"AccountCreated.v1"`).
    fn event_type(&self) -> &'static str;

    /// The stream this payload is appended to.
    fn stream_id(&self) -> StreamId;
}

/// A concrete, serializable payload type with a declared tag.
///
/// The declared tag must equal what [`EventPayload::event_type`] returns.
pub trait PayloadType: EventPayload + Serialize + DeserializeOwned + Sized {
    /// The tag this type is registered and stored under.
    const EVENT_TYPE: &'static str;
}

/// An event read back from the log.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Clone, Debug)]
pub struct Event {
    position: Position,
    timestamp: DateTime<Utc>,
    payload: Arc<dyn EventPayload>,
    is_first_of_stream: Option<bool>,
}

impl Event {
    /// Create an event as a driver does when it hands out a stored record.
    #[must_use]
    pub fn new(position: Position, timestamp: DateTime<Utc>, payload: Arc<dyn EventPayload>) -> Self {
        Self {
            position,
            timestamp,
            payload,
            is_first_of_stream: None,
        }
    }

    /// Attach the driver's "first event of its stream" hint.
    ///
    /// A projection cache uses a positive hint to skip the backfill read for
    /// a stream it has never seen.
    #[must_use]
    pub const fn with_first_of_stream_hint(mut self, is_first: bool) -> Self {
        self.is_first_of_stream = Some(is_first);
        self
    }

    /// The log-global position of this event.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// When the driver recorded this event.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The payload as a trait object.
    #[must_use]
    pub fn payload(&self) -> &Arc<dyn EventPayload> {
        &self.payload
    }

    /// The driver's first-of-stream hint, if it supplied one.
    #[must_use]
    pub const fn is_first_of_stream(&self) -> Option<bool> {
        self.is_first_of_stream
    }

    /// The stream the payload belongs to.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.payload.stream_id()
    }

    /// The payload's event type tag.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Borrow the payload as its concrete type, if it is a `T`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// if let Some(created) = event.payload_as::<AccountCreated>() {
    ///     println!("{} opened an account", created.owner);
    /// }
    /// ```
    #[must_use]
    pub fn payload_as<T: EventPayload>(&self) -> Option<&T> {
        let payload: &dyn EventPayload = self.payload.as_ref();
        payload.as_any().downcast_ref::<T>()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event {{ position: {}, type: {}, stream: {} }}",
            self.position,
            self.event_type(),
            self.stream_id()
        )
    }
}

/// A serialized payload ready for storage.
///
/// This is the boundary type between the runtime and a storage driver: the
/// event type tag plus the encoded bytes, with optional JSON metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedEvent {
    /// The event type tag (e.g. `"AccountCreated.v1"`).
    pub event_type: String,

    /// The encoded payload.
    pub data: Vec<u8>,

    /// Optional metadata (`correlation_id`, `causation_id`, ...).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventide_core::event::SerializedEvent;
    ///
    /// let event = SerializedEvent::new("AccountCreated.v1".to_string(), vec![1, 2, 3], None);
    /// assert_eq!(event.data.len(), 3);
    /// ```
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

/// A stored row as a driver keeps it: position, time, stream and bytes.
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    /// The position assigned at write time.
    pub position: Position,
    /// The write timestamp.
    pub timestamp: DateTime<Utc>,
    /// The stream the payload was appended to.
    pub stream_id: StreamId,
    /// Whether this was the first event of its stream.
    pub is_first_of_stream: bool,
    /// The encoded payload.
    pub event: SerializedEvent,
}
