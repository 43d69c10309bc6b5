//! Payload registry: event type tag ↔ concrete payload type.
//!
//! The registry is built explicitly at startup and passed by reference to
//! whatever needs to turn stored bytes back into payloads (drivers, replay).
//! Payloads are encoded with `bincode`.
//!
//! ```
//! use eventide_core::event::{EventPayload, PayloadType};
//! use eventide_core::registry::{EventSerializer, PayloadRegistry};
//! use eventide_core::stream::StreamId;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! struct Opened { id: String }
//!
//! impl PayloadType for Opened {
//!     const EVENT_TYPE: &'static str = "Opened.v1";
//! }
//!
//! impl EventPayload for Opened {
//!     fn event_type(&self) -> &'static str { Self::EVENT_TYPE }
//!     fn stream_id(&self) -> StreamId { StreamId::new("Account", self.id.clone()) }
//! }
//!
//! # fn main() -> Result<(), eventide_core::event::EventError> {
//! let mut registry = PayloadRegistry::new();
//! registry.register::<Opened>()?;
//!
//! let stored = registry.serialize(&Opened { id: "A".into() })?;
//! let payload = registry.deserialize(&stored)?;
//! assert_eq!(payload.event_type(), "Opened.v1");
//! # Ok(())
//! # }
//! ```

use crate::command::CommandProcessed;
use crate::event::{EventError, EventPayload, PayloadType, SerializedEvent};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type SerializeFn = Box<dyn Fn(&dyn EventPayload) -> Result<Vec<u8>, EventError> + Send + Sync>;
type DeserializeFn = Box<dyn Fn(&[u8]) -> Result<Arc<dyn EventPayload>, EventError> + Send + Sync>;

/// Turns payloads into stored bytes and back.
pub trait EventSerializer: Send + Sync {
    /// Encode a payload under its event type tag.
    ///
    /// # Errors
    ///
    /// [`EventError::UnknownEventType`] if the tag is not known, or
    /// [`EventError::SerializationError`] if encoding fails.
    fn serialize(&self, payload: &dyn EventPayload) -> Result<SerializedEvent, EventError>;

    /// Decode stored bytes into the payload type registered for their tag.
    ///
    /// # Errors
    ///
    /// [`EventError::UnknownEventType`] if the tag is not known, or
    /// [`EventError::DeserializationError`] if the bytes are malformed.
    fn deserialize(&self, event: &SerializedEvent) -> Result<Arc<dyn EventPayload>, EventError>;
}

struct Entry {
    type_id: TypeId,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

/// Explicit map from event type tags to payload codecs.
///
/// [`CommandProcessed`] is registered by [`PayloadRegistry::new`].
pub struct PayloadRegistry {
    entries: HashMap<&'static str, Entry>,
}

impl PayloadRegistry {
    /// A registry that knows [`CommandProcessed`].
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        registry.insert::<CommandProcessed>();
        registry
    }

    /// Register payload type `T` under [`PayloadType::EVENT_TYPE`].
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`EventError::DuplicateEventType`] if the tag is already taken by a
    /// different type.
    pub fn register<T: PayloadType>(&mut self) -> Result<&mut Self, EventError> {
        match self.entries.get(T::EVENT_TYPE) {
            Some(entry) if entry.type_id == TypeId::of::<T>() => Ok(self),
            Some(_) => Err(EventError::DuplicateEventType(T::EVENT_TYPE.to_string())),
            None => {
                self.insert::<T>();
                Ok(self)
            }
        }
    }

    /// Whether a codec is registered for `event_type`.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.entries.keys().copied().collect();
        types.sort_unstable();
        types
    }

    fn insert<T: PayloadType>(&mut self) {
        let serialize: SerializeFn = Box::new(|payload| {
            let payload = payload.as_any().downcast_ref::<T>().ok_or_else(|| {
                EventError::SerializationError(format!(
                    "payload tagged {} is not a {}",
                    payload.event_type(),
                    std::any::type_name::<T>()
                ))
            })?;
            bincode::serialize(payload).map_err(|e| EventError::SerializationError(e.to_string()))
        });
        let deserialize: DeserializeFn = Box::new(|bytes| {
            let payload: T = bincode::deserialize(bytes)
                .map_err(|e| EventError::DeserializationError(e.to_string()))?;
            Ok(Arc::new(payload))
        });
        self.entries.insert(
            T::EVENT_TYPE,
            Entry {
                type_id: TypeId::of::<T>(),
                serialize,
                deserialize,
            },
        );
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

impl EventSerializer for PayloadRegistry {
    fn serialize(&self, payload: &dyn EventPayload) -> Result<SerializedEvent, EventError> {
        let event_type = payload.event_type();
        let entry = self
            .entries
            .get(event_type)
            .ok_or_else(|| EventError::UnknownEventType(event_type.to_string()))?;
        let data = (entry.serialize)(payload)?;
        Ok(SerializedEvent::new(event_type.to_string(), data, None))
    }

    fn deserialize(&self, event: &SerializedEvent) -> Result<Arc<dyn EventPayload>, EventError> {
        let entry = self
            .entries
            .get(event.event_type.as_str())
            .ok_or_else(|| EventError::UnknownEventType(event.event_type.clone()))?;
        (entry.deserialize)(&event.data)
    }
}
