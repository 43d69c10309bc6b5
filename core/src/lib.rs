//! # Eventide Core
//!
//! Core types and driver traits for the Eventide event-sourcing runtime.
//!
//! This crate is the shared vocabulary of the runtime. It has no policy of its
//! own: the poll loop, command pipeline and projection caches live in
//! `eventide-runtime`.
//!
//! ## Core Concepts
//!
//! - **Event**: an immutable fact at a log-global [`Position`](stream::Position)
//! - **`EventPayload`**: the data of an event, tagged with a stable event type
//!   and the [`StreamId`](stream::StreamId) it belongs to
//! - **Command**: a request to change state, identified by a
//!   [`CommandId`](command::CommandId)
//! - **`ProcessingResult`**: what happened to a command, mechanically
//! - **Failure**: what went wrong, in business terms
//! - **`CommandProcessed`**: the persisted outcome of a command
//!
//! ## Drivers
//!
//! Storage is injected through [`EventReader`](event_store::EventReader) and
//! [`EventWriter`](event_store::EventWriter). Drivers that keep bytes decode
//! them through a [`PayloadRegistry`](registry::PayloadRegistry).

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod cancel;
pub mod command;
pub mod event;
pub mod event_store;
pub mod failure;
pub mod registry;
pub mod stream;

/// Environment module - injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Drivers stamp events with `now()` at write time.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventide_core::environment::{Clock, SystemClock};
    ///
    /// let before = chrono::Utc::now();
    /// assert!(SystemClock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Convenience re-exports.
pub mod prelude {
    pub use crate::cancel::{CancelSource, CancelToken};
    pub use crate::command::{
        Cancelled, Command, CommandHandler, CommandId, CommandProcessed, Handled,
        ProcessingResult,
    };
    pub use crate::environment::{Clock, SystemClock};
    pub use crate::event::{Event, EventError, EventPayload, PayloadType};
    pub use crate::event_store::{EventReader, EventStoreError, EventWriter, ReadFailure};
    pub use crate::failure::{Failure, FunctionalResult, OperationResult};
    pub use crate::registry::{EventSerializer, PayloadRegistry};
    pub use crate::stream::{Position, StreamId, StreamType};
}
