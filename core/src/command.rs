//! Commands, command handlers and processing outcomes.
//!
//! A [`Command`] is a request to change state. It carries a [`CommandId`]
//! assigned at creation that identifies it across the asynchronous
//! submission → completion boundary.
//!
//! A [`CommandHandler`] turns a command into events plus a business result
//! ([`Handled`]). The processor wraps that in a [`ProcessingResult`], which
//! additionally says whether the pipeline worked mechanically, and persists
//! the business part as a [`CommandProcessed`] event.

use crate::cancel::CancelToken;
use crate::event::{AsAny, EventPayload, PayloadType};
use crate::failure::{Failure, FunctionalResult};
use crate::stream::StreamId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Stream type of every [`CommandProcessed`] stream.
pub const COMMAND_PROCESSED_STREAM_TYPE: &str = "CommandProcessed";

/// Globally unique, opaque command identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A request to change state.
///
/// Implementors generate their [`CommandId`] once, in their constructor, and
/// return the same id forever after.
///
/// # Example
///
/// ```
/// use eventide_core::command::{Command, CommandId};
///
/// #[derive(Debug)]
/// struct CloseAccount {
///     id: CommandId,
///     account_id: String,
/// }
///
/// impl Command for CloseAccount {
///     fn command_id(&self) -> CommandId {
///         self.id
///     }
/// }
///
/// let command = CloseAccount { id: CommandId::new(), account_id: "A".into() };
/// assert_eq!(command.command_id(), command.command_id());
/// ```
pub trait Command: AsAny + fmt::Debug + Send + Sync {
    /// The id assigned at creation.
    fn command_id(&self) -> CommandId;

    /// A readable name for logs.
    fn command_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Error a handler returns (inside `anyhow::Error`) when it observed
/// cancellation and stopped.
///
/// The processor detects it by downcast and reports
/// [`ProcessingResult::Cancelled`] instead of a fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cancelled: {reason}")]
pub struct Cancelled {
    reason: String,
}

impl Cancelled {
    /// Create a cancellation with a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the operation stopped.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// What a handler produced: events to append and the business outcome.
#[derive(Clone, Debug)]
pub struct Handled {
    /// Events to append, in order.
    pub events: Vec<Arc<dyn EventPayload>>,
    /// The business outcome.
    pub result: FunctionalResult,
}

impl Handled {
    /// A successful outcome with the events to append.
    #[must_use]
    pub fn ok(events: Vec<Arc<dyn EventPayload>>, message: impl Into<String>) -> Self {
        Self {
            events,
            result: Ok(message.into()),
        }
    }

    /// A business failure; nothing is appended.
    #[must_use]
    pub fn failed(failure: Failure) -> Self {
        Self {
            events: Vec::new(),
            result: Err(failure),
        }
    }
}

/// Handles one concrete command type.
///
/// Handlers return `anyhow::Result`: an `Err` is a mechanical fault (or, when
/// it wraps [`Cancelled`], a cancellation), while business failures belong in
/// [`Handled::result`].
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    /// Execute `command`, observing `cancel` at every suspension point.
    fn handle(
        &self,
        command: &C,
        cancel: CancelToken,
    ) -> impl Future<Output = anyhow::Result<Handled>> + Send;
}

/// The outcome of processing one command. Produced exactly once per command.
#[derive(Clone, Debug)]
pub enum ProcessingResult {
    /// The handler ran to completion.
    Processed {
        /// The command.
        command_id: CommandId,
        /// Events the handler produced.
        events: Vec<Arc<dyn EventPayload>>,
        /// The business outcome.
        result: FunctionalResult,
    },
    /// No handler is registered for the command's type.
    Unhandled {
        /// The command.
        command_id: CommandId,
        /// Why it was not handled.
        reason: String,
    },
    /// The handler (or persisting its events) failed mechanically.
    Faulted {
        /// The command.
        command_id: CommandId,
        /// Rendered error.
        error: String,
    },
    /// Processing was cancelled.
    Cancelled {
        /// The command.
        command_id: CommandId,
        /// Why it stopped.
        reason: String,
    },
}

impl ProcessingResult {
    /// The originating command.
    #[must_use]
    pub const fn command_id(&self) -> CommandId {
        match self {
            Self::Processed { command_id, .. }
            | Self::Unhandled { command_id, .. }
            | Self::Faulted { command_id, .. }
            | Self::Cancelled { command_id, .. } => *command_id,
        }
    }

    /// The business outcome as it is persisted in [`CommandProcessed`].
    ///
    /// Mechanical outcomes map to failures: `Unhandled` and `Faulted` become
    /// [`Failure::Internal`], `Cancelled` becomes [`Failure::Cancelled`].
    #[must_use]
    pub fn to_operation_result(&self) -> FunctionalResult {
        match self {
            Self::Processed { result, .. } => result.clone(),
            Self::Unhandled { reason, .. } => Err(Failure::internal(format!("Unhandled: {reason}"))),
            Self::Faulted { error, .. } => Err(Failure::internal(format!("Faulted: {error}"))),
            Self::Cancelled { reason, .. } => Err(Failure::cancelled(reason.clone())),
        }
    }

    /// Short variant name for logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Unhandled { .. } => "unhandled",
            Self::Faulted { .. } => "faulted",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// The persisted outcome of a command.
///
/// Written once per command to the stream `CommandProcessed/<command id>` so
/// outcomes are replayable and observers can correlate by [`CommandId`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProcessed {
    /// The command this records.
    pub command_id: CommandId,
    /// The business outcome.
    pub result: FunctionalResult,
}

impl CommandProcessed {
    /// Record the outcome of `result`.
    #[must_use]
    pub fn from_result(result: &ProcessingResult) -> Self {
        Self {
            command_id: result.command_id(),
            result: result.to_operation_result(),
        }
    }
}

impl PayloadType for CommandProcessed {
    const EVENT_TYPE: &'static str = "CommandProcessed";
}

impl EventPayload for CommandProcessed {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn stream_id(&self) -> StreamId {
        StreamId::new(COMMAND_PROCESSED_STREAM_TYPE, self.command_id.to_string())
    }
}
