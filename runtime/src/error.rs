//! Error types for the runtime.

use eventide_core::command::{Cancelled, CommandId};
use eventide_core::event_store::{EventStoreError, ReadFailure};
use thiserror::Error;

/// Errors that can occur in runtime operations.
///
/// Business failures never show up here; they travel as
/// [`Failure`](eventide_core::failure::Failure) inside command outcomes.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The outcome feed ended before the command's outcome was observed.
    ///
    /// Returned by `submit_and_await` when the feed it correlates on was
    /// dropped or closed.
    #[error("Outcome feed closed before command {0} completed")]
    OutcomeFeedClosed(CommandId),

    /// The operation observed its cancel token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// Reading the log failed.
    #[error("Read failed: {0}")]
    Read(#[from] ReadFailure),

    /// Writing to the log failed.
    #[error("Write failed: {0}")]
    Write(#[from] EventStoreError),

    /// A spawned task panicked or was aborted.
    #[error("Task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
