//! Command submission.
//!
//! A [`CommandStream`] is the single entry point for commands. Submissions
//! are serialized by a publish lock, so every subscriber observes the same
//! total order, consistent with the order in which `submit` calls completed.
//!
//! # Correlation
//!
//! [`CommandStream::submit_and_await`] subscribes to a [`ProcessedFeed`]
//! *before* submitting, then waits for the `CommandProcessed` carrying the
//! command's id. It has no built-in timeout; callers bound it with a cancel
//! token or their own timeout.

use crate::error::RuntimeError;
use crate::fanout::{Broadcaster, Subscription};
use crate::metrics::CommandMetrics;
use eventide_core::cancel::CancelToken;
use eventide_core::command::{Cancelled, Command, CommandProcessed};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

/// A feed of persisted command outcomes to correlate on.
///
/// Implemented by the projection cache (outcomes observed through the log)
/// and by the command processor (outcomes as they are produced in-process).
pub trait ProcessedFeed: Send + Sync {
    /// Receive every outcome observed from now on.
    fn subscribe_processed(&self) -> Subscription<CommandProcessed>;
}

/// Serialized, multi-subscriber command submission.
#[derive(Debug, Default)]
pub struct CommandStream {
    publish_lock: Mutex<()>,
    broadcaster: Broadcaster<Arc<dyn Command>>,
}

impl CommandStream {
    /// Create a stream with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `command` to every subscriber.
    ///
    /// Returns once the command is enqueued for all current subscribers.
    #[tracing::instrument(skip_all, fields(command_id = %command.command_id(), command_type = command.command_type()))]
    pub async fn submit(&self, command: Arc<dyn Command>) {
        let _guard = self.publish_lock.lock().await;
        let delivered = self.broadcaster.publish(&command);
        CommandMetrics::record_submitted();
        if delivered == 0 {
            tracing::warn!("Command submitted with no subscribers");
        } else {
            tracing::debug!(subscribers = delivered, "Command submitted");
        }
    }

    /// Submit each command in turn.
    ///
    /// Each submission takes the publish lock on its own, so commands from
    /// concurrent callers may interleave with these.
    pub async fn submit_many<I>(&self, commands: I)
    where
        I: IntoIterator<Item = Arc<dyn Command>>,
    {
        for command in commands {
            self.submit(command).await;
        }
    }

    /// Receive every command submitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<Arc<dyn Command>> {
        self.broadcaster.subscribe()
    }

    /// Submit `command` and wait for its outcome on `feed`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::OutcomeFeedClosed`] if the feed ends first.
    pub async fn submit_and_await<F>(
        &self,
        command: Arc<dyn Command>,
        feed: &F,
    ) -> Result<CommandProcessed, RuntimeError>
    where
        F: ProcessedFeed + ?Sized,
    {
        self.submit_and_await_cancellable(command, feed, &CancelToken::none())
            .await
    }

    /// [`submit_and_await`](Self::submit_and_await), giving up when `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::OutcomeFeedClosed`] if the feed ends first, or
    /// [`RuntimeError::Cancelled`] if `cancel` fires first.
    pub async fn submit_and_await_cancellable<F>(
        &self,
        command: Arc<dyn Command>,
        feed: &F,
        cancel: &CancelToken,
    ) -> Result<CommandProcessed, RuntimeError>
    where
        F: ProcessedFeed + ?Sized,
    {
        let command_id = command.command_id();

        // Subscribe BEFORE submitting so the outcome cannot be missed
        let mut outcomes = feed.subscribe_processed();
        self.submit(command).await;

        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(Cancelled::new(format!("stopped waiting for command {command_id}")).into());
                }
                outcome = outcomes.recv() => outcome,
            };
            match outcome {
                Some(processed) if processed.command_id == command_id => return Ok(processed),
                Some(_) => {}
                None => return Err(RuntimeError::OutcomeFeedClosed(command_id)),
            }
        }
    }

    /// Blocking form of [`submit_and_await`](Self::submit_and_await) for
    /// synchronous call sites.
    ///
    /// The work runs on `handle`; the calling thread blocks until it is done.
    /// Do not call this from a thread that drives `handle`.
    ///
    /// # Errors
    ///
    /// As [`submit_and_await`](Self::submit_and_await), or
    /// [`RuntimeError::TaskJoin`] if the spawned task failed.
    pub fn submit_and_await_blocking(
        self: &Arc<Self>,
        handle: &Handle,
        command: Arc<dyn Command>,
        feed: Arc<dyn ProcessedFeed>,
    ) -> Result<CommandProcessed, RuntimeError> {
        let command_id = command.command_id();
        let this = Arc::clone(self);
        let (sender, receiver) = std::sync::mpsc::channel();

        let task = handle.spawn(async move {
            let outcome = this.submit_and_await(command, feed.as_ref()).await;
            let _ = sender.send(outcome);
        });

        match receiver.recv() {
            Ok(outcome) => outcome,
            Err(_) => {
                // The task ended without reporting; surface why.
                match handle.block_on(task) {
                    Err(join_error) => Err(RuntimeError::TaskJoin(join_error)),
                    Ok(()) => Err(RuntimeError::OutcomeFeedClosed(command_id)),
                }
            }
        }
    }
}
