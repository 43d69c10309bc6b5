//! # Eventide Runtime
//!
//! The concurrency and consistency engine of the Eventide event-sourcing
//! runtime.
//!
//! ## Core Components
//!
//! - **`WakeUp`**: adaptive sleep between polls, cut short by "more work"
//!   signals
//! - **`PollEngine`**: turns a read-from-cursor function into an ordered
//!   stream, with pluggable retry/skip strategies
//! - **`EventStream`**: one pull of the log fanned out to any number of
//!   subscribers
//! - **`CommandStream`** and **`CommandProcessor`**: serialized submission,
//!   isolated execution and persisted, correlatable outcomes
//! - **`ProjectionCache`**: read models derived from the log, consistent
//!   under concurrent reads and live updates
//!
//! ## Example
//!
//! ```ignore
//! use eventide_runtime::prelude::*;
//!
//! let config = RuntimeConfig::default();
//! let events = Arc::new(EventStream::new(Arc::new(PollingSource::from_config(
//!     store.clone(),
//!     &config,
//! ))));
//!
//! let accounts = Arc::new(ProjectionCache::new(AccountProjector, store.clone()));
//! accounts.attach(&events);
//! events.start();
//!
//! let processor = Arc::new(
//!     CommandProcessor::new(handlers, store.clone(), &config)
//!         .with_outcome_reader(store.clone())
//!         .with_notifier(events.notifier()),
//! );
//! let commands = Arc::new(CommandStream::new());
//! tokio::spawn(Arc::clone(&processor).run(commands.subscribe(), CancelToken::none()));
//!
//! let outcome = commands.submit_and_await(command, accounts.as_ref()).await?;
//! ```

/// Command submission and outcome correlation
pub mod command_stream;

/// Runtime configuration
pub mod config;

/// Error types for runtime operations
pub mod error;

/// The hot event feed and its sources
pub mod event_stream;

/// Lossless multi-subscriber fan-out
pub mod fanout;

/// Prometheus metrics for observability
pub mod metrics;

/// The generic poll loop
pub mod poll;

/// Command dispatch and execution
pub mod processor;

/// Read-model caches
pub mod projection_cache;

/// Retry logic with exponential backoff
pub mod retry;

/// Adaptive wake-up between polls
pub mod wake_up;

/// Convenience re-exports.
pub mod prelude {
    pub use crate::command_stream::{CommandStream, ProcessedFeed};
    pub use crate::config::RuntimeConfig;
    pub use crate::error::RuntimeError;
    pub use crate::event_stream::{
        EventSource, EventStream, PollingSource, PushSender, PushSource, ReplayThenLiveSource,
    };
    pub use crate::fanout::{Broadcaster, Subscription};
    pub use crate::poll::{CursorStrategy, PollEngine, RetryForever, RetryThenSkip};
    pub use crate::processor::{CommandProcessor, HandlerRegistry};
    pub use crate::projection_cache::{
        ApplyOutcome, Bounded, CacheCollection, ItemChanged, ProjectionCache, Projector, Unbounded,
    };
    pub use crate::retry::{RetryPolicy, retry_with_backoff};
    pub use crate::wake_up::{WakeReason, WakeUp, WakeUpConfig, WakeUpNotifier};
    pub use eventide_core::prelude::*;
}
