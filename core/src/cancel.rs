//! Cooperative cancellation.
//!
//! A [`CancelSource`] owns the cancelled flag; any number of [`CancelToken`]s
//! observe it. Every suspension point of the runtime takes a token and ends
//! promptly once it fires.
//!
//! ```
//! use eventide_core::cancel::CancelSource;
//!
//! let source = CancelSource::new();
//! let token = source.token();
//! assert!(!token.is_cancelled());
//!
//! source.cancel();
//! assert!(token.is_cancelled());
//! ```

use tokio::sync::watch;

/// Owner side of a cancellation flag.
///
/// Dropping the source does not cancel its tokens.
#[derive(Debug)]
pub struct CancelSource {
    sender: watch::Sender<bool>,
}

impl CancelSource {
    /// Create a source in the "not cancelled" state.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Fire the flag. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// A token observing this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: Some(self.sender.subscribe()),
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation flag. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    #[must_use]
    pub const fn none() -> Self {
        Self { receiver: None }
    }

    /// Whether the flag has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once the flag fires.
    ///
    /// Stays pending forever if the source is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.receiver else {
            return std::future::pending().await;
        };
        let mut receiver = receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::none()
    }
}
