//! Lossless fan-out to any number of subscribers.
//!
//! A [`Broadcaster`] delivers every published item to every live
//! [`Subscription`], in publish order. Unlike `tokio::sync::broadcast`, a slow
//! subscriber never lags and loses items: each subscription owns an unbounded
//! queue. Subscriptions that were dropped are pruned on the next publish.

use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Publisher side of a hot feed.
pub struct Broadcaster<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Broadcaster<T> {
    /// A broadcaster with no subscribers.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber. It sees every item published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        Subscription { receiver }
    }

    /// Deliver `item` to every live subscriber; returns how many received it.
    pub fn publish(&self, item: &T) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|sender| sender.send(item.clone()).is_ok());
        senders.len()
    }

    /// Number of subscribers that were live at the last publish or subscribe.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|sender| !sender.is_closed());
        senders.len()
    }

    /// End every current subscription after it drains what it already has.
    pub fn close(&self) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Broadcaster")
            .field("subscribers", &count)
            .finish()
    }
}

/// Subscriber side of a hot feed.
///
/// Usable directly through [`recv`](Self::recv) or as a [`Stream`]. Ends when
/// the broadcaster is closed or dropped.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next item; `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// The next item if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}
