//! Event streams with and without replay.
//!
//! Two primitives, picked per field:
//! - [`EventStream`] replays nothing; subscribers see only later emissions.
//! - [`LatestStream`] hands the last emitted value to every new subscriber
//!   before any later ones.

use std::sync::Arc;

use futures::{StreamExt, future, stream::BoxStream};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

/// Default buffer for live listeners.
const EVENT_CAPACITY: usize = 1024;

/// Plain event stream. Late subscribers get nothing from the past.
pub struct EventStream<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Create a new event stream.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Emit a value to current subscribers.
    pub fn emit(&self, value: T) {
        let _ = self.sender.send(value);
    }

    /// Subscribe to values emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|res| future::ready(res.ok()))
            .boxed()
    }

    /// Forward a stream into this one until it ends.
    pub fn spawn_forwarder<S>(self: Arc<Self>, stream: S) -> tokio::task::JoinHandle<()>
    where
        S: futures::Stream<Item = T> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::pin!(stream);

            while let Some(value) = stream.next().await {
                self.emit(value);
            }
        })
    }
}

/// Latest-value stream. New subscribers immediately receive the last value.
pub struct LatestStream<T> {
    sender: watch::Sender<Option<T>>,
}

impl<T: Clone + Send + Sync + 'static> Default for LatestStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> LatestStream<T> {
    /// Create an empty stream.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Create a stream that already holds `value`.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        let (sender, _) = watch::channel(Some(value));
        Self { sender }
    }

    /// Replace the latest value and notify subscribers.
    pub fn emit(&self, value: T) {
        self.sender.send_replace(Some(value));
    }

    /// The last emitted value.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.sender.borrow().clone()
    }

    /// Stream yielding the latest value (if any) and then every change.
    ///
    /// Rapid successive emissions may be coalesced into the newest one.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        WatchStream::new(self.sender.subscribe())
            .filter_map(future::ready)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn event_stream_does_not_replay() {
        let events = EventStream::new();
        events.emit(1);

        let mut sub = events.subscribe();
        events.emit(2);

        assert_eq!(sub.next().await, Some(2));
    }

    #[tokio::test]
    async fn latest_stream_replays_last_value() {
        let latest = LatestStream::new();
        latest.emit("first");
        latest.emit("second");

        let mut sub = latest.subscribe();
        assert_eq!(sub.next().await, Some("second"));

        latest.emit("third");
        assert_eq!(sub.next().await, Some("third"));
    }

    #[tokio::test]
    async fn empty_latest_stream_waits_for_first_value() {
        let latest: LatestStream<u32> = LatestStream::new();
        let mut sub = latest.subscribe();

        let nothing = tokio::time::timeout(Duration::from_millis(20), sub.next()).await;
        assert!(nothing.is_err());

        latest.emit(7);
        assert_eq!(sub.next().await, Some(7));
        assert_eq!(latest.latest(), Some(7));
    }

    #[tokio::test]
    async fn forwarder_relays_until_source_ends() {
        let events = Arc::new(EventStream::new());
        let mut sub = events.subscribe();

        let handle = Arc::clone(&events).spawn_forwarder(futures::stream::iter(vec![1, 2, 3]));
        handle.await.expect("forwarder finished");

        let received: Vec<i32> = sub.by_ref().take(3).collect().await;
        assert_eq!(received, vec![1, 2, 3]);
    }
}
