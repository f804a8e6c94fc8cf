//! Ordered multicast of state values with replay of the latest value.
//!
//! A [`StatusPublisher`] keeps the current value plus an ordered list of
//! subscribers. A new subscriber first receives the current value, then every
//! published value in publish order. Nothing is coalesced: the only filtering
//! is the explicit duplicate check of [`StatusPublisher::publish_if_changed`].

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

struct PublisherState<T> {
    current: T,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

pub struct StatusPublisher<T>
where
    T: Clone + Send + 'static,
{
    state: Mutex<PublisherState<T>>,
}

impl<T> StatusPublisher<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            state: Mutex::new(PublisherState {
                current: initial,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn current(&self) -> T {
        self.state.lock().current.clone()
    }

    /// Stores `value` and delivers it to every live subscriber.
    pub fn publish(&self, value: T) {
        let mut state = self.state.lock();
        state.current = value.clone();
        deliver(&mut state.subscribers, &value);
    }

    /// Subscribes, replaying the current value first.
    pub fn subscribe(&self) -> StatusStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        // The receiver is alive, so the replay cannot fail.
        let _ = tx.send(state.current.clone());
        state.subscribers.push(tx);
        StatusStream { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl<T> StatusPublisher<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Publishes only when `value` differs from the current value. Returns
    /// whether anything was delivered.
    pub fn publish_if_changed(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.current == value {
            return false;
        }
        state.current = value.clone();
        deliver(&mut state.subscribers, &value);
        true
    }
}

fn deliver<T: Clone>(subscribers: &mut Vec<mpsc::UnboundedSender<T>>, value: &T) {
    let before = subscribers.len();
    subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    let dropped = before - subscribers.len();
    if dropped > 0 {
        trace!(dropped, "pruned closed status subscribers");
    }
}

/// Receiving half of a [`StatusPublisher`] subscription.
///
/// Ends once the publisher is dropped and all buffered values were read.
pub struct StatusStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> StatusStream<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next buffered value without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for StatusStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_current_then_live_updates_in_order() {
        let publisher = StatusPublisher::new("pending");
        publisher.publish("validating");

        let mut stream = publisher.subscribe();
        publisher.publish("valid");
        publisher.publish("valid");

        assert_eq!(stream.recv().await, Some("validating"));
        assert_eq!(stream.recv().await, Some("valid"));
        assert_eq!(stream.recv().await, Some("valid"));
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn publish_if_changed_suppresses_duplicates() {
        let publisher = StatusPublisher::new(1);
        let stream = publisher.subscribe();

        assert!(!publisher.publish_if_changed(1));
        assert!(publisher.publish_if_changed(2));
        assert!(!publisher.publish_if_changed(2));
        drop(publisher);

        let seen: Vec<i32> = stream.collect().await;
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let publisher = StatusPublisher::new(0u8);
        let first = publisher.subscribe();
        let _second = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        drop(first);
        publisher.publish(1);
        assert_eq!(publisher.subscriber_count(), 1);
    }
}
