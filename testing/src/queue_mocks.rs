//! In-memory ticket queue.
//!
//! Provides [`InMemoryTicketQueue`], a channel-backed [`TicketQueue`] that
//! records acknowledgments and can simulate an unavailable broker.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use ticket_ingest_core::queue::{Acknowledger, Delivery, DeliveryStream, QueueFuture, TicketQueue};
use ticket_ingest_core::QueueError;
use tokio::sync::mpsc;

#[derive(Default)]
struct QueueState {
    /// Open queues: the sender plus the receiver until someone subscribes.
    queues: HashMap<String, Channel>,
    /// Number of upcoming `subscribe` calls that fail as unavailable.
    subscribe_failures: usize,
    /// Number of upcoming `subscribe` calls whose stream ends at once.
    ended_subscriptions: usize,
    /// Total subscribe attempts, successful or not.
    subscribe_attempts: usize,
}

struct Channel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct AckLog {
    acked: Mutex<Vec<Vec<u8>>>,
    fail: Mutex<bool>,
}

/// In-memory queue for fast, deterministic tests.
///
/// Each named queue supports a single subscriber. Messages published before
/// the subscription are buffered. [`close`](Self::close) simulates a broker
/// disconnect: the subscriber drains what was already delivered and its stream
/// ends; the next publish or subscribe opens a fresh queue.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use ticket_ingest_core::TicketQueue;
/// use ticket_ingest_testing::InMemoryTicketQueue;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryTicketQueue::new();
/// queue.publish("tickets_queue", b"OrderId: A1").await?;
///
/// let mut deliveries = queue.subscribe("tickets_queue").await?;
/// let delivery = deliveries.next().await.unwrap()?;
/// assert_eq!(delivery.body(), b"OrderId: A1");
/// delivery.ack().await?;
/// assert_eq!(queue.ack_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTicketQueue {
    state: Arc<Mutex<QueueState>>,
    acks: Arc<AckLog>,
}

impl InMemoryTicketQueue {
    /// Create a new empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` subscribe calls fail with [`QueueError::Unavailable`].
    pub fn fail_next_subscriptions(&self, count: usize) {
        self.state.lock().unwrap().subscribe_failures = count;
    }

    /// Make the next `count` subscribe calls succeed with an already ended stream.
    pub fn end_next_subscriptions(&self, count: usize) {
        self.state.lock().unwrap().ended_subscriptions = count;
    }

    /// Number of subscribe calls made so far.
    #[must_use]
    pub fn subscribe_attempts(&self) -> usize {
        self.state.lock().unwrap().subscribe_attempts
    }

    /// Close `queue`, ending the current subscriber's stream once drained.
    pub fn close(&self, queue: &str) {
        self.state.lock().unwrap().queues.remove(queue);
    }

    /// Make every subsequent acknowledgment fail (or succeed again).
    pub fn fail_acks(&self, fail: bool) {
        *self.acks.fail.lock().unwrap() = fail;
    }

    /// Bodies acknowledged so far, in acknowledgment order.
    #[must_use]
    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.acks.acked.lock().unwrap().clone()
    }

    /// Number of successful acknowledgments.
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.acks.acked.lock().unwrap().len()
    }
}

impl TicketQueue for InMemoryTicketQueue {
    fn publish<'a>(&'a self, queue: &'a str, body: &'a [u8]) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let channel = state
                .queues
                .entry(queue.to_string())
                .or_insert_with(Channel::new);

            channel.tx.send(body.to_vec()).map_err(|e| QueueError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn subscribe<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, DeliveryStream> {
        Box::pin(async move {
            let rx = {
                let mut state = self.state.lock().unwrap();
                state.subscribe_attempts += 1;

                if state.subscribe_failures > 0 {
                    state.subscribe_failures -= 1;
                    return Err(QueueError::Unavailable("simulated broker outage".to_string()));
                }

                if state.ended_subscriptions > 0 {
                    state.ended_subscriptions -= 1;
                    return Ok(futures::stream::empty().boxed());
                }

                let channel = state
                    .queues
                    .entry(queue.to_string())
                    .or_insert_with(Channel::new);

                channel.rx.take().ok_or_else(|| QueueError::Subscription {
                    queue: queue.to_string(),
                    reason: "queue already has a subscriber".to_string(),
                })?
            };

            let acks = Arc::clone(&self.acks);
            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(body) = rx.recv().await {
                    let acker = InMemoryAck {
                        body: body.clone(),
                        log: Arc::clone(&acks),
                    };
                    yield Ok(Delivery::new(body, Box::new(acker)));
                }
            };

            Ok(stream.boxed())
        })
    }
}

struct InMemoryAck {
    body: Vec<u8>,
    log: Arc<AckLog>,
}

impl Acknowledger for InMemoryAck {
    fn ack(&self) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            if *self.log.fail.lock().unwrap() {
                return Err(QueueError::Ack("simulated ack failure".to_string()));
            }
            self.log.acked.lock().unwrap().push(self.body.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffers_messages_published_before_subscribe() {
        let queue = InMemoryTicketQueue::new();
        queue.publish("q", b"one").await.unwrap();
        queue.publish("q", b"two").await.unwrap();

        let mut stream = queue.subscribe("q").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();

        assert_eq!(first.body(), b"one");
        assert_eq!(second.body(), b"two");
        assert_eq!(queue.ack_count(), 0);
    }

    #[tokio::test]
    async fn close_ends_the_stream_after_draining() {
        let queue = InMemoryTicketQueue::new();
        let mut stream = queue.subscribe("q").await.unwrap();
        queue.publish("q", b"last").await.unwrap();
        queue.close("q");

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let queue = InMemoryTicketQueue::new();
        let _stream = queue.subscribe("q").await.unwrap();

        let result = queue.subscribe("q").await;
        assert!(matches!(result, Err(QueueError::Subscription { .. })));
    }

    #[tokio::test]
    async fn simulated_outage_fails_subscriptions() {
        let queue = InMemoryTicketQueue::new();
        queue.fail_next_subscriptions(1);

        assert!(matches!(
            queue.subscribe("q").await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(queue.subscribe("q").await.is_ok());
        assert_eq!(queue.subscribe_attempts(), 2);
    }

    #[tokio::test]
    async fn failed_acks_are_not_recorded() {
        let queue = InMemoryTicketQueue::new();
        queue.publish("q", b"body").await.unwrap();
        queue.fail_acks(true);

        let mut stream = queue.subscribe("q").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        assert!(matches!(delivery.ack().await, Err(QueueError::Ack(_))));
        assert_eq!(queue.ack_count(), 0);
    }
}
