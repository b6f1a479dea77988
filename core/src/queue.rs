//! Queue abstraction consumed by the ingestion pipeline.
//!
//! The pipeline sees the broker through two operations: publish an opaque
//! ticket body onto a named durable queue, and subscribe to that queue as a
//! lazy stream of [`Delivery`] values. Each delivery carries its own
//! acknowledgment handle; the broker does not requeue on failure.
//!
//! # Implementations
//!
//! - `RedpandaTicketQueue` (in `ticket-ingest-redpanda`): production, Kafka-compatible
//! - `InMemoryTicketQueue` (in `ticket-ingest-testing`): fast, deterministic tests
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! queue.publish(TICKETS_QUEUE, raw.as_bytes()).await?;
//!
//! let mut deliveries = queue.subscribe(TICKETS_QUEUE).await?;
//! while let Some(Ok(delivery)) = deliveries.next().await {
//!     handle(delivery.body()).await;
//!     delivery.ack().await?;
//! }
//! ```

use crate::error::QueueError;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Name of the durable queue tickets are published to.
pub const TICKETS_QUEUE: &str = "tickets_queue";

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Stream of deliveries from a subscription.
///
/// Items are `Err` when the broker reports a transport problem for a single
/// receive; the stream itself ends when the subscription is closed.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Acknowledges one delivery back to the broker.
///
/// Implementations must be safe to call concurrently from many processing
/// tasks, or serialize internally.
pub trait Acknowledger: Send + Sync {
    /// Confirm the delivery as consumed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Ack`] if the broker rejects the acknowledgment.
    fn ack(&self) -> QueueFuture<'_, ()>;
}

/// A message received from the queue.
pub struct Delivery {
    body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery from its payload and acknowledgment handle.
    #[must_use]
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { body, acker }
    }

    /// The opaque message payload.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Acknowledge the delivery, consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Ack`] if the broker rejects the acknowledgment.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Broker operations needed by the pipeline.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the queue can be shared as
/// `Arc<dyn TicketQueue>` between the entry point and the enqueue side.
pub trait TicketQueue: Send + Sync {
    /// Publish a raw ticket body onto `queue`, unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Publish`] if the broker rejects the message, or
    /// [`QueueError::Unavailable`] if it cannot be reached.
    fn publish<'a>(&'a self, queue: &'a str, body: &'a [u8]) -> QueueFuture<'a, ()>;

    /// Subscribe to the durable queue `queue`.
    ///
    /// Deliveries are not acknowledged automatically.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Subscription`] or [`QueueError::Unavailable`] if
    /// the subscription cannot be established.
    fn subscribe<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, DeliveryStream>;
}
