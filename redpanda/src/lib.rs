//! Redpanda ticket queue for the ticket ingestion pipeline.
//!
//! This crate provides [`RedpandaTicketQueue`], which implements the
//! [`TicketQueue`] trait from `ticket-ingest-core` on top of rdkafka. Any
//! Kafka-compatible broker works (Redpanda, Apache Kafka, MSK).
//!
//! # Delivery Semantics
//!
//! The queue name is a topic. Offsets are never committed automatically:
//! acknowledging a [`Delivery`] commits the offset after that message for its
//! partition. Messages admitted but not yet acknowledged when the process
//! dies are redelivered.
//!
//! Consumer tasks finish out of order. A commit never moves a partition's
//! committed offset backwards, so after a crash a message that was still in
//! flight behind an acknowledged successor is not redelivered.
//!
//! **Configuration options**:
//! - `consumer_group`: consumer group shared by all ingestion instances
//! - `buffer_size`: messages fetched ahead of the consumer pool (default: 64)
//! - `auto_offset_reset`: where a new group starts reading (default: "earliest")
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use ticket_ingest_core::TicketQueue;
//! use ticket_ingest_redpanda::RedpandaTicketQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaTicketQueue::new("localhost:9092")?;
//!
//! queue.publish("tickets_queue", b"OrderId: A1\nVAT: 0\nTotal: 0\n\nproduct").await?;
//!
//! let mut deliveries = queue.subscribe("tickets_queue").await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     println!("received {} bytes", delivery.body().len());
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use futures::{Stream, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use ticket_ingest_core::queue::{Acknowledger, Delivery, DeliveryStream, QueueFuture, TicketQueue};
use ticket_ingest_core::QueueError;
use tokio::sync::{Mutex, mpsc};

/// Highest offset committed so far, per partition.
type CommitWatermarks = Arc<Mutex<HashMap<i32, i64>>>;

/// Redpanda-backed ticket queue.
///
/// Holds one producer for [`publish`](TicketQueue::publish); every
/// [`subscribe`](TicketQueue::subscribe) call creates its own consumer in the
/// configured consumer group.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use ticket_ingest_redpanda::RedpandaTicketQueue;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = RedpandaTicketQueue::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("ticket-ingest")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaTicketQueue {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: String,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaTicketQueue {
    /// Create a queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, QueueError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedpandaTicketQueueBuilder {
        RedpandaTicketQueueBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used by subscriptions.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    fn create_consumer(&self, queue: &str) -> Result<StreamConsumer, QueueError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| QueueError::Subscription {
                queue: queue.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })
    }
}

/// Builder for [`RedpandaTicketQueue`].
#[derive(Default)]
pub struct RedpandaTicketQueueBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaTicketQueueBuilder {
    /// Set the comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the publish timeout and the broker probe timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group id.
    ///
    /// Default: "ticket-ingest"
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many messages may be fetched ahead of the consumer.
    ///
    /// Zero is raised to one. Default: 64
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where a consumer group without committed offsets starts reading:
    /// "earliest", "latest" or "error".
    ///
    /// Default: "earliest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaTicketQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaTicketQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::Unavailable("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .create()
            .map_err(|e| QueueError::Unavailable(format!("Failed to create producer: {e}")))?;

        let queue = RedpandaTicketQueue {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group.unwrap_or_else(|| "ticket-ingest".to_string()),
            buffer_size: self.buffer_size.unwrap_or(64),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %queue.brokers,
            acks = %acks,
            consumer_group = %queue.consumer_group,
            buffer_size = queue.buffer_size,
            auto_offset_reset = %queue.auto_offset_reset,
            "RedpandaTicketQueue created"
        );

        Ok(queue)
    }
}

impl TicketQueue for RedpandaTicketQueue {
    fn publish<'a>(&'a self, queue: &'a str, body: &'a [u8]) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let record = FutureRecord::<(), [u8]>::to(queue).payload(body);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(queue, partition, offset, "Ticket published");
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(queue, error = %kafka_error, "Failed to publish ticket");
                    Err(QueueError::Publish {
                        queue: queue.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, DeliveryStream> {
        Box::pin(async move {
            let consumer = Arc::new(self.create_consumer(queue)?);

            // Probe the broker so an outage surfaces as a retryable error.
            let probe = Arc::clone(&consumer);
            let topic = queue.to_string();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || {
                probe
                    .fetch_metadata(Some(&topic), Timeout::After(timeout))
                    .map(|_| ())
            })
            .await
            .map_err(|e| QueueError::Transport(format!("Broker probe aborted: {e}")))?
            .map_err(|e| QueueError::Unavailable(format!("Broker unreachable: {e}")))?;

            consumer.subscribe(&[queue]).map_err(|e| QueueError::Subscription {
                queue: queue.to_string(),
                reason: format!("Failed to subscribe: {e}"),
            })?;

            tracing::info!(
                queue,
                consumer_group = %self.consumer_group,
                buffer_size = self.buffer_size,
                "Subscribed to topic"
            );

            let (tx, rx) = mpsc::channel(self.buffer_size);
            tokio::spawn(forward_messages(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(stream.boxed())
        })
    }
}

/// Owns the consumer stream and forwards each message as a [`Delivery`]
/// until the receiving side is dropped.
async fn forward_messages(consumer: Arc<StreamConsumer>, tx: mpsc::Sender<Result<Delivery, QueueError>>) {
    let watermarks = CommitWatermarks::default();
    let deliveries = consumer.stream().map(|received| match received {
        Ok(message) => {
            tracing::trace!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Received message"
            );
            let acker = OffsetCommit {
                consumer: Arc::clone(&consumer),
                watermarks: Arc::clone(&watermarks),
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            };
            let body = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
            Ok(Delivery::new(body, Box::new(acker)))
        }
        Err(e) => Err(QueueError::Transport(format!("Failed to receive message: {e}"))),
    });

    forward_until_closed(deliveries, tx).await;
}

/// Pumps `source` into `tx` until the source ends or the receiver is dropped,
/// including while the source is idle.
async fn forward_until_closed<S, T>(mut source: S, tx: mpsc::Sender<T>)
where
    S: Stream<Item = T> + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;
            () = tx.closed() => break,
            item = source.next() => match item {
                Some(item) => item,
                None => return,
            },
        };

        if tx.send(item).await.is_err() {
            break;
        }
    }

    tracing::debug!("Delivery stream dropped, exiting consumer task");
}

/// Acknowledges one message by committing the offset that follows it.
struct OffsetCommit {
    consumer: Arc<StreamConsumer>,
    watermarks: CommitWatermarks,
    topic: String,
    partition: i32,
    offset: i64,
}

impl Acknowledger for OffsetCommit {
    fn ack(&self) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let next = self.offset + 1;

            let mut watermarks = self.watermarks.lock().await;
            let committed = watermarks.entry(self.partition).or_insert(-1);
            if *committed >= next {
                return Ok(());
            }

            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(&self.topic, self.partition, Offset::Offset(next))
                .map_err(|e| QueueError::Ack(e.to_string()))?;
            self.consumer
                .commit(&offsets, CommitMode::Async)
                .map_err(|e| QueueError::Ack(e.to_string()))?;

            *committed = next;
            Ok(())
        })
    }
}
