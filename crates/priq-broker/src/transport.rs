use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use priq_core::{Priority, QueueDeclaration, QueueName, JSON_CONTENT_TYPE};

pub type DeliveryTag = u64;

/// The primitives the dispatch system needs from a message broker.
///
/// Any broker offering durable queues, per-message priority and manual
/// acknowledgment can sit behind these traits. Connections are scoped: the
/// broker releases a connection (and requeues whatever it still holds
/// unacknowledged) when the last handle to it is dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to the broker at `url`
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Declare a queue. Succeeds without change when the queue already exists
    /// with the same arguments.
    async fn declare_queue(&self, name: &str, declaration: QueueDeclaration) -> Result<()>;

    /// Delete a queue and its messages, returning how many were dropped.
    /// Fails with `QueueNotFound` when the queue does not exist.
    async fn delete_queue(&self, name: &str) -> Result<usize>;

    /// Publish one message to a declared queue
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()>;

    /// Start consuming from `queues` with manual acknowledgment. At most
    /// `prefetch` deliveries may be outstanding at once.
    async fn consume(&self, queues: &[QueueName], prefetch: usize) -> Result<Box<dyn Consumer>>;
}

#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next delivery. Returns `None` once the consumer is closed.
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery. Consumes it, so a delivery is settled once.
    async fn ack(&mut self, delivery: Delivery) -> Result<()>;

    /// Reject a delivery, optionally putting it back on its queue.
    async fn nack(&mut self, delivery: Delivery, requeue: bool) -> Result<()>;

    /// Deliveries handed out and not yet settled
    fn outstanding(&self) -> usize;
}

/// A message on its way to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: Bytes,
    pub priority: Priority,
    pub content_type: String,
}

impl OutboundMessage {
    pub fn json(body: impl Into<Bytes>, priority: Priority) -> Self {
        OutboundMessage {
            body: body.into(),
            priority,
            content_type: JSON_CONTENT_TYPE.to_string(),
        }
    }
}

/// A message handed to a consumer and awaiting ack or nack.
#[derive(Debug)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: QueueName,
    pub body: Bytes,
    pub priority: Priority,
    pub content_type: String,
    /// True when this message was delivered before and not acknowledged
    pub redelivered: bool,
    /// Number of times the message has been handed out, this time included
    pub delivery_count: u32,
}
