use crate::queue::{PriorityQueue, StoredMessage};
use crate::transport::{Connection, Consumer, Delivery, DeliveryTag, OutboundMessage, Transport};
use crate::{BrokerMetrics, Result, TransportError};

use async_trait::async_trait;
use parking_lot::Mutex;
use priq_core::{QueueDeclaration, QueueName};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// URL scheme accepted by [`MemoryBroker`]
pub const MEMORY_SCHEME: &str = "memory://";

/// Where rejected or repeatedly failing messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    pub queue: QueueName,
    /// A message nacked with requeue after this many deliveries is
    /// dead-lettered instead.
    pub max_deliveries: u32,
}

/// Shared in-memory broker with priority queues and manual acknowledgment.
/// Cloning yields another handle to the same broker.
///
/// Queues must be declared before they are published to. Messages are kept
/// per queue in priority order (ties by arrival), handed out to consumers one
/// delivery tag at a time, and returned to their queue when a consumer or its
/// connection goes away without settling them.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    metrics: BrokerMetrics,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<QueueName, PriorityQueue>,
    unacked: HashMap<DeliveryTag, Unacked>,
    open_connections: HashSet<u64>,
    next_seq: u64,
    next_tag: DeliveryTag,
    next_connection: u64,
    dead_letter: Option<DeadLetterPolicy>,
    closed: bool,
    fail_publishes: bool,
    refuse_connections: bool,
    rejected_declares: HashSet<QueueName>,
}

struct Unacked {
    connection: u64,
    queue: QueueName,
    message: StoredMessage,
}

enum Take {
    Delivered(Delivery),
    Empty,
    Closed,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                metrics: BrokerMetrics::default(),
            }),
        }
    }

    /// Route rejected and exhausted messages to a dead-letter queue
    pub fn with_dead_letter(self, policy: DeadLetterPolicy) -> Self {
        self.shared.state.lock().dead_letter = Some(policy);
        self
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.shared.metrics
    }

    /// Ready (not in-flight) messages on a queue
    pub fn depth(&self, queue: &str) -> Option<usize> {
        self.shared.state.lock().queues.get(queue).map(PriorityQueue::len)
    }

    pub fn declaration(&self, queue: &str) -> Option<QueueDeclaration> {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(PriorityQueue::declaration)
    }

    pub fn queue_names(&self) -> Vec<QueueName> {
        let mut names: Vec<QueueName> = self.shared.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn open_connections(&self) -> usize {
        self.shared.state.lock().open_connections.len()
    }

    /// Deliveries handed out and not yet acked or nacked
    pub fn unacked(&self) -> usize {
        self.shared.state.lock().unacked.len()
    }

    /// Remove every ready message from a queue, highest priority first.
    /// In-flight deliveries are left alone.
    pub fn drain(&self, queue: &str) -> Vec<OutboundMessage> {
        let mut drained = Vec::new();
        let mut state = self.shared.state.lock();
        if let Some(target) = state.queues.get_mut(queue) {
            while let Some(message) = target.pop() {
                drained.push(OutboundMessage {
                    body: message.body,
                    priority: message.priority,
                    content_type: message.content_type,
                });
            }
            self.shared.metrics.set_depth(queue, 0);
        }
        drained
    }

    /// Make every subsequent publish fail
    pub fn set_fail_publishes(&self, fail: bool) {
        self.shared.state.lock().fail_publishes = fail;
    }

    /// Make every subsequent connect fail
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.shared.state.lock().refuse_connections = refuse;
    }

    /// Make declarations of `queue` fail with a precondition error
    pub fn reject_declares_for(&self, queue: impl Into<QueueName>) {
        self.shared.state.lock().rejected_declares.insert(queue.into());
    }

    /// Stop the broker. Waiting consumers observe the end of their stream.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        info!("Memory broker closed");
        self.shared.notify.notify_waiters();
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>> {
        if !url.starts_with(MEMORY_SCHEME) {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        let id = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(TransportError::ConnectionClosed);
            }
            if state.refuse_connections {
                return Err(TransportError::ConnectionRefused(url.to_string()));
            }
            let id = state.next_connection;
            state.next_connection += 1;
            state.open_connections.insert(id);
            id
        };

        self.shared.metrics.connections_open.inc();
        debug!(connection = id, "Connection opened");

        Ok(Box::new(MemoryConnection {
            handle: Arc::new(ConnectionHandle {
                id,
                shared: self.shared.clone(),
            }),
        }))
    }
}

impl Shared {
    fn declare(&self, name: &str, declaration: QueueDeclaration) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::ConnectionClosed);
        }
        if state.rejected_declares.contains(name) {
            return Err(TransportError::PreconditionFailed {
                queue: name.to_string(),
                reason: "declaration refused by broker".to_string(),
            });
        }

        if let Some(existing) = state.queues.get(name) {
            let current = existing.declaration();
            if current == declaration {
                return Ok(());
            }
            return Err(TransportError::PreconditionFailed {
                queue: name.to_string(),
                reason: format!(
                    "inequivalent arguments: existing durable={} x-max-priority={}, requested durable={} x-max-priority={}",
                    current.durable, current.max_priority, declaration.durable, declaration.max_priority
                ),
            });
        }

        state
            .queues
            .insert(name.to_string(), PriorityQueue::new(declaration));
        self.metrics.set_depth(name, 0);
        debug!(queue = name, max_priority = declaration.max_priority, "Queue declared");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let queue = state
            .queues
            .remove(name)
            .ok_or_else(|| TransportError::QueueNotFound(name.to_string()))?;
        let _ = self.metrics.queue_depth.remove_label_values(&[name]);
        debug!(queue = name, dropped = queue.len(), "Queue deleted");
        Ok(queue.len())
    }

    fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TransportError::ConnectionClosed);
            }
            if state.fail_publishes {
                return Err(TransportError::PublishRejected {
                    queue: queue.to_string(),
                    reason: "broker is rejecting publishes".to_string(),
                });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
            target.push(StoredMessage {
                body: message.body,
                priority: message.priority,
                content_type: message.content_type,
                delivery_count: 0,
                seq,
            });
            self.metrics.set_depth(queue, target.len());
        }

        self.metrics.inc_event("published", queue);
        self.notify.notify_waiters();
        Ok(())
    }

    fn take_next(&self, connection: u64, queues: &[QueueName]) -> Result<Take> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(Take::Closed);
        }

        // Highest priority head across the bound queues; earlier arrival wins ties
        let mut best: Option<(&QueueName, (priq_core::Priority, u64))> = None;
        for name in queues {
            let queue = state
                .queues
                .get(name)
                .ok_or_else(|| TransportError::QueueNotFound(name.clone()))?;
            if let Some(key) = queue.head_key() {
                let better = match best {
                    None => true,
                    Some((_, (priority, seq))) => key.0 > priority || (key.0 == priority && key.1 < seq),
                };
                if better {
                    best = Some((name, key));
                }
            }
        }

        let Some((name, _)) = best else {
            return Ok(Take::Empty);
        };
        let name = name.clone();

        let tag = state.next_tag + 1;
        state.next_tag = tag;

        let queue = state
            .queues
            .get_mut(&name)
            .ok_or_else(|| TransportError::QueueNotFound(name.clone()))?;
        let Some(mut message) = queue.pop() else {
            return Ok(Take::Empty);
        };
        self.metrics.set_depth(&name, queue.len());

        message.delivery_count += 1;
        let delivery = Delivery {
            tag,
            queue: name.clone(),
            body: message.body.clone(),
            priority: message.priority,
            content_type: message.content_type.clone(),
            redelivered: message.delivery_count > 1,
            delivery_count: message.delivery_count,
        };
        state.unacked.insert(
            tag,
            Unacked {
                connection,
                queue: name.clone(),
                message,
            },
        );

        self.metrics.inc_event("delivered", &name);
        Ok(Take::Delivered(delivery))
    }

    fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let entry = self
            .state
            .lock()
            .unacked
            .remove(&tag)
            .ok_or(TransportError::UnknownDeliveryTag(tag))?;
        self.metrics.inc_event("acked", &entry.queue);
        Ok(())
    }

    fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            let entry = state
                .unacked
                .remove(&tag)
                .ok_or(TransportError::UnknownDeliveryTag(tag))?;
            self.metrics.inc_event("nacked", &entry.queue);

            let exhausted = match &state.dead_letter {
                Some(policy) => entry.message.delivery_count >= policy.max_deliveries,
                None => false,
            };
            if requeue && !exhausted {
                self.requeue_locked(&mut state, entry);
            } else {
                self.dead_letter_locked(&mut state, entry);
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Put unsettled deliveries back on their queues
    fn requeue_tags(&self, tags: impl IntoIterator<Item = DeliveryTag>) {
        let mut requeued = 0;
        {
            let mut state = self.state.lock();
            for tag in tags {
                if let Some(entry) = state.unacked.remove(&tag) {
                    self.requeue_locked(&mut state, entry);
                    requeued += 1;
                }
            }
        }
        if requeued > 0 {
            self.notify.notify_waiters();
        }
    }

    fn release_connection(&self, connection: u64) {
        let tags: Vec<DeliveryTag> = {
            let mut state = self.state.lock();
            state.open_connections.remove(&connection);
            state
                .unacked
                .iter()
                .filter(|(_, entry)| entry.connection == connection)
                .map(|(tag, _)| *tag)
                .collect()
        };

        self.metrics.connections_open.dec();
        if !tags.is_empty() {
            warn!(
                connection,
                count = tags.len(),
                "Connection closed with unacknowledged deliveries, requeueing"
            );
        }
        self.requeue_tags(tags);
        debug!(connection, "Connection released");
    }

    fn requeue_locked(&self, state: &mut BrokerState, entry: Unacked) {
        match state.queues.get_mut(&entry.queue) {
            Some(queue) => {
                queue.push(entry.message);
                self.metrics.set_depth(&entry.queue, queue.len());
                self.metrics.inc_event("requeued", &entry.queue);
            }
            None => {
                warn!(queue = %entry.queue, "Queue deleted while message was in flight, dropping message");
                self.metrics.inc_event("dropped", &entry.queue);
            }
        }
    }

    fn dead_letter_locked(&self, state: &mut BrokerState, entry: Unacked) {
        if let Some(name) = state.dead_letter.as_ref().map(|p| p.queue.clone()) {
            if let Some(queue) = state.queues.get_mut(&name) {
                let mut message = entry.message;
                message.delivery_count = 0;
                queue.push(message);
                self.metrics.set_depth(&name, queue.len());
                self.metrics.inc_event("dead_lettered", &entry.queue);
                warn!(queue = %entry.queue, dead_letter_queue = %name, "Message dead-lettered");
                return;
            }
        }

        self.metrics.inc_event("discarded", &entry.queue);
        warn!(
            queue = %entry.queue,
            deliveries = entry.message.delivery_count,
            "Message rejected without a dead-letter queue, discarding"
        );
    }
}

/// Keeps a connection open while any connection or consumer handle lives
struct ConnectionHandle {
    id: u64,
    shared: Arc<Shared>,
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shared.release_connection(self.id);
    }
}

struct MemoryConnection {
    handle: Arc<ConnectionHandle>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn declare_queue(&self, name: &str, declaration: QueueDeclaration) -> Result<()> {
        self.handle.shared.declare(name, declaration)
    }

    async fn delete_queue(&self, name: &str) -> Result<usize> {
        self.handle.shared.delete(name)
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()> {
        self.handle.shared.publish(queue, message)
    }

    async fn consume(&self, queues: &[QueueName], prefetch: usize) -> Result<Box<dyn Consumer>> {
        {
            let state = self.handle.shared.state.lock();
            if state.closed {
                return Err(TransportError::ConnectionClosed);
            }
            if let Some(missing) = queues.iter().find(|q| !state.queues.contains_key(*q)) {
                return Err(TransportError::QueueNotFound(missing.clone()));
            }
        }

        Ok(Box::new(MemoryConsumer {
            handle: self.handle.clone(),
            queues: queues.to_vec(),
            prefetch: prefetch.max(1),
            outstanding: HashSet::new(),
        }))
    }
}

struct MemoryConsumer {
    handle: Arc<ConnectionHandle>,
    queues: Vec<QueueName>,
    prefetch: usize,
    outstanding: HashSet<DeliveryTag>,
}

impl MemoryConsumer {
    fn settle(&mut self, tag: DeliveryTag) -> Result<()> {
        if self.outstanding.remove(&tag) {
            Ok(())
        } else {
            Err(TransportError::UnknownDeliveryTag(tag))
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        if self.outstanding.len() >= self.prefetch {
            return Err(TransportError::PrefetchExceeded(self.prefetch));
        }

        let shared = &self.handle.shared;
        loop {
            // Register for wakeups before looking, so a publish in between is not missed
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match shared.take_next(self.handle.id, &self.queues)? {
                Take::Delivered(delivery) => {
                    self.outstanding.insert(delivery.tag);
                    return Ok(Some(delivery));
                }
                Take::Closed => return Ok(None),
                Take::Empty => notified.await,
            }
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<()> {
        self.settle(delivery.tag)?;
        self.handle.shared.ack(delivery.tag)
    }

    async fn nack(&mut self, delivery: Delivery, requeue: bool) -> Result<()> {
        self.settle(delivery.tag)?;
        self.handle.shared.nack(delivery.tag, requeue)
    }

    fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if !self.outstanding.is_empty() {
            warn!(
                count = self.outstanding.len(),
                "Consumer dropped with unacknowledged deliveries, requeueing"
            );
        }
        self.handle.shared.requeue_tags(self.outstanding.drain());
    }
}
