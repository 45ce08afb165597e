use bytes::Bytes;
use priq_core::{Priority, QueueDeclaration};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A message resting on a queue
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub body: Bytes,
    pub priority: Priority,
    pub content_type: String,
    pub delivery_count: u32,
    /// Broker-wide arrival sequence, kept across requeues
    pub seq: u64,
}

/// A message wrapper for priority queue ordering
struct Prioritized(StoredMessage);

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first
        match self.0.priority.cmp(&other.0.priority) {
            // Within same priority, earlier arrival first (FIFO)
            Ordering::Equal => other.0.seq.cmp(&self.0.seq),
            ordering => ordering,
        }
    }
}

/// A declared queue holding messages by priority, then arrival order.
pub(crate) struct PriorityQueue {
    declaration: QueueDeclaration,
    heap: BinaryHeap<Prioritized>,
}

impl PriorityQueue {
    pub fn new(declaration: QueueDeclaration) -> Self {
        PriorityQueue {
            declaration,
            heap: BinaryHeap::new(),
        }
    }

    pub fn declaration(&self) -> QueueDeclaration {
        self.declaration
    }

    /// Push a message, capping its priority at the declared maximum
    pub fn push(&mut self, mut message: StoredMessage) {
        message.priority = message.priority.capped_at(self.declaration.max_priority);
        self.heap.push(Prioritized(message));
    }

    pub fn pop(&mut self) -> Option<StoredMessage> {
        self.heap.pop().map(|p| p.0)
    }

    /// Ordering key of the head message
    pub fn head_key(&self) -> Option<(Priority, u64)> {
        self.heap.peek().map(|p| (p.0.priority, p.0.seq))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
