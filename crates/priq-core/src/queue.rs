use crate::{CoreError, Result, MAX_PRIORITY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Physical queue name
pub type QueueName = String;

/// Arguments a queue is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDeclaration {
    pub durable: bool,
    /// Highest priority level the queue honours (`x-max-priority`)
    pub max_priority: u8,
}

impl QueueDeclaration {
    pub fn durable(max_priority: u8) -> Self {
        QueueDeclaration {
            durable: true,
            max_priority,
        }
    }
}

impl Default for QueueDeclaration {
    fn default() -> Self {
        Self::durable(MAX_PRIORITY)
    }
}

/// The fixed set of work queues plus the result queue, each mapped to the
/// arguments it must be declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    work_queues: Vec<(QueueName, QueueDeclaration)>,
    result_queue: (QueueName, QueueDeclaration),
}

impl QueueTopology {
    pub fn builder() -> QueueTopologyBuilder {
        QueueTopologyBuilder::default()
    }

    /// Work queues followed by the result queue, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&QueueName, &QueueDeclaration)> {
        self.work_queues
            .iter()
            .chain(std::iter::once(&self.result_queue))
            .map(|(name, decl)| (name, decl))
    }

    pub fn work_queues(&self) -> impl Iterator<Item = &QueueName> {
        self.work_queues.iter().map(|(name, _)| name)
    }

    pub fn result_queue(&self) -> &QueueName {
        &self.result_queue.0
    }

    pub fn result_declaration(&self) -> QueueDeclaration {
        self.result_queue.1
    }

    pub fn get(&self, name: &str) -> Option<QueueDeclaration> {
        self.iter()
            .find(|(queue, _)| queue.as_str() == name)
            .map(|(_, decl)| *decl)
    }

    pub fn is_work_queue(&self, name: &str) -> bool {
        self.work_queues.iter().any(|(queue, _)| queue == name)
    }

    pub fn len(&self) -> usize {
        self.work_queues.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct QueueTopologyBuilder {
    work_queues: Vec<QueueName>,
    result_queue: Option<QueueName>,
    max_priority: Option<u8>,
    durable: Option<bool>,
}

impl QueueTopologyBuilder {
    pub fn work_queue(mut self, name: impl Into<QueueName>) -> Self {
        self.work_queues.push(name.into());
        self
    }

    pub fn work_queues<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<QueueName>,
    {
        for name in names {
            self.work_queues.push(name.into());
        }
        self
    }

    pub fn result_queue(mut self, name: impl Into<QueueName>) -> Self {
        self.result_queue = Some(name.into());
        self
    }

    pub fn max_priority(mut self, max_priority: u8) -> Self {
        self.max_priority = Some(max_priority);
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn build(self) -> Result<QueueTopology> {
        let max_priority = self.max_priority.unwrap_or(MAX_PRIORITY);
        if max_priority > MAX_PRIORITY {
            return Err(CoreError::InvalidPriority {
                value: max_priority,
                max: MAX_PRIORITY,
            });
        }
        let declaration = QueueDeclaration {
            durable: self.durable.unwrap_or(true),
            max_priority,
        };

        let result_queue = self
            .result_queue
            .ok_or_else(|| CoreError::InvalidConfig("result queue name is required".to_string()))?;
        if result_queue.is_empty() {
            return Err(CoreError::InvalidConfig("result queue name is empty".to_string()));
        }

        let mut work_queues: Vec<(QueueName, QueueDeclaration)> = Vec::new();
        for name in self.work_queues {
            if name.is_empty() {
                return Err(CoreError::InvalidConfig("queue name is empty".to_string()));
            }
            if name == result_queue {
                return Err(CoreError::InvalidConfig(format!(
                    "queue {name} is configured as both a work queue and the result queue"
                )));
            }
            if work_queues.iter().any(|(existing, _)| *existing == name) {
                continue;
            }
            work_queues.push((name, declaration));
        }
        if work_queues.is_empty() {
            return Err(CoreError::InvalidConfig("at least one work queue is required".to_string()));
        }

        Ok(QueueTopology {
            work_queues,
            result_queue: (result_queue, declaration),
        })
    }
}

/// Maps a logical operation to the physical queues that may carry it.
///
/// Routes are written as comma-joined queue lists (`"queue1,queue2"`); any
/// worker bound to any of the listed queues may claim the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct RoutingTable {
    routes: BTreeMap<String, Vec<QueueName>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route from a comma-joined queue list.
    pub fn insert(&mut self, operation: impl Into<String>, queues: &str) {
        self.routes.insert(operation.into(), split_queue_list(queues));
    }

    pub fn with_route(mut self, operation: impl Into<String>, queues: &str) -> Self {
        self.insert(operation, queues);
        self
    }

    pub fn queues_for(&self, operation: &str) -> Option<&[QueueName]> {
        self.routes
            .get(operation)
            .map(Vec::as_slice)
            .filter(|queues| !queues.is_empty())
    }

    pub fn operations(&self) -> impl Iterator<Item = &String> {
        self.routes.keys()
    }

    /// Check every routed queue against the topology.
    pub fn validate(&self, topology: &QueueTopology) -> Result<()> {
        for (operation, queues) in &self.routes {
            if let Some(queue) = queues.iter().find(|q| !topology.is_work_queue(q)) {
                return Err(CoreError::InvalidConfig(format!(
                    "route {operation} targets undeclared queue {queue}"
                )));
            }
        }
        Ok(())
    }
}

impl From<BTreeMap<String, String>> for RoutingTable {
    fn from(raw: BTreeMap<String, String>) -> Self {
        let mut table = RoutingTable::new();
        for (operation, queues) in raw {
            table.insert(operation, &queues);
        }
        table
    }
}

impl From<RoutingTable> for BTreeMap<String, String> {
    fn from(table: RoutingTable) -> Self {
        table
            .routes
            .into_iter()
            .map(|(operation, queues)| (operation, queues.join(",")))
            .collect()
    }
}

fn split_queue_list(queues: &str) -> Vec<QueueName> {
    queues
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}
