use crate::{Priority, QueueName, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Operation name used when a task does not name one.
pub const DEFAULT_OPERATION: &str = "task.check_multi_queue";

/// A unit of work. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Logical operation the payload is processed with
    #[serde(default = "default_operation")]
    pub operation: String,

    /// Opaque JSON payload
    pub payload: Value,

    /// Priority (0-10, higher = more urgent)
    #[serde(default)]
    pub priority: Priority,

    /// Queue the task is published to
    pub target_queue: QueueName,

    /// When the task was created
    pub created_at: DateTime<Utc>,
}

fn default_operation() -> String {
    DEFAULT_OPERATION.to_string()
}

impl Task {
    /// Create a task for the default operation
    pub fn new(payload: Value, priority: Priority, target_queue: impl Into<QueueName>) -> Self {
        Task::builder(payload, target_queue).priority(priority).build()
    }

    pub fn builder(payload: Value, target_queue: impl Into<QueueName>) -> TaskBuilder {
        TaskBuilder::new(payload, target_queue.into())
    }

    /// Encode the task as the JSON body that goes on the wire
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Builder for creating tasks with custom configuration
pub struct TaskBuilder {
    operation: String,
    payload: Value,
    priority: Priority,
    target_queue: QueueName,
}

impl TaskBuilder {
    pub fn new(payload: Value, target_queue: QueueName) -> Self {
        TaskBuilder {
            operation: default_operation(),
            payload,
            priority: Priority::default(),
            target_queue,
        }
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn build(self) -> Task {
        Task {
            id: Uuid::new_v4(),
            operation: self.operation,
            payload: self.payload,
            priority: self.priority,
            target_queue: self.target_queue,
            created_at: Utc::now(),
        }
    }
}
