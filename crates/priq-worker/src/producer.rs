use crate::error::SubmitError;
use priq_broker::{Connection, OutboundMessage, Transport};
use priq_core::{CoreError, DispatchConfig, Priority, QueueName, QueueTopology, Task, DEFAULT_OPERATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A task as written by a caller, before routing and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub operation: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub priority: u8,
    /// Explicit target queue; when absent the operation's route decides
    #[serde(default)]
    pub queue: Option<QueueName>,
}

impl TaskRequest {
    pub fn new(payload: Value, priority: u8) -> Self {
        TaskRequest {
            operation: None,
            payload,
            priority,
            queue: None,
        }
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// Enqueues tasks onto the work queues.
///
/// An operation routed to several queues is spread over them in turn.
pub struct TaskProducer {
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    topology: QueueTopology,
    next_route: AtomicUsize,
}

impl TaskProducer {
    pub fn new(transport: Arc<dyn Transport>, config: DispatchConfig) -> Result<Self, CoreError> {
        let topology = config.topology()?;
        config.routes.validate(&topology)?;
        Ok(TaskProducer {
            transport,
            config,
            topology,
            next_route: AtomicUsize::new(0),
        })
    }

    /// Queue for the next task of `operation`. Unrouted operations go to the
    /// first configured queue.
    pub fn route(&self, operation: &str) -> Result<QueueName, CoreError> {
        match self.config.routes.queues_for(operation) {
            Some(queues) => {
                let index = self.next_route.fetch_add(1, Ordering::Relaxed) % queues.len();
                Ok(queues[index].clone())
            }
            None => self.config.default_queue().cloned(),
        }
    }

    /// Validate a request and turn it into a routed task
    pub fn prepare(&self, request: TaskRequest) -> Result<Task, CoreError> {
        let priority = Priority::new(request.priority)?;
        let operation = request
            .operation
            .unwrap_or_else(|| DEFAULT_OPERATION.to_string());

        let queue = match request.queue {
            Some(queue) => {
                self.check_queue(&queue)?;
                queue
            }
            None => self.route(&operation)?,
        };

        Ok(Task::builder(request.payload, queue)
            .operation(operation)
            .priority(priority)
            .build())
    }

    pub async fn submit(&self, task: &Task) -> Result<(), SubmitError> {
        let connection = self.transport.connect(&self.config.broker_url).await?;
        self.publish_on(connection.as_ref(), task).await
    }

    /// Submit tasks in order over a single connection, stopping at the first failure
    pub async fn submit_all(&self, tasks: &[Task]) -> Result<usize, SubmitError> {
        let connection = self.transport.connect(&self.config.broker_url).await?;
        for task in tasks {
            self.publish_on(connection.as_ref(), task).await?;
        }
        info!(count = tasks.len(), "Submitted tasks");
        Ok(tasks.len())
    }

    fn check_queue(&self, queue: &str) -> Result<(), CoreError> {
        if self.topology.is_work_queue(queue) {
            Ok(())
        } else {
            Err(CoreError::UnknownQueue(queue.to_string()))
        }
    }

    async fn publish_on(&self, connection: &dyn Connection, task: &Task) -> Result<(), SubmitError> {
        self.check_queue(&task.target_queue)?;
        let body = task.to_json_bytes()?;
        connection
            .publish(&task.target_queue, OutboundMessage::json(body, task.priority))
            .await?;

        debug!(
            task_id = %task.id,
            queue = %task.target_queue,
            priority = task.priority.value(),
            "Task submitted"
        );
        Ok(())
    }
}
