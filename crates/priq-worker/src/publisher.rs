use crate::error::PublishError;
use crate::metrics::WorkerMetrics;
use priq_broker::{OutboundMessage, Transport};
use priq_core::{DispatchConfig, Priority, QueueDeclaration, QueueName, TaskResult};
use std::sync::Arc;
use tracing::{error, info};

/// Publishes processed results to the result queue.
///
/// Each publish opens its own short-lived connection, released when the
/// call returns on any path.
pub struct ResultPublisher {
    transport: Arc<dyn Transport>,
    broker_url: String,
    result_queue: QueueName,
    declaration: QueueDeclaration,
    include_priority: bool,
    metrics: Arc<WorkerMetrics>,
}

impl ResultPublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &DispatchConfig,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        ResultPublisher {
            transport,
            broker_url: config.broker_url.clone(),
            result_queue: config.result_queue.clone(),
            declaration: QueueDeclaration::durable(config.max_priority),
            include_priority: config.include_priority_in_payload,
            metrics,
        }
    }

    pub fn result_queue(&self) -> &str {
        &self.result_queue
    }

    pub async fn publish(&self, result: &TaskResult, priority: Priority) -> Result<(), PublishError> {
        let outcome = self.try_publish(result, priority).await;
        match &outcome {
            Ok(()) => {
                self.metrics.inc_results("published");
                info!(
                    queue = %self.result_queue,
                    priority = priority.value(),
                    "Published result"
                );
            }
            Err(e) => {
                self.metrics.inc_results("failed");
                error!(queue = %self.result_queue, priority = priority.value(), error = %e, "Result publish failed");
            }
        }
        outcome
    }

    async fn try_publish(&self, result: &TaskResult, priority: Priority) -> Result<(), PublishError> {
        let body = result
            .to_json_bytes(self.include_priority)
            .map_err(PublishError::Serialize)?;

        let connection = self
            .transport
            .connect(&self.broker_url)
            .await
            .map_err(PublishError::Connect)?;

        connection
            .declare_queue(&self.result_queue, self.declaration)
            .await
            .map_err(PublishError::Declare)?;

        connection
            .publish(&self.result_queue, OutboundMessage::json(body, priority))
            .await
            .map_err(PublishError::Publish)
    }
}
