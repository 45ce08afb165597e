use crate::dispatcher::Dispatcher;
use crate::error::ProcessingError;
use priq_broker::{Consumer, Delivery, Transport};
use priq_core::{QueueName, Task, JSON_CONTENT_TYPE};

use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counts of what a worker did before it stopped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Tasks processed and acknowledged
    pub processed: usize,
    /// Tasks whose processing failed and were handed back to the broker
    pub failed: usize,
    /// Deliveries that could not be decoded and were rejected
    pub rejected: usize,
    /// Processed tasks whose result did not reach the result queue
    pub publish_failures: usize,
}

impl WorkerSummary {
    pub fn merge(&mut self, other: &WorkerSummary) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.rejected += other.rejected;
        self.publish_failures += other.publish_failures;
    }
}

/// Consumes tasks from its bound queues one at a time and acknowledges each
/// only after processing finishes.
pub struct Worker {
    transport: Arc<dyn Transport>,
    broker_url: String,
    queues: Vec<QueueName>,
    prefetch: usize,
    dispatcher: Dispatcher,
}

impl Worker {
    pub fn new(
        transport: Arc<dyn Transport>,
        broker_url: impl Into<String>,
        queues: Vec<QueueName>,
        prefetch: usize,
        dispatcher: Dispatcher,
    ) -> Self {
        Worker {
            transport,
            broker_url: broker_url.into(),
            queues,
            prefetch: prefetch.max(1),
            dispatcher,
        }
    }

    pub fn worker_id(&self) -> &str {
        self.dispatcher.runtime().worker_id()
    }

    /// Run until `shutdown` fires or the broker goes away. A task already
    /// being processed is finished and settled before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<WorkerSummary> {
        self.dispatcher.runtime().on_process_start();

        let connection = self.transport.connect(&self.broker_url).await?;
        let mut consumer = connection.consume(&self.queues, self.prefetch).await?;
        info!(
            worker_id = %self.worker_id(),
            queues = ?self.queues,
            prefetch = self.prefetch,
            "Worker started"
        );

        let mut summary = WorkerSummary::default();
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(worker_id = %self.worker_id(), "Worker shutting down gracefully");
                    break;
                }
                next = consumer.next() => match next? {
                    Some(delivery) => delivery,
                    None => {
                        warn!(worker_id = %self.worker_id(), "Broker closed, stopping worker");
                        break;
                    }
                },
            };

            self.settle(&mut *consumer, delivery, &mut summary).await?;
        }

        info!(
            worker_id = %self.worker_id(),
            processed = summary.processed,
            failed = summary.failed,
            rejected = summary.rejected,
            "Worker stopped"
        );
        Ok(summary)
    }

    async fn settle(
        &self,
        consumer: &mut dyn Consumer,
        delivery: Delivery,
        summary: &mut WorkerSummary,
    ) -> anyhow::Result<()> {
        if delivery.redelivered {
            debug!(tag = delivery.tag, deliveries = delivery.delivery_count, "Redelivered task");
        }

        let task = match decode(&delivery) {
            Ok(task) => task,
            Err(e) => {
                error!(queue = %delivery.queue, tag = delivery.tag, error = %e, "Rejecting undecodable task");
                summary.rejected += 1;
                consumer.nack(delivery, false).await?;
                return Ok(());
            }
        };

        match self.dispatcher.handle(&task).await {
            Ok(handled) => {
                if handled.published.is_err() {
                    summary.publish_failures += 1;
                }
                summary.processed += 1;
                consumer.ack(delivery).await?;
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Returning failed task to the broker");
                summary.failed += 1;
                consumer.nack(delivery, true).await?;
            }
        }
        Ok(())
    }
}

fn decode(delivery: &Delivery) -> Result<Task, ProcessingError> {
    if delivery.content_type != JSON_CONTENT_TYPE {
        return Err(ProcessingError::InvalidPayload(format!(
            "unsupported content type {}",
            delivery.content_type
        )));
    }
    Task::from_json_slice(&delivery.body).map_err(|e| ProcessingError::InvalidPayload(e.to_string()))
}
