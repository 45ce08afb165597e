use crate::error::{ProcessingError, PublishError};
use crate::metrics::WorkerMetrics;
use crate::processor::ProcessorRegistry;
use crate::publisher::ResultPublisher;
use crate::runtime::WorkerRuntime;
use priq_core::{Task, TaskResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A task that was processed, along with what happened to its result.
#[derive(Debug)]
pub struct Handled {
    pub result: TaskResult,
    /// Outcome of forwarding `result`; a failure here does not undo processing
    pub published: Result<(), PublishError>,
}

impl Handled {
    pub fn processed_value(&self) -> &Value {
        &self.result.processed_value
    }

    pub fn into_processed_value(self) -> Value {
        self.result.processed_value
    }
}

/// Applies the processing function to a task and forwards the result.
pub struct Dispatcher {
    runtime: Arc<WorkerRuntime>,
    processors: Arc<ProcessorRegistry>,
    publisher: ResultPublisher,
    metrics: Arc<WorkerMetrics>,
}

impl Dispatcher {
    pub fn new(
        runtime: Arc<WorkerRuntime>,
        processors: Arc<ProcessorRegistry>,
        publisher: ResultPublisher,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Dispatcher {
            runtime,
            processors,
            publisher,
            metrics,
        }
    }

    pub fn runtime(&self) -> &Arc<WorkerRuntime> {
        &self.runtime
    }

    /// Process one task and publish its result at the task's priority.
    ///
    /// Processing errors are returned untouched so the caller can leave the
    /// task unacknowledged. Publish errors are logged and carried in
    /// [`Handled::published`].
    pub async fn handle(&self, task: &Task) -> Result<Handled, ProcessingError> {
        info!(
            worker_id = %self.runtime.worker_id(),
            task_id = %task.id,
            operation = %task.operation,
            priority = task.priority.value(),
            "Received task"
        );

        let state = self.runtime.get_or_init(None);
        let processor = self.processors.get(&task.operation).ok_or_else(|| {
            self.metrics.inc_tasks("failed", &task.operation);
            ProcessingError::UnknownOperation(task.operation.clone())
        })?;

        let started = Instant::now();
        let processed = processor.process(&state, &task.payload).await;
        self.metrics
            .observe_processing_duration(&task.operation, started.elapsed().as_secs_f64());

        let processed = match processed {
            Ok(value) => value,
            Err(e) => {
                self.metrics.inc_tasks("failed", &task.operation);
                error!(task_id = %task.id, operation = %task.operation, error = %e, "Task processing failed");
                return Err(e);
            }
        };
        self.metrics.inc_tasks("processed", &task.operation);

        let result = TaskResult::for_task(task, processed);
        let published = self.publisher.publish(&result, task.priority).await;
        if published.is_err() {
            warn!(task_id = %task.id, "Task processed but its result was not published");
        }

        Ok(Handled { result, published })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Processor, ProcessResult};
    use crate::runtime::WorkerState;
    use async_trait::async_trait;
    use priq_broker::{MemoryBroker, Transport};
    use priq_core::{DispatchConfig, Priority, DEFAULT_OPERATION};
    use serde_json::json;

    struct FailingProcessor;

    #[async_trait]
    impl Processor for FailingProcessor {
        async fn process(&self, _state: &WorkerState, _payload: &Value) -> ProcessResult {
            Err(ProcessingError::Failed("boom".to_string()))
        }
    }

    fn dispatcher(broker: &MemoryBroker) -> Dispatcher {
        let metrics = Arc::new(WorkerMetrics::default());
        let transport: Arc<dyn Transport> = Arc::new(broker.clone());
        let processors = Arc::new(ProcessorRegistry::with_defaults());
        processors.register("always.fails", FailingProcessor);
        Dispatcher::new(
            Arc::new(WorkerRuntime::new("w1")),
            processors,
            ResultPublisher::new(transport, &DispatchConfig::default(), metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_handle_builds_result_from_task() {
        let broker = MemoryBroker::new();
        let dispatcher = dispatcher(&broker);
        let task = Task::new(json!({"x": 5}), Priority::new(7).unwrap(), "queue1");

        let handled = dispatcher.handle(&task).await.unwrap();
        assert_eq!(handled.processed_value(), &json!({"x": 5}));
        assert_eq!(handled.result.original_task_payload, json!({"x": 5}));
        assert_eq!(handled.result.priority.value(), 7);
        assert!(handled.published.is_ok());
        assert_eq!(broker.depth("result_queue"), Some(1));
    }

    #[tokio::test]
    async fn test_handle_initializes_state_lazily() {
        let broker = MemoryBroker::new();
        let dispatcher = dispatcher(&broker);
        assert!(!dispatcher.runtime().is_initialized());

        let task = Task::new(json!("a"), Priority::LOWEST, "queue1");
        dispatcher.handle(&task).await.unwrap();
        assert!(dispatcher.runtime().is_initialized());
        assert_eq!(dispatcher.runtime().get_or_init(None).data(), json!("a"));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_handle() {
        let broker = MemoryBroker::new();
        broker.set_fail_publishes(true);
        let dispatcher = dispatcher(&broker);
        let task = Task::new(json!("x"), Priority::new(3).unwrap(), "queue1");

        let handled = dispatcher.handle(&task).await.unwrap();
        assert_eq!(handled.processed_value(), &json!("x"));
        assert!(matches!(handled.published, Err(PublishError::Publish(_))));
        assert_eq!(dispatcher.metrics.tasks("processed", DEFAULT_OPERATION), 1);
    }

    #[tokio::test]
    async fn test_processing_error_is_returned() {
        let broker = MemoryBroker::new();
        let dispatcher = dispatcher(&broker);
        let task = Task::builder(json!(1), "queue1").operation("always.fails").build();

        let err = dispatcher.handle(&task).await.unwrap_err();
        assert_eq!(err, ProcessingError::Failed("boom".to_string()));
        assert!(broker.depth("result_queue").is_none());
        assert_eq!(dispatcher.metrics.tasks("failed", "always.fails"), 1);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let broker = MemoryBroker::new();
        let task = Task::builder(json!(1), "queue1").operation("nope").build();
        let err = dispatcher(&broker).handle(&task).await.unwrap_err();
        assert_eq!(err, ProcessingError::UnknownOperation("nope".to_string()));
    }
}
