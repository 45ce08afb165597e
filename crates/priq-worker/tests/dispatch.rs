// End-to-end tests: provisioning, submission, workers and result publishing
// against the in-memory broker

use async_trait::async_trait;
use parking_lot::Mutex;
use priq_broker::{MemoryBroker, Transport};
use priq_core::{DispatchConfig, Priority, QueueDeclaration, RoutingTable, Task, TaskResult, DEFAULT_OPERATION};
use priq_worker::{
    Dispatcher, ProcessResult, Processor, ProcessorRegistry, QueueProvisioner, ResultPublisher, TaskProducer,
    TaskRequest, Worker, WorkerMetrics, WorkerRuntime, WorkerState, WorkerSummary,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

fn scenario_config() -> DispatchConfig {
    DispatchConfig {
        queue_names: vec!["q1".to_string(), "q2".to_string(), "q3".to_string()],
        result_queue: "result_q".to_string(),
        routes: RoutingTable::new()
            .with_route(DEFAULT_OPERATION, "q1,q2,q3")
            .with_route("record", "q1,q2,q3"),
        ..DispatchConfig::default()
    }
}

async fn provisioned(config: &DispatchConfig) -> MemoryBroker {
    let broker = MemoryBroker::new();
    let report = QueueProvisioner::new(Arc::new(broker.clone()), config.broker_url.clone())
        .provision(&config.queue_names, &config.result_queue, config.max_priority)
        .await
        .unwrap();
    assert!(report.is_success());
    broker
}

/// Records payloads in processing order along with the worker and the state
/// instance that saw them
#[derive(Clone, Default)]
struct Recorder {
    worker: String,
    seen: Arc<Mutex<Vec<(Value, String, uuid::Uuid)>>>,
}

impl Recorder {
    /// Another recorder writing to the same log, tagged with `worker`
    fn for_worker(&self, worker: &str) -> Recorder {
        Recorder {
            worker: worker.to_string(),
            seen: self.seen.clone(),
        }
    }
}

#[async_trait]
impl Processor for Recorder {
    async fn process(&self, state: &WorkerState, payload: &Value) -> ProcessResult {
        self.seen
            .lock()
            .push((payload.clone(), self.worker.clone(), state.instance_id()));
        Ok(payload.clone())
    }
}

fn spawn_worker(
    broker: &MemoryBroker,
    config: &DispatchConfig,
    worker_id: &str,
    processors: Arc<ProcessorRegistry>,
    shutdown: &CancellationToken,
) -> tokio::task::JoinHandle<anyhow::Result<WorkerSummary>> {
    let transport: Arc<dyn Transport> = Arc::new(broker.clone());
    let metrics = Arc::new(WorkerMetrics::default());
    let dispatcher = Dispatcher::new(
        Arc::new(WorkerRuntime::new(worker_id)),
        processors,
        ResultPublisher::new(transport.clone(), config, metrics.clone()),
        metrics,
    );
    let worker = Worker::new(
        transport,
        config.broker_url.clone(),
        config.queue_names.clone(),
        1,
        dispatcher,
    );
    let token = shutdown.child_token();
    tokio::spawn(async move { worker.run(token).await })
}

async fn wait_until_settled(broker: &MemoryBroker, config: &DispatchConfig) {
    for _ in 0..400 {
        let empty = config
            .queue_names
            .iter()
            .all(|q| broker.depth(q).unwrap_or(0) == 0);
        if empty && broker.unacked() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("tasks were not settled in time");
}

fn results(broker: &MemoryBroker, queue: &str) -> Vec<TaskResult> {
    broker
        .drain(queue)
        .into_iter()
        .map(|m| TaskResult::from_json_slice(&m.body, m.priority).unwrap())
        .collect()
}

#[tokio::test]
async fn test_hello_at_priority_ten_reaches_result_queue() {
    let config = scenario_config();
    let broker = provisioned(&config).await;
    for queue in ["q1", "q2", "q3", "result_q"] {
        assert_eq!(broker.declaration(queue), Some(QueueDeclaration::durable(10)));
    }

    let producer = TaskProducer::new(Arc::new(broker.clone()), config.clone()).unwrap();
    let task = producer
        .prepare(TaskRequest::new(json!("hello"), 10).queue("q1"))
        .unwrap();
    producer.submit(&task).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(
        &broker,
        &config,
        "w1",
        Arc::new(ProcessorRegistry::with_defaults()),
        &shutdown,
    );
    wait_until_settled(&broker, &config).await;
    shutdown.cancel();
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.processed, 1);

    let drained = broker.drain("result_q");
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].priority.value(), 10);
    let body: Value = serde_json::from_slice(&drained[0].body).unwrap();
    assert_eq!(body["processed_result"], json!("hello"));
    assert_eq!(body["original_data"], json!("hello"));
    assert!(body.get("priority").is_none());
}

#[tokio::test]
async fn test_single_worker_processes_in_priority_order() {
    let config = scenario_config();
    let broker = provisioned(&config).await;
    let producer = TaskProducer::new(Arc::new(broker.clone()), config.clone()).unwrap();

    let priorities = [3u8, 9, 0, 7, 9, 5];
    let tasks: Vec<Task> = priorities
        .iter()
        .enumerate()
        .map(|(i, p)| {
            producer
                .prepare(TaskRequest::new(json!(i), *p).operation("record").queue("q2"))
                .unwrap()
        })
        .collect();
    producer.submit_all(&tasks).await.unwrap();

    let recorder = Recorder::default();
    let processors = Arc::new(ProcessorRegistry::new());
    processors.register("record", recorder.clone());

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&broker, &config, "w1", processors, &shutdown);
    wait_until_settled(&broker, &config).await;
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let order: Vec<Value> = recorder.seen.lock().iter().map(|(v, _, _)| v.clone()).collect();
    // Priority 9 twice (arrival order 1 then 4), then 7, 5, 3, 0
    assert_eq!(order, vec![json!(1), json!(4), json!(3), json!(5), json!(0), json!(2)]);
}

#[tokio::test]
async fn test_many_workers_process_each_task_once() {
    let config = scenario_config();
    let broker = provisioned(&config).await;
    let producer = TaskProducer::new(Arc::new(broker.clone()), config.clone()).unwrap();

    let tasks: Vec<Task> = (0..30)
        .map(|i| {
            producer
                .prepare(TaskRequest::new(json!(i), (i % 11) as u8).operation("record"))
                .unwrap()
        })
        .collect();
    producer.submit_all(&tasks).await.unwrap();
    assert_eq!(broker.depth("q1"), Some(10));

    let recorder = Recorder::default();
    let shutdown = CancellationToken::new();
    let handles: Vec<_> = (0..3)
        .map(|i| {
            let worker_id = format!("w{i}");
            let processors = Arc::new(ProcessorRegistry::new());
            processors.register("record", recorder.for_worker(&worker_id));
            spawn_worker(&broker, &config, &worker_id, processors, &shutdown)
        })
        .collect();
    wait_until_settled(&broker, &config).await;
    shutdown.cancel();

    let mut total = WorkerSummary::default();
    for handle in handles {
        total.merge(&handle.await.unwrap().unwrap());
    }
    assert_eq!(total.processed, 30);

    let seen = recorder.seen.lock();
    let mut payloads: Vec<i64> = seen.iter().map(|(v, _, _)| v.as_i64().unwrap()).collect();
    payloads.sort();
    assert_eq!(payloads, (0..30).collect::<Vec<i64>>());

    // Each worker keeps one state for all its tasks and never shares it
    let mut instances_by_worker: HashMap<&str, HashSet<uuid::Uuid>> = HashMap::new();
    for (_, worker, instance) in seen.iter() {
        instances_by_worker.entry(worker.as_str()).or_default().insert(*instance);
    }
    assert!(!instances_by_worker.is_empty());
    for (worker, instances) in &instances_by_worker {
        assert_eq!(instances.len(), 1, "worker {worker} saw more than one state");
    }
    let distinct: HashSet<uuid::Uuid> = instances_by_worker.values().flatten().copied().collect();
    assert_eq!(distinct.len(), instances_by_worker.len());
    drop(seen);

    assert_eq!(results(&broker, "result_q").len(), 30);
}

#[tokio::test]
async fn test_crashed_worker_task_is_redelivered() {
    let config = scenario_config();
    let broker = provisioned(&config).await;
    let producer = TaskProducer::new(Arc::new(broker.clone()), config.clone()).unwrap();
    let task = producer
        .prepare(TaskRequest::new(json!({"job": "resize"}), 6).queue("q3"))
        .unwrap();
    producer.submit(&task).await.unwrap();

    // A worker that takes the task and dies before acknowledging it
    {
        let conn = broker.connect(&config.broker_url).await.unwrap();
        let mut consumer = conn.consume(&["q3".to_string()], 1).await.unwrap();
        let delivery = consumer.next().await.unwrap().unwrap();
        assert!(!delivery.redelivered);
        assert_eq!(broker.unacked(), 1);
    }
    assert_eq!(broker.unacked(), 0);
    assert_eq!(broker.depth("q3"), Some(1));

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(
        &broker,
        &config,
        "w2",
        Arc::new(ProcessorRegistry::with_defaults()),
        &shutdown,
    );
    wait_until_settled(&broker, &config).await;
    shutdown.cancel();
    assert_eq!(handle.await.unwrap().unwrap().processed, 1);

    let results = results(&broker, "result_q");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].processed_value, json!({"job": "resize"}));
    assert_eq!(results[0].priority.value(), 6);
}

#[tokio::test]
async fn test_result_publish_failure_still_acknowledges_task() {
    let config = scenario_config();
    let broker = provisioned(&config).await;
    let producer = TaskProducer::new(Arc::new(broker.clone()), config.clone()).unwrap();
    let task = producer.prepare(TaskRequest::new(json!("x"), 2)).unwrap();
    producer.submit(&task).await.unwrap();
    broker.set_fail_publishes(true);

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(
        &broker,
        &config,
        "w1",
        Arc::new(ProcessorRegistry::with_defaults()),
        &shutdown,
    );
    wait_until_settled(&broker, &config).await;
    shutdown.cancel();
    let summary = handle.await.unwrap().unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.publish_failures, 1);
    assert_eq!(broker.metrics().event_count("acked", &task.target_queue), 1);
    assert_eq!(broker.depth("result_q"), Some(0));
}

#[tokio::test]
async fn test_reprovisioning_keeps_declarations_stable() {
    let config = scenario_config();
    let broker = provisioned(&config).await;
    let provisioner = QueueProvisioner::new(Arc::new(broker.clone()), config.broker_url.clone());

    let report = provisioner
        .provision(&config.queue_names, &config.result_queue, config.max_priority)
        .await
        .unwrap();
    assert!(report.is_success());
    for queue in ["q1", "q2", "q3", "result_q"] {
        assert_eq!(broker.declaration(queue), Some(QueueDeclaration::durable(10)));
    }
}

#[tokio::test]
async fn test_submit_requires_provisioned_queue() {
    let config = scenario_config();
    let broker = MemoryBroker::new();
    let producer = TaskProducer::new(Arc::new(broker.clone()), config).unwrap();
    let task = Task::new(json!(1), Priority::new(1).unwrap(), "q1");

    assert!(producer.submit(&task).await.is_err());
    assert!(broker.queue_names().is_empty());
}
