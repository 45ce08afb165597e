use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use priq_broker::{DeadLetterPolicy, MemoryBroker, Transport};
use priq_core::{QueueDeclaration, TaskResult};
use priq_worker::{
    Dispatcher, ProcessorRegistry, ProvisionReport, QueueOutcome, QueueProvisioner, ResultPublisher,
    TaskProducer, TaskRequest, Worker, WorkerConfig, WorkerMetrics, WorkerRuntime, WorkerSummary,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "priq-worker")]
#[command(about = "Priority-aware multi-queue task worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Broker URL (overrides the configuration file)
    #[arg(short, long)]
    broker_url: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete and re-declare every queue on a throwaway in-process broker (nothing persists after exit)
    Provision,

    /// Provision, submit a task file, and process it to completion
    Run {
        /// YAML or JSON list of tasks
        #[arg(short, long)]
        tasks: String,

        /// Number of workers (overrides the configuration file)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    // Override with CLI args
    if let Some(broker_url) = args.broker_url {
        config.dispatch.broker_url = broker_url;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }
    if let Commands::Run {
        workers: Some(workers),
        ..
    } = &args.command
    {
        config.workers = *workers;
    }
    config.validate()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let broker = build_broker(&config);
    let transport: Arc<dyn Transport> = Arc::new(broker.clone());

    let report = provision(&config, transport.clone()).await?;
    print_report(&report, &args.format)?;

    match args.command {
        Commands::Provision => {
            if !report.is_success() {
                anyhow::bail!("provisioning left some queues undeclared");
            }
        }

        Commands::Run {
            tasks,
            print_metrics,
            ..
        } => {
            if !report.is_success() {
                anyhow::bail!("provisioning failed, not starting workers");
            }

            let requests = load_requests(&tasks)?;
            let producer = TaskProducer::new(transport.clone(), config.dispatch.clone())?;
            let prepared = requests
                .into_iter()
                .map(|request| producer.prepare(request))
                .collect::<Result<Vec<_>, _>>()?;
            producer.submit_all(&prepared).await?;

            let metrics = Arc::new(WorkerMetrics::new()?);
            let summary = run_workers(&config, &broker, transport, metrics.clone()).await?;

            let results = broker
                .drain(&config.dispatch.result_queue)
                .into_iter()
                .map(|message| TaskResult::from_json_slice(&message.body, message.priority))
                .collect::<Result<Vec<_>, _>>()?;
            print_results(&results, &summary, &args.format)?;

            if print_metrics {
                print!("{}", metrics.render());
                print!("{}", broker.metrics().render());
            }
        }
    }

    Ok(())
}

fn build_broker(config: &WorkerConfig) -> MemoryBroker {
    let broker = MemoryBroker::new();
    match (&config.dead_letter_queue, config.max_deliveries) {
        (Some(queue), Some(max_deliveries)) => broker.with_dead_letter(DeadLetterPolicy {
            queue: queue.clone(),
            max_deliveries,
        }),
        _ => broker,
    }
}

async fn provision(config: &WorkerConfig, transport: Arc<dyn Transport>) -> anyhow::Result<ProvisionReport> {
    let dispatch = &config.dispatch;
    let provisioner = QueueProvisioner::new(transport.clone(), dispatch.broker_url.clone());
    let report = provisioner
        .provision(&dispatch.queue_names, &dispatch.result_queue, dispatch.max_priority)
        .await?;

    if let Some(dlq) = &config.dead_letter_queue {
        let connection = transport.connect(&dispatch.broker_url).await?;
        connection
            .declare_queue(dlq, QueueDeclaration::durable(dispatch.max_priority))
            .await?;
    }

    Ok(report)
}

fn load_requests(path: &str) -> anyhow::Result<Vec<TaskRequest>> {
    let contents = std::fs::read_to_string(path)?;
    // YAML is a superset of JSON, so one parser covers both formats
    let requests: Vec<TaskRequest> = serde_yaml::from_str(&contents)?;
    tracing::info!("Loaded {} tasks from {}", requests.len(), path);
    Ok(requests)
}

async fn run_workers(
    config: &WorkerConfig,
    broker: &MemoryBroker,
    transport: Arc<dyn Transport>,
    metrics: Arc<WorkerMetrics>,
) -> anyhow::Result<WorkerSummary> {
    let dispatch = &config.dispatch;
    let processors = Arc::new(ProcessorRegistry::with_defaults());
    tracing::info!("Registered operations: {:?}", processors.operations());

    let shutdown = CancellationToken::new();
    let mut workers = JoinSet::new();
    for index in 0..config.workers {
        let runtime = Arc::new(WorkerRuntime::new(config.worker_id(index)));
        let publisher = ResultPublisher::new(transport.clone(), dispatch, metrics.clone());
        let dispatcher = Dispatcher::new(runtime, processors.clone(), publisher, metrics.clone());
        let worker = Worker::new(
            transport.clone(),
            dispatch.broker_url.clone(),
            dispatch.queue_names.clone(),
            config.prefetch,
            dispatcher,
        );

        let token = shutdown.child_token();
        workers.spawn(async move { worker.run(token).await });
    }

    // Handle shutdown signals
    let mut total = WorkerSummary::default();
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
            finished = workers.join_next() => match finished {
                Some(joined) => total.merge(&joined??),
                None => {
                    tracing::warn!("All workers stopped before the queues drained");
                    break;
                }
            },
            _ = poll.tick() => {
                let idle = dispatch
                    .queue_names
                    .iter()
                    .all(|queue| broker.depth(queue).unwrap_or(0) == 0);
                if idle && broker.unacked() == 0 {
                    tracing::info!("All tasks settled");
                    break;
                }
            }
        }
    }
    shutdown.cancel();

    while let Some(joined) = workers.join_next().await {
        total.merge(&joined??);
    }
    Ok(total)
}

fn print_report(report: &ProvisionReport, format: &str) -> anyhow::Result<()> {
    match format {
        "json" => {
            let queues: Vec<serde_json::Value> = report
                .queues
                .iter()
                .map(|(name, outcome)| match outcome {
                    QueueOutcome::Declared { declaration, purged } => serde_json::json!({
                        "queue": name,
                        "status": "declared",
                        "max_priority": declaration.max_priority,
                        "purged": purged,
                    }),
                    QueueOutcome::Failed(reason) => serde_json::json!({
                        "queue": name,
                        "status": "failed",
                        "error": reason,
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&queues)?);
        }
        _ => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Queue", "Status", "Max Priority", "Purged"]);
            for (name, outcome) in &report.queues {
                match outcome {
                    QueueOutcome::Declared { declaration, purged } => table.add_row(vec![
                        name.clone(),
                        "declared".to_string(),
                        declaration.max_priority.to_string(),
                        purged.to_string(),
                    ]),
                    QueueOutcome::Failed(reason) => table.add_row(vec![
                        name.clone(),
                        format!("failed: {reason}"),
                        String::new(),
                        String::new(),
                    ]),
                };
            }
            println!("{table}");
        }
    }
    Ok(())
}

fn print_results(results: &[TaskResult], summary: &WorkerSummary, format: &str) -> anyhow::Result<()> {
    match format {
        "json" => {
            let output = serde_json::json!({
                "processed": summary.processed,
                "failed": summary.failed,
                "rejected": summary.rejected,
                "publish_failures": summary.publish_failures,
                "results": results
                    .iter()
                    .map(|r| serde_json::json!({
                        "priority": r.priority.value(),
                        "original_data": r.original_task_payload,
                        "processed_result": r.processed_value,
                        "timestamp": r.timestamp.to_rfc3339(),
                    }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Priority", "Original", "Processed", "Timestamp"]);
            for result in results {
                table.add_row(vec![
                    result.priority.value().to_string(),
                    result.original_task_payload.to_string(),
                    result.processed_value.to_string(),
                    result.timestamp.to_rfc3339(),
                ]);
            }
            println!("{table}");
            println!(
                "Processed: {}  Failed: {}  Rejected: {}  Unpublished results: {}",
                summary.processed, summary.failed, summary.rejected, summary.publish_failures
            );
        }
    }
    Ok(())
}
