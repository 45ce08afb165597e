pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod producer;
pub mod provisioner;
pub mod publisher;
pub mod runtime;
pub mod worker;

pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, Handled};
pub use error::{ProcessingError, ProvisionError, PublishError, SubmitError};
pub use metrics::WorkerMetrics;
pub use processor::{ProcessResult, Processor, ProcessorRegistry, StatefulEchoProcessor, UppercaseProcessor};
pub use producer::{TaskProducer, TaskRequest};
pub use provisioner::{ProvisionReport, QueueOutcome, QueueProvisioner};
pub use publisher::ResultPublisher;
pub use runtime::{WorkerRuntime, WorkerState};
pub use worker::{Worker, WorkerSummary};
