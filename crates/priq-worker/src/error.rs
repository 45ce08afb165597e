use priq_broker::TransportError;
use priq_core::CoreError;
use thiserror::Error;

/// Provisioning failures. `Connect` and `InvalidTopology` abort the whole
/// run; `Declare` is recorded against a single queue and the run continues.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Invalid queue topology: {0}")]
    InvalidTopology(#[from] CoreError),

    #[error("Failed to connect to broker: {0}")]
    Connect(TransportError),

    #[error("Failed to declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: TransportError,
    },
}

/// Raised by a processing function. The task stays unacknowledged and is
/// handed back to the broker for redelivery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("No processor registered for operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Processing failed: {0}")]
    Failed(String),
}

/// Result publishing failures. Reported, never rolled back into the task.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to encode result: {0}")]
    Serialize(#[source] CoreError),

    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] TransportError),

    #[error("Failed to declare result queue: {0}")]
    Declare(#[source] TransportError),

    #[error("Failed to publish result: {0}")]
    Publish(#[source] TransportError),
}

/// Task submission failures
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Invalid task: {0}")]
    Invalid(#[from] CoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
