use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unsupported broker url: {0}")]
    InvalidUrl(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Precondition failed for queue {queue}: {reason}")]
    PreconditionFailed { queue: String, reason: String },

    #[error("Publish to {queue} rejected: {reason}")]
    PublishRejected { queue: String, reason: String },

    #[error("Prefetch limit of {0} unacknowledged deliveries reached")]
    PrefetchExceeded(usize),

    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("Connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
