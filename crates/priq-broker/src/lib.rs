mod error;
mod memory;
mod metrics;
mod queue;
mod transport;

pub use error::{Result, TransportError};
pub use memory::{DeadLetterPolicy, MemoryBroker, MEMORY_SCHEME};
pub use metrics::BrokerMetrics;
pub use transport::{Connection, Consumer, Delivery, DeliveryTag, OutboundMessage, Transport};
