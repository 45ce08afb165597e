mod config;
mod error;
mod priority;
mod queue;
mod result;
mod task;

pub use config::DispatchConfig;
pub use error::{CoreError, Result};
pub use priority::Priority;
pub use queue::{QueueDeclaration, QueueName, QueueTopology, RoutingTable};
pub use result::TaskResult;
pub use task::{Task, TaskId, DEFAULT_OPERATION};

/// Maximum priority level supported by declared queues.
pub const MAX_PRIORITY: u8 = 10;

/// Content type attached to every message this system publishes.
pub const JSON_CONTENT_TYPE: &str = "application/json";
