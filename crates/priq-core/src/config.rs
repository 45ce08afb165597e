use crate::{CoreError, QueueName, QueueTopology, Result, RoutingTable, DEFAULT_OPERATION, MAX_PRIORITY};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Queue names, broker location and routing shared by the provisioner,
/// producer, dispatcher and publisher. Passed explicitly to each of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub broker_url: String,
    pub queue_names: Vec<QueueName>,
    pub result_queue: QueueName,
    pub max_priority: u8,
    /// Routes are only those listed in the file; none are inherited.
    #[serde(default)]
    pub routes: RoutingTable,
    /// Also write the priority into the result body (it is always sent as
    /// the message priority).
    pub include_priority_in_payload: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let queue_names: Vec<QueueName> = vec![
            "queue1".to_string(),
            "queue2".to_string(),
            "queue3".to_string(),
        ];
        let routes = RoutingTable::new().with_route(DEFAULT_OPERATION, &queue_names.join(","));

        DispatchConfig {
            broker_url: "memory://localhost".to_string(),
            queue_names,
            result_queue: "result_queue".to_string(),
            max_priority: MAX_PRIORITY,
            routes,
            include_priority_in_payload: false,
        }
    }
}

impl DispatchConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: DispatchConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Queue declarations for every configured queue
    pub fn topology(&self) -> Result<QueueTopology> {
        QueueTopology::builder()
            .work_queues(self.queue_names.iter().cloned())
            .result_queue(self.result_queue.clone())
            .max_priority(self.max_priority)
            .build()
    }

    /// Queue used when neither the task nor its route names one
    pub fn default_queue(&self) -> Result<&QueueName> {
        self.queue_names
            .first()
            .ok_or_else(|| CoreError::InvalidConfig("no work queues configured".to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let topology = self.topology()?;
        self.routes.validate(&topology)
    }
}
