use crate::{Priority, Result, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of processing one task, published to the result queue.
///
/// `priority` travels as the message's transport priority. It is left out of
/// the JSON body unless the publisher is configured to include it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(rename = "original_data")]
    pub original_task_payload: Value,

    #[serde(rename = "processed_result")]
    pub processed_value: Value,

    pub timestamp: DateTime<Utc>,

    #[serde(skip)]
    pub priority: Priority,
}

impl TaskResult {
    /// Build the result for `task`, stamped with the current time.
    pub fn for_task(task: &Task, processed_value: Value) -> Self {
        TaskResult {
            original_task_payload: task.payload.clone(),
            processed_value,
            timestamp: Utc::now(),
            priority: task.priority,
        }
    }

    /// Encode as a JSON object; `include_priority` adds a `priority` field.
    pub fn to_json_bytes(&self, include_priority: bool) -> Result<Vec<u8>> {
        let mut body = serde_json::to_value(self)?;
        if include_priority {
            if let Value::Object(map) = &mut body {
                map.insert("priority".to_string(), Value::from(self.priority.value()));
            }
        }
        Ok(serde_json::to_vec(&body)?)
    }

    /// Decode a result body; the priority comes from the message, not the body.
    pub fn from_json_slice(bytes: &[u8], priority: Priority) -> Result<Self> {
        let mut result: TaskResult = serde_json::from_slice(bytes)?;
        result.priority = priority;
        Ok(result)
    }
}
