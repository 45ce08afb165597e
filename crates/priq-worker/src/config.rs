use priq_core::DispatchConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queue names, routes and broker location shared with producers
    pub dispatch: DispatchConfig,
    pub worker_id: Option<String>,
    /// Number of worker instances to run, each with its own state
    pub workers: usize,
    /// Unacknowledged deliveries a worker may hold at once
    pub prefetch: usize,
    /// Deliveries after which a failing task is dead-lettered instead of requeued
    pub max_deliveries: Option<u32>,
    pub dead_letter_queue: Option<String>,
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            dispatch: DispatchConfig::default(),
            worker_id: None,
            workers: 1,
            prefetch: 1,
            max_deliveries: Some(3),
            dead_letter_queue: Some("dead_letter".to_string()),
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.dispatch.validate()?;
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.prefetch == 0 {
            anyhow::bail!("prefetch must be at least 1");
        }
        if let Some(dlq) = &self.dead_letter_queue {
            if self.dispatch.queue_names.contains(dlq) || *dlq == self.dispatch.result_queue {
                anyhow::bail!("dead letter queue {dlq} collides with a configured queue");
            }
        }
        Ok(())
    }

    /// Worker id for the `index`-th worker of this process
    pub fn worker_id(&self, index: usize) -> String {
        let base = match &self.worker_id {
            Some(id) => id.clone(),
            None => {
                let pid = std::process::id();
                let random = Uuid::new_v4().simple().to_string();
                format!("worker-{}-{}", pid, &random[..8])
            }
        };

        if self.workers > 1 {
            format!("{base}-{index}")
        } else {
            base
        }
    }
}
