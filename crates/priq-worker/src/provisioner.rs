use crate::error::ProvisionError;
use priq_broker::{Transport, TransportError};
use priq_core::{CoreError, QueueDeclaration, QueueName, QueueTopology, MAX_PRIORITY};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to a single queue during provisioning
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome {
    Declared {
        declaration: QueueDeclaration,
        /// Messages dropped along with the previous incarnation of the queue
        purged: usize,
    },
    Failed(String),
}

/// Per-queue outcomes in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionReport {
    pub queues: Vec<(QueueName, QueueOutcome)>,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.queues
            .iter()
            .all(|(_, outcome)| matches!(outcome, QueueOutcome::Declared { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&QueueName, &str)> {
        self.queues.iter().filter_map(|(name, outcome)| match outcome {
            QueueOutcome::Failed(reason) => Some((name, reason.as_str())),
            QueueOutcome::Declared { .. } => None,
        })
    }

    pub fn outcome(&self, queue: &str) -> Option<&QueueOutcome> {
        self.queues
            .iter()
            .find(|(name, _)| name.as_str() == queue)
            .map(|(_, outcome)| outcome)
    }
}

/// Resets the work and result queues to a clean, priority-enabled state.
///
/// Every queue is deleted and declared again, so queued messages are lost.
/// Failures on one queue do not stop the others, so a run may leave the
/// topology partially provisioned; the report says which queues made it.
pub struct QueueProvisioner {
    transport: Arc<dyn Transport>,
    broker_url: String,
}

impl QueueProvisioner {
    pub fn new(transport: Arc<dyn Transport>, broker_url: impl Into<String>) -> Self {
        QueueProvisioner {
            transport,
            broker_url: broker_url.into(),
        }
    }

    /// Provision the union of `queue_names` and `result_queue`. A work queue
    /// that repeats the result queue is declared once, and an empty work set
    /// provisions the result queue alone.
    pub async fn provision(
        &self,
        queue_names: &[QueueName],
        result_queue: &str,
        max_priority: u8,
    ) -> Result<ProvisionReport, ProvisionError> {
        if max_priority > MAX_PRIORITY {
            return Err(CoreError::InvalidPriority {
                value: max_priority,
                max: MAX_PRIORITY,
            }
            .into());
        }
        let declaration = QueueDeclaration::durable(max_priority);

        let mut queues: Vec<(QueueName, QueueDeclaration)> = Vec::new();
        for name in queue_names {
            if name == result_queue || queues.iter().any(|(existing, _)| existing == name) {
                continue;
            }
            queues.push((name.clone(), declaration));
        }
        queues.push((result_queue.to_string(), declaration));

        self.provision_queues(&queues).await
    }

    pub async fn provision_topology(&self, topology: &QueueTopology) -> Result<ProvisionReport, ProvisionError> {
        let queues: Vec<(QueueName, QueueDeclaration)> = topology
            .iter()
            .map(|(name, declaration)| (name.clone(), *declaration))
            .collect();
        self.provision_queues(&queues).await
    }

    async fn provision_queues(
        &self,
        queues: &[(QueueName, QueueDeclaration)],
    ) -> Result<ProvisionReport, ProvisionError> {
        let connection = self
            .transport
            .connect(&self.broker_url)
            .await
            .map_err(ProvisionError::Connect)?;

        let mut report = ProvisionReport::default();
        for (name, declaration) in queues {
            let purged = match connection.delete_queue(name).await {
                Ok(dropped) => dropped,
                Err(TransportError::QueueNotFound(_)) => {
                    warn!(queue = %name, "Queue did not exist, nothing to delete");
                    0
                }
                Err(e) => {
                    warn!(queue = %name, error = %e, "Failed to delete queue, declaring anyway");
                    0
                }
            };

            let outcome = match connection.declare_queue(name, *declaration).await {
                Ok(()) => {
                    info!(
                        queue = %name,
                        max_priority = declaration.max_priority,
                        purged,
                        "Queue declared"
                    );
                    QueueOutcome::Declared {
                        declaration: *declaration,
                        purged,
                    }
                }
                Err(source) => {
                    let e = ProvisionError::Declare {
                        queue: name.clone(),
                        source,
                    };
                    error!(queue = %name, error = %e, "Queue declaration failed");
                    QueueOutcome::Failed(e.to_string())
                }
            };
            report.queues.push((name.clone(), outcome));
        }

        info!(
            queues = report.queues.len(),
            success = report.is_success(),
            "Provisioning finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use priq_broker::{MemoryBroker, OutboundMessage};
    use priq_core::Priority;

    const URL: &str = "memory://localhost";

    fn names(names: &[&str]) -> Vec<QueueName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn provisioner(broker: &MemoryBroker) -> QueueProvisioner {
        QueueProvisioner::new(Arc::new(broker.clone()), URL)
    }

    #[tokio::test]
    async fn test_provision_declares_every_queue() {
        let broker = MemoryBroker::new();
        let report = provisioner(&broker)
            .provision(&names(&["q1", "q2", "q3"]), "result_q", 10)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.queues.len(), 4);
        for queue in ["q1", "q2", "q3", "result_q"] {
            assert_eq!(broker.declaration(queue), Some(QueueDeclaration::durable(10)));
        }
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_provision_twice_is_idempotent() {
        let broker = MemoryBroker::new();
        let provisioner = provisioner(&broker);
        let queues = names(&["q1", "q2"]);

        let first = provisioner.provision(&queues, "result_q", 10).await.unwrap();
        let second = provisioner.provision(&queues, "result_q", 10).await.unwrap();

        assert!(first.is_success());
        assert_eq!(first, second);
        assert_eq!(broker.queue_names(), vec!["q1", "q2", "result_q"]);
    }

    #[tokio::test]
    async fn test_provision_purges_and_changes_max_priority() {
        let broker = MemoryBroker::new();
        let conn = broker.connect(URL).await.unwrap();
        conn.declare_queue("q1", QueueDeclaration::durable(3)).await.unwrap();
        conn.publish("q1", OutboundMessage::json("\"old\"", Priority::LOWEST))
            .await
            .unwrap();
        drop(conn);

        let report = provisioner(&broker)
            .provision(&names(&["q1"]), "result_q", 10)
            .await
            .unwrap();

        assert_eq!(
            report.outcome("q1"),
            Some(&QueueOutcome::Declared {
                declaration: QueueDeclaration::durable(10),
                purged: 1,
            })
        );
        assert_eq!(broker.depth("q1"), Some(0));
    }

    #[tokio::test]
    async fn test_declare_failure_does_not_stop_other_queues() {
        let broker = MemoryBroker::new();
        broker.reject_declares_for("q2");

        let report = provisioner(&broker)
            .provision(&names(&["q1", "q2", "q3"]), "result_q", 10)
            .await
            .unwrap();

        assert!(!report.is_success());
        let failed: Vec<_> = report.failed().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["q2"]);
        assert!(broker.declaration("q1").is_some());
        assert!(broker.declaration("q3").is_some());
        assert!(broker.declaration("result_q").is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_aborts() {
        let broker = MemoryBroker::new();
        broker.set_refuse_connections(true);
        let err = provisioner(&broker)
            .provision(&names(&["q1"]), "result_q", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Connect(_)));
    }

    #[tokio::test]
    async fn test_result_queue_listed_as_work_queue_is_declared_once() {
        let broker = MemoryBroker::new();
        let report = provisioner(&broker)
            .provision(&names(&["q1", "result_q", "q1"]), "result_q", 10)
            .await
            .unwrap();

        assert!(report.is_success());
        let declared: Vec<_> = report.queues.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(declared, vec!["q1", "result_q"]);
        assert_eq!(broker.queue_names(), vec!["q1", "result_q"]);
        assert_eq!(broker.declaration("result_q"), Some(QueueDeclaration::durable(10)));
    }

    #[tokio::test]
    async fn test_empty_work_set_provisions_result_queue_only() {
        let broker = MemoryBroker::new();
        let report = provisioner(&broker).provision(&[], "result_q", 10).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.queues.len(), 1);
        assert_eq!(broker.queue_names(), vec!["result_q"]);
    }

    #[tokio::test]
    async fn test_provision_topology_declares_topology_queues() {
        let broker = MemoryBroker::new();
        let topology = QueueTopology::builder()
            .work_queues(["q1", "q2"])
            .result_queue("result_q")
            .max_priority(5)
            .build()
            .unwrap();

        let report = provisioner(&broker).provision_topology(&topology).await.unwrap();
        assert!(report.is_success());
        assert_eq!(broker.queue_names(), vec!["q1", "q2", "result_q"]);
        assert_eq!(broker.declaration("q2"), Some(QueueDeclaration::durable(5)));
    }

    #[tokio::test]
    async fn test_invalid_topology_is_rejected() {
        let broker = MemoryBroker::new();
        let err = provisioner(&broker)
            .provision(&names(&["q1"]), "result_q", 11)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidTopology(_)));
        assert!(broker.queue_names().is_empty());
    }
}
