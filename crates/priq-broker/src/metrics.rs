use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Prometheus metrics for the in-memory broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Message counters by event (published, delivered, acked, ...) and queue
    pub messages_total: IntCounterVec,

    // Ready messages per queue
    pub queue_depth: IntGaugeVec,

    pub connections_open: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new("priq_broker_messages_total", "Messages by broker event and queue"),
            &["event", "queue"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("priq_broker_queue_depth", "Ready messages per queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let connections_open =
            IntGauge::new("priq_broker_connections_open", "Number of open connections")?;
        registry.register(Box::new(connections_open.clone()))?;

        Ok(BrokerMetrics {
            registry,
            messages_total,
            queue_depth,
            connections_open,
        })
    }

    pub fn inc_event(&self, event: &str, queue: &str) {
        self.messages_total.with_label_values(&[event, queue]).inc();
    }

    pub fn set_depth(&self, queue: &str, depth: usize) {
        self.queue_depth
            .with_label_values(&[queue])
            .set(depth as i64);
    }

    pub fn event_count(&self, event: &str, queue: &str) -> u64 {
        self.messages_total.with_label_values(&[event, queue]).get()
    }

    pub fn render(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            return format!("# failed to encode broker metrics: {e}\n");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create broker metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled_by_event_and_queue() {
        let metrics = BrokerMetrics::new().unwrap();
        metrics.inc_event("published", "q1");
        metrics.inc_event("published", "q1");
        metrics.inc_event("acked", "q1");

        assert_eq!(metrics.event_count("published", "q1"), 2);
        assert_eq!(metrics.event_count("acked", "q1"), 1);
        assert_eq!(metrics.event_count("published", "q2"), 0);
    }
}
