use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Prometheus metrics for a worker process
pub struct WorkerMetrics {
    pub registry: Registry,

    // Tasks by outcome (processed, failed, rejected) and operation
    pub tasks_total: IntCounterVec,

    // Result publishes by outcome (published, failed)
    pub results_total: IntCounterVec,

    pub task_processing_duration: HistogramVec,
}

impl WorkerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("priq_tasks_total", "Tasks handled by outcome and operation"),
            &["status", "operation"],
        )?;
        registry.register(Box::new(tasks_total.clone()))?;

        let results_total = IntCounterVec::new(
            Opts::new("priq_results_total", "Result publishes by outcome"),
            &["status"],
        )?;
        registry.register(Box::new(results_total.clone()))?;

        let task_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "priq_task_processing_duration_seconds",
                "Task processing duration in seconds",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(task_processing_duration.clone()))?;

        Ok(WorkerMetrics {
            registry,
            tasks_total,
            results_total,
            task_processing_duration,
        })
    }

    pub fn inc_tasks(&self, status: &str, operation: &str) {
        self.tasks_total.with_label_values(&[status, operation]).inc();
    }

    pub fn inc_results(&self, status: &str) {
        self.results_total.with_label_values(&[status]).inc();
    }

    pub fn observe_processing_duration(&self, operation: &str, duration_secs: f64) {
        self.task_processing_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn tasks(&self, status: &str, operation: &str) -> u64 {
        self.tasks_total.with_label_values(&[status, operation]).get()
    }

    pub fn results(&self, status: &str) -> u64 {
        self.results_total.with_label_values(&[status]).get()
    }

    /// Text exposition of every metric in the registry
    pub fn render(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            return format!("# failed to encode metrics: {e}\n");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create worker metrics")
    }
}
