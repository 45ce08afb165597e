use crate::error::ProcessingError;
use crate::runtime::WorkerState;
use async_trait::async_trait;
use parking_lot::RwLock;
use priq_core::DEFAULT_OPERATION;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Result type for processing functions
pub type ProcessResult = Result<Value, ProcessingError>;

/// A processing function applied to task payloads.
///
/// Tasks are delivered at least once, so implementations must tolerate
/// running again on a payload they have already seen.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, state: &WorkerState, payload: &Value) -> ProcessResult;
}

/// Registry of processors by operation name
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        ProcessorRegistry {
            processors: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in processors
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(DEFAULT_OPERATION, StatefulEchoProcessor);
        registry.register(UppercaseProcessor::OPERATION, UppercaseProcessor);
        registry
    }

    /// Register a processor, replacing any previous one for the operation
    pub fn register<P: Processor + 'static>(&self, operation: impl Into<String>, processor: P) {
        self.processors
            .write()
            .insert(operation.into(), Arc::new(processor));
    }

    pub fn get(&self, operation: &str) -> Option<Arc<dyn Processor>> {
        self.processors.read().get(operation).cloned()
    }

    pub fn has_processor(&self, operation: &str) -> bool {
        self.processors.read().contains_key(operation)
    }

    pub fn operations(&self) -> Vec<String> {
        let mut operations: Vec<String> = self.processors.read().keys().cloned().collect();
        operations.sort();
        operations
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Stores each non-null payload in the worker state and returns the stored
/// value. A null payload returns whatever the state currently holds.
pub struct StatefulEchoProcessor;

#[async_trait]
impl Processor for StatefulEchoProcessor {
    async fn process(&self, state: &WorkerState, payload: &Value) -> ProcessResult {
        if !payload.is_null() {
            state.set_data(payload.clone());
        }
        Ok(state.data())
    }
}

/// Upper-cases a string payload
pub struct UppercaseProcessor;

impl UppercaseProcessor {
    pub const OPERATION: &'static str = "text.uppercase";
}

#[async_trait]
impl Processor for UppercaseProcessor {
    async fn process(&self, _state: &WorkerState, payload: &Value) -> ProcessResult {
        payload
            .as_str()
            .map(|s| Value::String(s.to_uppercase()))
            .ok_or_else(|| ProcessingError::InvalidPayload(format!("expected a string, got {payload}")))
    }
}
