use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Context shared by every task a worker process handles.
#[derive(Debug)]
pub struct WorkerState {
    instance_id: Uuid,
    created_at: DateTime<Utc>,
    data: RwLock<Value>,
}

impl WorkerState {
    fn new(seed: Option<Value>) -> Self {
        WorkerState {
            instance_id: Uuid::new_v4(),
            created_at: Utc::now(),
            data: RwLock::new(seed.unwrap_or(Value::Null)),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current value of the data slot
    pub fn data(&self) -> Value {
        self.data.read().clone()
    }

    pub fn set_data(&self, value: Value) {
        *self.data.write() = value;
    }
}

/// Owns the process's [`WorkerState`] and hands out shared references to it.
///
/// A worker process owns exactly one runtime, and the runtime builds its
/// state at most once: eagerly from the process-start hook, or lazily from
/// the first task when the hook did not run. Concurrent first calls block on
/// the same initializer, so construction never races.
pub struct WorkerRuntime {
    worker_id: String,
    state: OnceCell<Arc<WorkerState>>,
}

impl WorkerRuntime {
    pub fn new(worker_id: impl Into<String>) -> Self {
        WorkerRuntime {
            worker_id: worker_id.into(),
            state: OnceCell::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Return the process's state, building it from `seed` on the first call.
    /// Seeds passed after the state exists are ignored.
    pub fn get_or_init(&self, seed: Option<Value>) -> Arc<WorkerState> {
        if let Some(state) = self.state.get() {
            if seed.is_some() {
                debug!(worker_id = %self.worker_id, "Worker state already initialized, ignoring seed");
            }
            return state.clone();
        }

        self.state
            .get_or_init(|| {
                let state = WorkerState::new(seed);
                info!(
                    worker_id = %self.worker_id,
                    instance_id = %state.instance_id,
                    "Initialized worker state"
                );
                Arc::new(state)
            })
            .clone()
    }

    /// Process-start hook: build the state before the first task arrives.
    pub fn on_process_start(&self) -> Arc<WorkerState> {
        info!(worker_id = %self.worker_id, "Initializing worker process");
        self.get_or_init(None)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }
}
