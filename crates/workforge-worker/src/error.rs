//! Worker error types (Provider/Protocol taxonomy, §7).

use uuid::Uuid;

/// Unified error type for worker-side components.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// An incoming bus payload did not deserialize as a `WorkflowTask`.
    #[error("malformed task payload: {reason}")]
    MalformedTask { reason: String },

    /// A task was routed to this worker for a role it does not serve.
    #[error("task {task_id} requires role {required}, this worker serves {actual}")]
    RoleMismatch {
        task_id: Uuid,
        required: String,
        actual: String,
    },

    /// No execution strategy could be selected for a task.
    #[error("routing failed: {reason}")]
    RoutingFailed { reason: String },

    /// The chosen provider failed to produce a response.
    #[error("provider `{provider}` generate failed: {reason}")]
    ProviderFailed { provider: String, reason: String },

    /// The provider call did not complete before the configured deadline.
    #[error("provider `{provider}` timed out after {elapsed_ms} ms")]
    ProviderTimeout { provider: String, elapsed_ms: u64 },

    /// Publishing the result or a status update failed after exhausting retries.
    #[error("bus error: {0}")]
    Bus(#[from] workforge_bus::BusError),

    /// Propagated from the shared data model / classifier.
    #[error("core error: {0}")]
    Core(#[from] workforge_core::CoreError),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal worker error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the worker crate.
pub type Result<T> = std::result::Result<T, WorkerError>;
