//! Core error types.
//!
//! All workflow-engine subsystems surface errors through [`CoreError`], which
//! is the single error type returned by every public API in this crate. Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the workflow-engine core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // -- Protocol errors ------------------------------------------------------
    /// A `WorkflowTask` was built with a `required_role` that does not match
    /// its `stage` (violates I4).
    #[error("stage/role mismatch: stage {stage} requires role {expected_role}, got {actual_role}")]
    StageRoleMismatch {
        stage: String,
        expected_role: String,
        actual_role: String,
    },

    /// A wire payload could not be deserialized into the expected type.
    #[error("malformed payload on topic {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    // -- State-machine errors --------------------------------------------------
    /// The engine has no state registered for the given workflow id.
    #[error("unknown workflow: {workflow_id}")]
    UnknownWorkflow { workflow_id: Uuid },

    /// The workflow has already reached a terminal state and cannot accept
    /// further results.
    #[error("workflow {workflow_id} is already terminal ({status})")]
    WorkflowTerminal { workflow_id: Uuid, status: String },

    // -- Internal ---------------------------------------------------------------
    /// Catch-all for invariant violations or unexpected internal state.
    /// Prefer a typed variant whenever possible.
    #[error("internal core error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
