//! Wire data model shared by the orchestrator and every worker.
//!
//! Every type here is serialized to JSON on the bus (§6 of the design doc).
//! Unknown fields on deserialization are ignored by `serde`'s default
//! behavior, satisfying the forward-compatibility requirement on the wire
//! format.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// A pipeline stage. Fixed four-stage pipeline; the engine never introduces
/// stages beyond these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Development,
    Review,
    Approval,
    Testing,
}

impl Stage {
    /// The role that uniquely corresponds to this stage (I4).
    pub fn required_role(self) -> Role {
        match self {
            Stage::Development => Role::Developer,
            Stage::Review => Role::Reviewer,
            Stage::Approval => Role::Approver,
            Stage::Testing => Role::Tester,
        }
    }

    /// The bus topic a task for this stage is published on.
    pub fn task_topic(self) -> String {
        format!("tasks/workflow/{}", self.as_str())
    }

    /// The bus topic a result for this stage is published on.
    pub fn result_topic(self) -> String {
        format!("results/workflow/{}", self.as_str())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Development => "development",
            Stage::Review => "review",
            Stage::Approval => "approval",
            Stage::Testing => "testing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker capability, bound one-to-one with a [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    Reviewer,
    Approver,
    Tester,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Reviewer => "reviewer",
            Role::Approver => "approver",
            Role::Tester => "tester",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "developer" => Ok(Role::Developer),
            "reviewer" => Ok(Role::Reviewer),
            "approver" => Ok(Role::Approver),
            "tester" => Ok(Role::Tester),
            other => Err(CoreError::Internal(format!("unknown role: {other}"))),
        }
    }
}

/// An immutable unit of work, as accepted from a client before the
/// orchestrator attaches workflow-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: HashMap<String, String>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            created_at: Utc::now(),
        }
    }
}

/// A [`Task`] dispatched by the orchestrator to a single stage's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: HashMap<String, String>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,

    pub workflow_id: Uuid,
    pub stage: Stage,
    pub required_role: Role,
    pub previous_output: String,
    pub review_feedback: String,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl WorkflowTask {
    /// Build a task for `stage`, filling `required_role` from I4.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_id: Uuid,
        task_type: impl Into<String>,
        payload: HashMap<String, String>,
        stage: Stage,
        previous_output: impl Into<String>,
        review_feedback: impl Into<String>,
        retry_count: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            created_at: Utc::now(),
            workflow_id,
            stage,
            required_role: stage.required_role(),
            previous_output: previous_output.into(),
            review_feedback: review_feedback.into(),
            retry_count,
            max_retries,
        }
    }

    /// Validate I4: `required_role` must match `stage`.
    pub fn validate(&self) -> Result<()> {
        let expected = self.stage.required_role();
        if self.required_role != expected {
            return Err(CoreError::StageRoleMismatch {
                stage: self.stage.to_string(),
                expected_role: expected.to_string(),
                actual_role: self.required_role.to_string(),
            });
        }
        Ok(())
    }
}

/// A worker's outcome for a [`WorkflowTask`], published back to the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub task_id: Uuid,
    pub workflow_id: Uuid,
    pub stage: Stage,
    pub worker_id: String,
    pub worker_role: Role,
    pub success: bool,
    pub result: String,
    pub error: String,
    pub approved: bool,
    pub requires_retry: bool,
    pub review_feedback: String,
    pub processed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Running status of a single workflow instance, exclusively owned by the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_stage: Stage,
    pub current_output: String,
    pub review_feedback: String,
    pub stage_attempts: HashMap<Stage, u32>,
    pub total_transitions: u32,
    pub status: WorkflowStatus,
    pub failure_reason: Option<String>,
}

impl WorkflowState {
    pub fn new(task_type: impl Into<String>, payload: HashMap<String, String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            created_at: now,
            updated_at: now,
            current_stage: Stage::Development,
            current_output: String::new(),
            review_feedback: String::new(),
            stage_attempts: HashMap::new(),
            total_transitions: 0,
            status: WorkflowStatus::Running,
            failure_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Completed | WorkflowStatus::Failed
        )
    }
}

/// Lifecycle status of a [`WorkflowState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

/// Liveness/observability snapshot published periodically by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub role: Role,
    pub status: WorkerState,
    pub last_seen: DateTime<Utc>,
    pub tasks_total: u64,
    pub tasks_error: u64,
    pub current_task_id: Option<Uuid>,
    pub capabilities: WorkerCapabilities,
}

/// A worker's current busy/idle/error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    Error,
}

/// Static capability advertisement for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub stages: Vec<Stage>,
    pub languages: Vec<String>,
    pub rag_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_required_role_is_bijective() {
        assert_eq!(Stage::Development.required_role(), Role::Developer);
        assert_eq!(Stage::Review.required_role(), Role::Reviewer);
        assert_eq!(Stage::Approval.required_role(), Role::Approver);
        assert_eq!(Stage::Testing.required_role(), Role::Tester);
    }

    #[test]
    fn workflow_task_validate_accepts_matching_role() {
        let task = WorkflowTask::new(
            Uuid::now_v7(),
            "create_document",
            HashMap::new(),
            Stage::Development,
            "",
            "",
            0,
            3,
        );
        assert!(task.validate().is_ok());
    }

    #[test]
    fn workflow_task_validate_rejects_mismatched_role() {
        let mut task = WorkflowTask::new(
            Uuid::now_v7(),
            "create_document",
            HashMap::new(),
            Stage::Development,
            "",
            "",
            0,
            3,
        );
        task.required_role = Role::Tester;
        assert!(matches!(
            task.validate(),
            Err(CoreError::StageRoleMismatch { .. })
        ));
    }

    #[test]
    fn new_workflow_state_starts_in_development_running() {
        let state = WorkflowState::new("create_document", HashMap::new());
        assert_eq!(state.current_stage, Stage::Development);
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.total_transitions, 0);
        assert!(state.stage_attempts.is_empty());
        assert!(!state.is_terminal());
    }

    #[test]
    fn round_trip_workflow_task_json() {
        let task = WorkflowTask::new(
            Uuid::now_v7(),
            "create_document",
            HashMap::from([("document_type".to_string(), "coding_standards".to_string())]),
            Stage::Review,
            "draft A",
            "",
            1,
            3,
        );
        let json = serde_json::to_string(&task).unwrap();
        let back: WorkflowTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.workflow_id, task.workflow_id);
        assert_eq!(back.stage, task.stage);
        assert_eq!(back.required_role, task.required_role);
        assert_eq!(back.previous_output, task.previous_output);
    }

    #[test]
    fn round_trip_ignores_unknown_fields() {
        let json = r#"{
            "id": "018f1e0a-0000-7000-8000-000000000000",
            "type": "create_document",
            "payload": {},
            "priority": 0,
            "created_at": "2026-01-01T00:00:00Z",
            "workflow_id": "018f1e0a-0000-7000-8000-000000000001",
            "stage": "development",
            "required_role": "developer",
            "previous_output": "",
            "review_feedback": "",
            "retry_count": 0,
            "max_retries": 3,
            "from_the_future": "ignored"
        }"#;
        let task: WorkflowTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.stage, Stage::Development);
    }
}
