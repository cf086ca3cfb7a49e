//! Workflow engine (C5) — the per-workflow state machine.
//!
//! Each workflow is a [`WorkflowState`] advanced by applying the transition
//! function `delta` (§4.5) to incoming [`WorkflowResult`]s. State for all
//! live workflows is held in a [`DashMap`] keyed by `workflow_id`; each entry
//! is additionally guarded by its own [`Mutex`] so that a single workflow's
//! engine steps are serialized (per §5) while unrelated workflows progress
//! independently and in parallel — the same sharded-map-plus-per-entry-lock
//! shape used for task bookkeeping elsewhere in this codebase.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::classifier::{classify, Outcome};
use crate::error::{CoreError, Result};
use crate::model::{Stage, WorkflowResult, WorkflowState, WorkflowStatus};

/// Engine-wide tunables. Constructed explicitly by the orchestrator binary
/// and passed into [`WorkflowEngine::new`] — no process-global config.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Hard cap on total engine steps per workflow before forced failure (I3).
    pub max_transitions: u32,
    /// Per-stage cap on consecutive provider-error retries before forced failure.
    pub max_retries: u32,
    /// Size of the per-workflow duplicate-result LRU (§4.6 item 4). Must be
    /// at least 32.
    pub result_lru_capacity: usize,
    /// Per-stage result-wait liveness timeout. The engine itself has no
    /// clock; this is read back by the orchestrator's timer loop so the one
    /// config struct is the single source of truth for both (§10.3).
    pub stage_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transitions: 15,
            max_retries: 3,
            result_lru_capacity: DUPLICATE_LRU_CAPACITY,
            stage_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// The two kinds of back-edge the engine guards against infinite looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackEdgeKind {
    ApprovalToReview,
    TestingToDevelopment,
}

/// Result of applying an incoming [`WorkflowResult`] (or a liveness timeout)
/// to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The workflow advanced (possibly staying on the same stage, e.g. a
    /// provider-error retry) and is still running.
    Advanced { workflow_id: Uuid, stage: Stage },
    /// The workflow reached `Completed`.
    Completed { workflow_id: Uuid, output: String },
    /// The workflow reached `Failed`.
    Failed { workflow_id: Uuid, reason: String },
    /// A duplicate or stale result was dropped; no state mutation occurred.
    Dropped { workflow_id: Uuid },
}

#[derive(Debug, Default)]
struct BackEdgeCounts {
    approval_to_review: u32,
    testing_to_development: u32,
}

impl BackEdgeCounts {
    fn get(&self, kind: BackEdgeKind) -> u32 {
        match kind {
            BackEdgeKind::ApprovalToReview => self.approval_to_review,
            BackEdgeKind::TestingToDevelopment => self.testing_to_development,
        }
    }

    fn increment(&mut self, kind: BackEdgeKind) {
        match kind {
            BackEdgeKind::ApprovalToReview => self.approval_to_review += 1,
            BackEdgeKind::TestingToDevelopment => self.testing_to_development += 1,
        }
    }
}

/// Per-workflow bounded LRU of recently-processed result ids, guarding I5 /
/// P3 idempotency. Capacity is at least 32 per §4.6.
struct SeenResults {
    order: VecDeque<Uuid>,
    set: HashSet<Uuid>,
    capacity: usize,
}

impl SeenResults {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &Uuid) -> bool {
        self.set.contains(id)
    }

    fn record(&mut self, id: Uuid) {
        if self.set.contains(&id) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.order.push_back(id);
        self.set.insert(id);
    }
}

struct WorkflowEntry {
    state: WorkflowState,
    back_edges: BackEdgeCounts,
    seen: SeenResults,
}

const DUPLICATE_LRU_CAPACITY: usize = 32;

/// The per-workflow state machine driver (C5).
pub struct WorkflowEngine {
    config: EngineConfig,
    workflows: DashMap<Uuid, Mutex<WorkflowEntry>>,
}

/// Outcome of the pure transition function, before bookkeeping (counters,
/// arbitration, total-transition cap) is applied.
enum Delta {
    /// Stay on the current stage; another attempt will be dispatched.
    Retry,
    /// Move to `next_stage`, optionally updating output/feedback, optionally
    /// crossing a tracked back-edge.
    Advance {
        next_stage: Stage,
        set_output: Option<String>,
        set_feedback: Option<String>,
        back_edge: Option<BackEdgeKind>,
    },
    /// Reached the terminal `Completed` status.
    Complete,
    /// Forced into `Failed` by the transition function itself (provider-error
    /// budget exhausted at a stage with no further retries).
    ForceFailed(String),
}

/// The pure transition function δ(state, classified_result, attempts, max_retries)
/// from §4.5. Deterministic (L2): same inputs always yield the same [`Delta`].
/// `result_text` is the worker's raw output, used to update `current_output`
/// on the Development/Review forward edges.
fn delta(
    stage: Stage,
    success: bool,
    outcome: &Outcome,
    attempts: u32,
    max_retries: u32,
    result_text: &str,
) -> Delta {
    if !success {
        return if attempts < max_retries {
            Delta::Retry
        } else {
            Delta::ForceFailed(format!("{} exhausted", stage.as_str()))
        };
    }

    match stage {
        Stage::Development => Delta::Advance {
            next_stage: Stage::Review,
            set_output: Some(result_text.to_string()),
            set_feedback: None,
            back_edge: None,
        },
        Stage::Review => Delta::Advance {
            next_stage: Stage::Approval,
            set_output: Some(result_text.to_string()),
            set_feedback: None,
            back_edge: None,
        },
        Stage::Approval => match outcome {
            Outcome::Rejected { feedback } => Delta::Advance {
                next_stage: Stage::Review,
                set_output: None,
                set_feedback: Some(feedback.clone()),
                back_edge: Some(BackEdgeKind::ApprovalToReview),
            },
            // Approved, Passed, Failed, Neutral: all advance permissively
            // per the Approval row and the first open question's decision
            // (recorded in DESIGN.md).
            _ => Delta::Advance {
                next_stage: Stage::Testing,
                set_output: None,
                set_feedback: None,
                back_edge: None,
            },
        },
        Stage::Testing => match outcome {
            Outcome::Failed { reason } => Delta::Advance {
                next_stage: Stage::Development,
                set_output: None,
                set_feedback: Some(format!("test failed: {reason}")),
                back_edge: Some(BackEdgeKind::TestingToDevelopment),
            },
            _ => Delta::Complete,
        },
    }
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            workflows: DashMap::new(),
        }
    }

    /// The configured per-stage liveness timeout, for the orchestrator's
    /// timer loop to read back (§10.3: one config struct, two consumers).
    pub fn stage_timeout(&self) -> Duration {
        self.config.stage_timeout
    }

    /// Register a new workflow in `Development`, dispatched with its first
    /// stage attempt already counted (I2/I3 start at `{Development: 1}`, `0`
    /// transitions). Returns the generated `workflow_id`.
    pub fn create_workflow(&self, task_type: impl Into<String>, payload: HashMap<String, String>) -> Uuid {
        let mut state = WorkflowState::new(task_type, payload);
        state.stage_attempts.insert(Stage::Development, 1);
        let id = state.id;
        self.workflows.insert(
            id,
            Mutex::new(WorkflowEntry {
                state,
                back_edges: BackEdgeCounts::default(),
                seen: SeenResults::new(self.config.result_lru_capacity.max(DUPLICATE_LRU_CAPACITY)),
            }),
        );
        tracing::info!(workflow_id = %id, "workflow created");
        id
    }

    /// Read-only snapshot of a workflow's current state, or `None` if
    /// unknown.
    pub fn snapshot(&self, workflow_id: Uuid) -> Option<WorkflowState> {
        self.workflows
            .get(&workflow_id)
            .map(|entry| entry.lock().expect("workflow mutex poisoned").state.clone())
    }

    /// Apply an incoming [`WorkflowResult`], keyed by a caller-supplied
    /// `result_id` used for duplicate detection (I5/P3). Typically the
    /// result's `task_id` serves as the `result_id`.
    pub fn apply_result(&self, result_id: Uuid, result: &WorkflowResult) -> Result<EngineEvent> {
        let outcome = if result.success {
            classify(&result.result)
        } else {
            Outcome::Neutral
        };
        self.process(
            result.workflow_id,
            result.stage,
            result.success,
            outcome,
            Some(result_id),
            &result.result,
        )
    }

    /// Treat a per-stage liveness timeout (§4.6 item 5) as a provider error
    /// at the workflow's current stage.
    pub fn apply_timeout(&self, workflow_id: Uuid, stage: Stage) -> Result<EngineEvent> {
        self.process(workflow_id, stage, false, Outcome::Neutral, None, "")
    }

    /// Force a workflow to `Failed` directly (used by the orchestrator when
    /// e.g. the bus is unavailable after exhausting publish retries, §5).
    pub fn force_fail(&self, workflow_id: Uuid, reason: impl Into<String>) -> Result<EngineEvent> {
        let entry_ref = self
            .workflows
            .get(&workflow_id)
            .ok_or(CoreError::UnknownWorkflow { workflow_id })?;
        let mut entry = entry_ref.lock().expect("workflow mutex poisoned");
        if entry.state.is_terminal() {
            return Ok(EngineEvent::Dropped { workflow_id });
        }
        let reason = reason.into();
        entry.state.status = WorkflowStatus::Failed;
        entry.state.failure_reason = Some(reason.clone());
        entry.state.updated_at = chrono::Utc::now();
        tracing::warn!(workflow_id = %workflow_id, reason = %reason, "workflow force-failed");
        Ok(EngineEvent::Failed { workflow_id, reason })
    }

    fn process(
        &self,
        workflow_id: Uuid,
        incoming_stage: Stage,
        success: bool,
        outcome: Outcome,
        result_id: Option<Uuid>,
        result_text: &str,
    ) -> Result<EngineEvent> {
        let entry_ref = self.workflows.get(&workflow_id).ok_or_else(|| {
            tracing::warn!(workflow_id = %workflow_id, "result for unknown workflow dropped (I5)");
            CoreError::UnknownWorkflow { workflow_id }
        })?;
        let mut entry = entry_ref.lock().expect("workflow mutex poisoned");

        if entry.state.is_terminal() {
            tracing::debug!(workflow_id = %workflow_id, "result for terminal workflow dropped");
            return Ok(EngineEvent::Dropped { workflow_id });
        }

        if let Some(id) = result_id {
            if entry.seen.contains(&id) {
                tracing::warn!(workflow_id = %workflow_id, result_id = %id, "duplicate result dropped (P3)");
                return Ok(EngineEvent::Dropped { workflow_id });
            }
        }

        if incoming_stage != entry.state.current_stage {
            tracing::warn!(
                workflow_id = %workflow_id,
                incoming_stage = %incoming_stage,
                current_stage = %entry.state.current_stage,
                "result for stale stage dropped"
            );
            return Ok(EngineEvent::Dropped { workflow_id });
        }

        if let Some(id) = result_id {
            entry.seen.record(id);
        }

        let attempts = *entry.state.stage_attempts.get(&incoming_stage).unwrap_or(&0);
        let computed = delta(
            incoming_stage,
            success,
            &outcome,
            attempts,
            self.config.max_retries,
            result_text,
        );

        // Arbitration: a back-edge that would exceed the 3-per-kind budget is
        // forced to Failed instead (P7).
        let computed = match computed {
            Delta::Advance {
                back_edge: Some(kind),
                ..
            } if entry.back_edges.get(kind) >= 3 => Delta::ForceFailed("arbitration limit".to_string()),
            other => other,
        };

        entry.state.total_transitions += 1;
        entry.state.updated_at = chrono::Utc::now();

        // I3: global transition cap, overrides any other outcome.
        if entry.state.total_transitions > self.config.max_transitions {
            entry.state.status = WorkflowStatus::Failed;
            entry.state.failure_reason = Some("arbitration limit".to_string());
            tracing::warn!(workflow_id = %workflow_id, "workflow failed: transition cap exceeded");
            return Ok(EngineEvent::Failed {
                workflow_id,
                reason: "arbitration limit".to_string(),
            });
        }

        match computed {
            Delta::Retry => {
                *entry.state.stage_attempts.entry(incoming_stage).or_insert(0) += 1;
                tracing::debug!(workflow_id = %workflow_id, stage = %incoming_stage, "retrying stage after provider error");
                Ok(EngineEvent::Advanced {
                    workflow_id,
                    stage: incoming_stage,
                })
            }
            Delta::Advance {
                next_stage,
                set_output,
                set_feedback,
                back_edge,
            } => {
                if let Some(output) = set_output {
                    entry.state.current_output = output;
                }
                if let Some(feedback) = set_feedback {
                    entry.state.review_feedback = feedback;
                }
                if let Some(kind) = back_edge {
                    entry.back_edges.increment(kind);
                }
                entry.state.current_stage = next_stage;
                *entry.state.stage_attempts.entry(next_stage).or_insert(0) += 1;
                tracing::info!(workflow_id = %workflow_id, from = %incoming_stage, to = %next_stage, "workflow transitioned");
                Ok(EngineEvent::Advanced {
                    workflow_id,
                    stage: next_stage,
                })
            }
            Delta::Complete => {
                entry.state.status = WorkflowStatus::Completed;
                let output = entry.state.current_output.clone();
                tracing::info!(workflow_id = %workflow_id, "workflow completed");
                Ok(EngineEvent::Completed { workflow_id, output })
            }
            Delta::ForceFailed(reason) => {
                entry.state.status = WorkflowStatus::Failed;
                entry.state.failure_reason = Some(reason.clone());
                tracing::warn!(workflow_id = %workflow_id, reason = %reason, "workflow failed");
                Ok(EngineEvent::Failed { workflow_id, reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, WorkflowResult};

    fn make_result(
        workflow_id: Uuid,
        stage: Stage,
        success: bool,
        result_text: &str,
        error: &str,
    ) -> WorkflowResult {
        WorkflowResult {
            task_id: Uuid::now_v7(),
            workflow_id,
            stage,
            worker_id: "w1".to_string(),
            worker_role: stage.required_role(),
            success,
            result: result_text.to_string(),
            error: error.to_string(),
            approved: false,
            requires_retry: false,
            review_feedback: String::new(),
            processed_at: chrono::Utc::now(),
            duration_ms: 10,
        }
    }

    fn apply(engine: &WorkflowEngine, workflow_id: Uuid, stage: Stage, success: bool, text: &str) -> EngineEvent {
        let result = make_result(workflow_id, stage, success, text, if success { "" } else { text });
        engine.apply_result(result.task_id, &result).unwrap()
    }

    #[test]
    fn happy_path_reaches_completed_in_four_transitions() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());

        apply(&engine, wf, Stage::Development, true, "draft A");
        apply(&engine, wf, Stage::Review, true, "revised A");
        apply(&engine, wf, Stage::Approval, true, "APPROVED: looks good");
        let event = apply(&engine, wf, Stage::Testing, true, "PASSED");

        assert_eq!(
            event,
            EngineEvent::Completed {
                workflow_id: wf,
                output: "revised A".to_string(),
            }
        );
        let state = engine.snapshot(wf).unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.current_output, "revised A");
        assert_eq!(state.total_transitions, 4);
    }

    #[test]
    fn rejection_loop_within_budget_completes() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());

        apply(&engine, wf, Stage::Development, true, "draft A");
        apply(&engine, wf, Stage::Review, true, "revised A");
        apply(&engine, wf, Stage::Approval, true, "REJECTED: missing examples");
        apply(&engine, wf, Stage::Review, true, "revised B");
        apply(&engine, wf, Stage::Approval, true, "REJECTED: still missing examples");
        apply(&engine, wf, Stage::Review, true, "revised C");
        apply(&engine, wf, Stage::Approval, true, "APPROVED");
        let event = apply(&engine, wf, Stage::Testing, true, "PASSED");

        assert_eq!(
            event,
            EngineEvent::Completed {
                workflow_id: wf,
                output: "revised C".to_string(),
            }
        );
    }

    #[test]
    fn arbitration_fails_after_three_rejection_back_edges() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());

        apply(&engine, wf, Stage::Development, true, "draft A");
        apply(&engine, wf, Stage::Review, true, "revised A");
        apply(&engine, wf, Stage::Approval, true, "REJECTED: x");
        apply(&engine, wf, Stage::Review, true, "revised B");
        apply(&engine, wf, Stage::Approval, true, "REJECTED: x");
        apply(&engine, wf, Stage::Review, true, "revised C");
        apply(&engine, wf, Stage::Approval, true, "REJECTED: x");
        apply(&engine, wf, Stage::Review, true, "revised D");
        let event = apply(&engine, wf, Stage::Approval, true, "REJECTED: x");

        assert_eq!(
            event,
            EngineEvent::Failed {
                workflow_id: wf,
                reason: "arbitration limit".to_string(),
            }
        );
    }

    #[test]
    fn test_failure_feeds_back_to_development() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());

        apply(&engine, wf, Stage::Development, true, "draft A");
        apply(&engine, wf, Stage::Review, true, "revised A");
        apply(&engine, wf, Stage::Approval, true, "APPROVED");
        let event = apply(&engine, wf, Stage::Testing, true, "FAILED: build error");

        assert_eq!(
            event,
            EngineEvent::Advanced {
                workflow_id: wf,
                stage: Stage::Development,
            }
        );
        let state = engine.snapshot(wf).unwrap();
        assert_eq!(state.current_stage, Stage::Development);
        assert_eq!(state.review_feedback, "test failed: build error");
        assert_eq!(state.total_transitions, 4);
    }

    #[test]
    fn provider_error_exhaustion_fails_workflow() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());

        apply(&engine, wf, Stage::Development, false, "timeout");
        apply(&engine, wf, Stage::Development, false, "timeout");
        let event = apply(&engine, wf, Stage::Development, false, "timeout");

        assert_eq!(
            event,
            EngineEvent::Failed {
                workflow_id: wf,
                reason: "development exhausted".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_result_is_dropped_and_does_not_advance() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());

        let result = make_result(wf, Stage::Development, true, "draft A", "");
        let first = engine.apply_result(result.task_id, &result).unwrap();
        assert!(matches!(first, EngineEvent::Advanced { .. }));

        let second = engine.apply_result(result.task_id, &result).unwrap();
        assert_eq!(second, EngineEvent::Dropped { workflow_id: wf });

        let state = engine.snapshot(wf).unwrap();
        assert_eq!(state.total_transitions, 1);
    }

    #[test]
    fn unknown_workflow_result_is_an_error_not_a_panic() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let bogus = Uuid::now_v7();
        let result = make_result(bogus, Stage::Development, true, "x", "");
        let err = engine.apply_result(result.task_id, &result).unwrap_err();
        assert!(matches!(err, CoreError::UnknownWorkflow { .. }));
    }

    #[test]
    fn stage_attempts_never_reset_on_back_edge() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());

        apply(&engine, wf, Stage::Development, true, "draft A");
        // First entry into Review.
        let state = engine.snapshot(wf).unwrap();
        assert_eq!(state.stage_attempts[&Stage::Review], 1);

        apply(&engine, wf, Stage::Review, true, "revised A");
        apply(&engine, wf, Stage::Approval, true, "REJECTED: x");
        // Second entry into Review via back-edge: counter keeps climbing,
        // it is not reset to 1.
        let state = engine.snapshot(wf).unwrap();
        assert_eq!(state.stage_attempts[&Stage::Review], 2);
    }

    #[test]
    fn total_transitions_strictly_increasing() {
        let engine = WorkflowEngine::new(EngineConfig::default());
        let wf = engine.create_workflow("create_document", HashMap::new());
        let mut last = 0;
        for (stage, ok, text) in [
            (Stage::Development, true, "draft A"),
            (Stage::Review, true, "revised A"),
            (Stage::Approval, true, "APPROVED"),
        ] {
            apply(&engine, wf, stage, ok, text);
            let state = engine.snapshot(wf).unwrap();
            assert!(state.total_transitions > last);
            last = state.total_transitions;
        }
    }
}
