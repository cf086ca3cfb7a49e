//! Orchestrator Runtime (C6): accepts workflow submissions, drives the
//! engine from incoming results, and dispatches the next stage's task.
//!
//! Every method takes `self: &Arc<Self>` because the per-stage liveness
//! timer (§4.6 item 5) needs to spawn a detached task holding its own handle
//! back to the orchestrator; this mirrors the `Arc<Self>`-spawning shape
//! used by this codebase's scheduler for its own background timers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;
use workforge_bus::Bus;
use workforge_core::{EngineConfig, EngineEvent, Stage, WorkflowEngine, WorkflowResult, WorkflowTask};

use std::collections::HashMap;

/// Explicitly constructed, no process-global config (§10.3).
pub struct OrchestratorConfig {
    pub engine: EngineConfig,
    pub publish_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            publish_retries: 3,
        }
    }
}

pub struct Orchestrator {
    engine: WorkflowEngine,
    bus: Arc<dyn Bus>,
    stage_timeout: Duration,
    max_retries: u32,
    publish_retries: u32,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, bus: Arc<dyn Bus>) -> Self {
        let stage_timeout = config.engine.stage_timeout;
        let max_retries = config.engine.max_retries;
        Self {
            engine: WorkflowEngine::new(config.engine),
            bus,
            stage_timeout,
            max_retries,
            publish_retries: config.publish_retries,
        }
    }

    /// Accept a new workflow submission and dispatch its first (Development)
    /// task. Returns the generated `workflow_id`.
    pub async fn submit(self: &Arc<Self>, task_type: impl Into<String>, payload: HashMap<String, String>) -> Uuid {
        let workflow_id = self.engine.create_workflow(task_type, payload);
        self.dispatch_stage(workflow_id, Stage::Development).await;
        workflow_id
    }

    /// Subscribe to `results/workflow/+` and drive the engine until
    /// `shutdown` is signaled or the subscription closes.
    pub async fn run(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> workforge_bus::Result<()> {
        self.bus.connect().await?;
        let mut results = self.bus.subscribe("results/workflow/+").await?;
        tracing::info!("orchestrator runtime started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("orchestrator runtime shutting down");
                        break;
                    }
                }
                message = results.receiver.recv() => {
                    match message {
                        Some(message) => self.handle_result(message.payload).await,
                        None => {
                            tracing::warn!("result subscription closed");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_result(self: &Arc<Self>, payload: Vec<u8>) {
        let result: WorkflowResult = match serde_json::from_slice(&payload) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed result payload");
                return;
            }
        };

        let event = match self.engine.apply_result(result.task_id, &result) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(workflow_id = %result.workflow_id, error = %e, "engine rejected result");
                return;
            }
        };

        self.handle_event(event).await;
    }

    async fn handle_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::Advanced { workflow_id, stage } => {
                self.dispatch_stage(workflow_id, stage).await;
            }
            EngineEvent::Completed { workflow_id, output } => {
                tracing::info!(workflow_id = %workflow_id, output = %output, "workflow completed");
            }
            EngineEvent::Failed { workflow_id, reason } => {
                tracing::warn!(workflow_id = %workflow_id, reason = %reason, "workflow failed");
            }
            EngineEvent::Dropped { workflow_id } => {
                tracing::debug!(workflow_id = %workflow_id, "result dropped (duplicate or stale)");
            }
        }
    }

    async fn dispatch_stage(self: &Arc<Self>, workflow_id: Uuid, stage: Stage) {
        let Some(state) = self.engine.snapshot(workflow_id) else {
            tracing::error!(workflow_id = %workflow_id, "snapshot missing for workflow just advanced");
            return;
        };

        let retry_count = state.stage_attempts.get(&stage).copied().unwrap_or(1).saturating_sub(1);
        let task = WorkflowTask::new(
            workflow_id,
            state.task_type.clone(),
            state.payload.clone(),
            stage,
            state.current_output.clone(),
            state.review_feedback.clone(),
            retry_count,
            self.max_retries,
        );

        if self.publish_task(&task).await {
            self.schedule_timeout(workflow_id, stage);
        }
    }

    /// Publish with bounded retries; after exhausting them, force the
    /// workflow to `Failed` (§5: bus-unavailable-after-retries). Returns
    /// whether the task was successfully published.
    async fn publish_task(self: &Arc<Self>, task: &WorkflowTask) -> bool {
        let topic = task.stage.task_topic();
        let payload = match serde_json::to_vec(task) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(workflow_id = %task.workflow_id, error = %e, "failed to serialize task");
                return false;
            }
        };

        let mut delay = Duration::from_millis(250);
        for attempt in 1..=self.publish_retries {
            match self.bus.publish(&topic, payload.clone()).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(workflow_id = %task.workflow_id, attempt, error = %e, "task publish failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }

        tracing::error!(workflow_id = %task.workflow_id, "task publish exhausted retries, failing workflow");
        if let Err(e) = self.engine.force_fail(task.workflow_id, "bus unavailable") {
            tracing::error!(workflow_id = %task.workflow_id, error = %e, "force_fail itself failed");
        }
        false
    }

    fn schedule_timeout(self: &Arc<Self>, workflow_id: Uuid, stage: Stage) {
        let orchestrator = self.clone();
        let timeout = self.stage_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            match orchestrator.engine.apply_timeout(workflow_id, stage) {
                Ok(event) => orchestrator.handle_event(event).await,
                Err(e) => tracing::debug!(workflow_id = %workflow_id, error = %e, "timeout fired for unknown workflow"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workforge_bus::fake::InMemoryBus;
    use workforge_core::Role;

    #[tokio::test]
    async fn submit_dispatches_development_task() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        bus.connect().await.unwrap();
        let mut tasks = bus.subscribe("tasks/workflow/development").await.unwrap();

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorConfig::default(), bus));
        orchestrator.submit("create_document", HashMap::new()).await;

        let message = tokio::time::timeout(Duration::from_secs(1), tasks.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        let task: WorkflowTask = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(task.stage, Stage::Development);
        assert_eq!(task.required_role, Role::Developer);
    }

    #[tokio::test]
    async fn completing_all_stages_reaches_completed() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        bus.connect().await.unwrap();
        let mut tasks = bus.subscribe("tasks/workflow/+").await.unwrap();

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorConfig::default(), bus.clone()));
        let workflow_id = orchestrator.submit("create_document", HashMap::new()).await;

        for (stage, text) in [
            (Stage::Development, "draft A"),
            (Stage::Review, "revised A"),
            (Stage::Approval, "APPROVED"),
            (Stage::Testing, "PASSED"),
        ] {
            let message = tokio::time::timeout(Duration::from_secs(1), tasks.receiver.recv())
                .await
                .unwrap()
                .unwrap();
            let dispatched: WorkflowTask = serde_json::from_slice(&message.payload).unwrap();
            assert_eq!(dispatched.stage, stage);

            let result = WorkflowResult {
                task_id: dispatched.id,
                workflow_id,
                stage,
                worker_id: "w1".to_string(),
                worker_role: stage.required_role(),
                success: true,
                result: text.to_string(),
                error: String::new(),
                approved: false,
                requires_retry: false,
                review_feedback: String::new(),
                processed_at: chrono::Utc::now(),
                duration_ms: 5,
            };
            // `handle_result` is only reachable through `run`'s subscriber
            // loop in production; call it directly here to drive the engine
            // without spinning up a full select loop.
            orchestrator.handle_result(serde_json::to_vec(&result).unwrap()).await;
        }

        let state = orchestrator.engine.snapshot(workflow_id).unwrap();
        assert_eq!(state.status, workforge_core::WorkflowStatus::Completed);
        assert_eq!(state.current_output, "revised A");
    }
}
