//! Worker Runtime (C4): subscribes to one stage's task topic, executes tasks
//! through the Task Router and a [`Provider`], classifies the result, and
//! publishes it back — plus periodic heartbeats.
//!
//! Shaped after this codebase's executor/runtime pair: a retry-with-backoff
//! inner loop for the unreliable half (publishing), a timeout wrapper around
//! the unreliable half that actually does the work (provider invocation),
//! and a `tokio::select!`-driven outer loop for graceful shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;
use workforge_bus::Bus;
use workforge_core::{classify, Outcome, Role, WorkerCapabilities, WorkerState, WorkerStatus, WorkflowResult, WorkflowTask};

use crate::error::{Result, WorkerError};
use crate::provider::{GenerateParams, Provider};
use crate::router::{route, Strategy};

/// Explicitly constructed, no process-global config (§10.3).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: String,
    pub role: Role,
    pub task_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub publish_retries: u32,
}

impl WorkerConfig {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            task_timeout: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(30),
            publish_retries: 3,
        }
    }
}

/// Best-effort contextual-retrieval collaborator (§6: `RAG.GetContext`).
/// Failure is swallowed by the runtime into an empty context, never surfaced.
#[async_trait]
pub trait RagCollaborator: Send + Sync {
    async fn get_context(&self, task_type: &str, content: &str) -> Result<String>;
}

/// Default collaborator for workers that run without retrieval augmentation.
pub struct NoopRag;

#[async_trait]
impl RagCollaborator for NoopRag {
    async fn get_context(&self, _task_type: &str, _content: &str) -> Result<String> {
        Ok(String::new())
    }
}

struct RuntimeState {
    status: WorkerState,
    current_task_id: Option<Uuid>,
    tasks_total: AtomicU64,
    tasks_error: AtomicU64,
}

/// The Worker Runtime (C4): one instance serves exactly one role.
pub struct WorkerRuntime {
    config: WorkerConfig,
    bus: Arc<dyn Bus>,
    provider: Provider,
    rag: Arc<dyn RagCollaborator>,
    state: Mutex<RuntimeState>,
}

impl WorkerRuntime {
    pub fn new(
        config: WorkerConfig,
        bus: Arc<dyn Bus>,
        provider: Provider,
        rag: Arc<dyn RagCollaborator>,
    ) -> Self {
        Self {
            config,
            bus,
            provider,
            rag,
            state: Mutex::new(RuntimeState {
                status: WorkerState::Idle,
                current_task_id: None,
                tasks_total: AtomicU64::new(0),
                tasks_error: AtomicU64::new(0),
            }),
        }
    }

    fn status_topic(&self) -> String {
        format!("workers/status/{}/{}", self.config.role.as_str(), self.config.id)
    }

    fn task_topic(&self) -> String {
        format!("tasks/workflow/{}", self.stage().as_str())
    }

    fn stage(&self) -> workforge_core::Stage {
        match self.config.role {
            Role::Developer => workforge_core::Stage::Development,
            Role::Reviewer => workforge_core::Stage::Review,
            Role::Approver => workforge_core::Stage::Approval,
            Role::Tester => workforge_core::Stage::Testing,
        }
    }

    /// Drive the runtime until `shutdown` is signaled or the task
    /// subscription closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.bus.connect().await?;
        let mut task_sub = self.bus.subscribe(&self.task_topic()).await?;
        tracing::info!(worker_id = %self.config.id, role = %self.config.role, topic = %self.task_topic(), "worker runtime started");

        self.publish_status().await;
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; skip it, we just published

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(worker_id = %self.config.id, "worker runtime shutting down");
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    self.publish_status().await;
                }
                message = task_sub.receiver.recv() => {
                    match message {
                        Some(message) => self.handle_task_message(message.payload).await,
                        None => {
                            tracing::warn!(worker_id = %self.config.id, "task subscription closed");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_task_message(&self, payload: Vec<u8>) {
        let task: WorkflowTask = match serde_json::from_slice(&payload) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed task payload");
                return;
            }
        };

        if let Err(validation_err) = task.validate() {
            let err = WorkerError::RoleMismatch {
                task_id: task.id,
                required: task.stage.required_role().to_string(),
                actual: task.required_role.to_string(),
            };
            tracing::warn!(task_id = %task.id, error = %validation_err, rejection = %err, "rejecting task failing wire validation (I4)");
            self.publish_error_status(task.id).await;
            return;
        }

        if task.required_role != self.config.role {
            tracing::trace!(task_id = %task.id, required = %task.required_role, "task not for this worker's role, dropping");
            return;
        }

        {
            let mut state = self.state.lock().await;
            state.status = WorkerState::Busy;
            state.current_task_id = Some(task.id);
        }
        self.publish_status().await;

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.task_timeout, self.execute(&task)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(text)) => self.build_success_result(&task, text, duration_ms),
            Ok(Err(e)) => self.build_failure_result(&task, e.to_string(), duration_ms),
            Err(_elapsed) => self.build_failure_result(&task, "task timed out".to_string(), duration_ms),
        };

        self.publish_result(&result).await;

        {
            let mut state = self.state.lock().await;
            state.status = WorkerState::Idle;
            state.current_task_id = None;
            state.tasks_total.fetch_add(1, Ordering::SeqCst);
            if !result.success {
                state.tasks_error.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.publish_status().await;
    }

    async fn execute(&self, task: &WorkflowTask) -> Result<String> {
        let content = format!("{} {}", task.previous_output, task.review_feedback);
        let rag_context = match self.rag.get_context(&task.task_type, &content).await {
            Ok(context) => context,
            Err(e) => {
                tracing::debug!(task_id = %task.id, error = %e, "rag context retrieval failed, continuing without it");
                String::new()
            }
        };

        let local_available = matches!(self.provider, Provider::Local(_));
        let plan = route(&task.task_type, &task.payload, local_available);
        tracing::debug!(task_id = %task.id, strategy = ?plan.strategy, provider = %plan.provider, reasoning = %plan.reasoning, "task routed");
        if matches!(plan.strategy, Strategy::Api) && matches!(self.provider, Provider::Local(_)) {
            tracing::debug!(task_id = %task.id, "routed to api but only a local provider is configured, using it anyway");
        }

        let prompt = self.build_prompt(task, &rag_context);
        self.provider.generate(&prompt, &GenerateParams::default()).await
    }

    fn build_prompt(&self, task: &WorkflowTask, rag_context: &str) -> String {
        format!(
            "role: {}\nstage: {}\ntask_type: {}\nprevious_output: {}\nreview_feedback: {}\ncontext: {}",
            self.config.role, task.stage, task.task_type, task.previous_output, task.review_feedback, rag_context
        )
    }

    fn build_success_result(&self, task: &WorkflowTask, text: String, duration_ms: u64) -> WorkflowResult {
        let outcome = classify(&text);
        let (approved, requires_retry, review_feedback) = match &outcome {
            Outcome::Approved => (true, false, String::new()),
            Outcome::Rejected { feedback } => (false, true, feedback.clone()),
            Outcome::Passed => (true, false, String::new()),
            Outcome::Failed { reason } => (false, true, reason.clone()),
            Outcome::Neutral => (false, false, String::new()),
        };

        WorkflowResult {
            task_id: task.id,
            workflow_id: task.workflow_id,
            stage: task.stage,
            worker_id: self.config.id.clone(),
            worker_role: self.config.role,
            success: true,
            result: text,
            error: String::new(),
            approved,
            requires_retry,
            review_feedback,
            processed_at: chrono::Utc::now(),
            duration_ms,
        }
    }

    fn build_failure_result(&self, task: &WorkflowTask, error: String, duration_ms: u64) -> WorkflowResult {
        WorkflowResult {
            task_id: task.id,
            workflow_id: task.workflow_id,
            stage: task.stage,
            worker_id: self.config.id.clone(),
            worker_role: self.config.role,
            success: false,
            result: String::new(),
            error,
            approved: false,
            requires_retry: false,
            review_feedback: String::new(),
            processed_at: chrono::Utc::now(),
            duration_ms,
        }
    }

    /// Publish with bounded retries and backoff; abandon and log on exhaustion.
    async fn publish_result(&self, result: &WorkflowResult) {
        let topic = result.stage.result_topic();
        let payload = match serde_json::to_vec(result) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(task_id = %result.task_id, error = %e, "failed to serialize result, abandoning");
                return;
            }
        };

        let mut delay = Duration::from_millis(250);
        for attempt in 1..=self.config.publish_retries {
            match self.bus.publish(&topic, payload.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(task_id = %result.task_id, attempt, error = %e, "result publish failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }

        tracing::error!(task_id = %result.task_id, topic = %topic, "result publish exhausted retries, task abandoned");
        self.publish_error_status(result.task_id).await;
    }

    async fn publish_status(&self) {
        let (status, current_task_id, tasks_total, tasks_error) = {
            let state = self.state.lock().await;
            (
                state.status,
                state.current_task_id,
                state.tasks_total.load(Ordering::SeqCst),
                state.tasks_error.load(Ordering::SeqCst),
            )
        };
        self.publish_status_snapshot(status, current_task_id, tasks_total, tasks_error).await;
    }

    /// Emit a one-off `Error` status-topic message for an abandoned task
    /// (publish retries exhausted, or a task rejected for failing wire
    /// validation) without disturbing the runtime's own idle/busy state.
    async fn publish_error_status(&self, task_id: Uuid) {
        let (tasks_total, tasks_error) = {
            let mut state = self.state.lock().await;
            state.tasks_error.fetch_add(1, Ordering::SeqCst);
            (
                state.tasks_total.load(Ordering::SeqCst),
                state.tasks_error.load(Ordering::SeqCst),
            )
        };
        self.publish_status_snapshot(WorkerState::Error, Some(task_id), tasks_total, tasks_error)
            .await;
    }

    async fn publish_status_snapshot(
        &self,
        status: WorkerState,
        current_task_id: Option<Uuid>,
        tasks_total: u64,
        tasks_error: u64,
    ) {
        let status = WorkerStatus {
            worker_id: self.config.id.clone(),
            role: self.config.role,
            status,
            last_seen: chrono::Utc::now(),
            tasks_total,
            tasks_error,
            current_task_id,
            capabilities: WorkerCapabilities {
                stages: vec![self.stage()],
                languages: Vec::new(),
                rag_enabled: true,
            },
        };

        let payload = match serde_json::to_vec(&status) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize worker status");
                return;
            }
        };

        if let Err(e) = self.bus.publish(&self.status_topic(), payload).await {
            tracing::warn!(error = %e, "failed to publish worker status");
        }
    }
}
