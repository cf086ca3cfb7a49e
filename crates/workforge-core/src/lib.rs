//! Core workflow-orchestration primitives: the wire data model, the result
//! classifier, and the per-workflow state machine.
//!
//! ```text
//!            ┌──────────────┐
//!   classify │  Classifier  │  (C2 — pure, deterministic)
//!            └──────┬───────┘
//!                   │ Outcome
//!                   ▼
//!            ┌──────────────┐
//!            │ WorkflowEngine│  (C5 — per-workflow state machine)
//!            └──────────────┘
//! ```
//!
//! This crate has no I/O: it does not talk to a bus, a provider, or a clock
//! beyond `chrono::Utc::now()` for timestamping state. Transport lives in
//! `workforge-bus`; worker-side execution lives in `workforge-worker`.

pub mod classifier;
pub mod engine;
pub mod error;
pub mod model;

pub use classifier::{classify, Outcome};
pub use engine::{BackEdgeKind, EngineConfig, EngineEvent, WorkflowEngine};
pub use error::{CoreError, Result};
pub use model::{
    Role, Stage, Task, WorkerCapabilities, WorkerState, WorkerStatus, WorkflowResult,
    WorkflowState, WorkflowStatus, WorkflowTask,
};
