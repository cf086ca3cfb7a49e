//! Shared pieces for the two host binaries: clap argument definitions,
//! tracing/env helpers, and the Orchestrator Runtime (C6) wiring.

pub mod cli;
pub mod helpers;
pub mod orchestrator;

pub use cli::{OrchestratorArgs, WorkerArgs};
pub use helpers::{env_non_empty, init_tracing};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
