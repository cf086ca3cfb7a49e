//! Worker-side components: the Task Router (C3), the provider abstraction,
//! and the Worker Runtime (C4) that ties subscription, routing, provider
//! invocation, classification, and result publication together.

pub mod error;
pub mod provider;
pub mod router;
pub mod runtime;

pub use error::{Result, WorkerError};
pub use provider::{GenerateParams, LocalProvider, Provider, RemoteProvider};
pub use router::{classify_complexity, route, Complexity, ExecutionPlan, Strategy};
pub use runtime::{NoopRag, RagCollaborator, WorkerConfig, WorkerRuntime};
