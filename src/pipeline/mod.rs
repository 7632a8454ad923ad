//! Idea-to-implementation pipeline core.
//!
//! - `models`: typed idea / PRD / feature / report records
//! - `validate`: input gates
//! - `resolver`: dependency-aware feature ordering
//! - `retry`: backoff executor
//! - `state`: run states, transition table, status tracker
//! - `collaborators`: interfaces to external systems
//! - `orchestrator`: the run driver
//! - `store`: registry of live runs for the server

pub mod collaborators;
pub mod models;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod store;
pub mod validate;

pub use collaborators::{
    ArtifactOrganizer, HistorySink, IdeaEnhancer, Implementer, PrdGenerator, ProgressReporter,
    ProjectScaffolder, Publisher, RepositoryProvisioner,
};
pub use orchestrator::{Collaborators, Orchestrator, PipelineSettings, Run, RunRequest, new_run_id};
pub use resolver::resolve_features;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use state::{ProgressEvent, RunStatus, StatusTracker, StepStatus};
pub use store::{RunRecord, RunStore};
