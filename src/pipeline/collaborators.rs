//! Interfaces to the external systems a run drives.
//!
//! Real implementations live in `llm`, `github`, `scaffold`, `implement`,
//! `artifacts` and `history`. Tests substitute in-process fakes.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::models::{
    EnhancedIdea, FeatureRecord, GeneratedPrd, ImplementationProgress, ImplementationReport, Prd,
    RepositoryInfo, RunSummary,
};

/// Turns a raw idea into a structured product concept.
#[async_trait]
pub trait IdeaEnhancer: Send + Sync {
    async fn enhance(&self, raw_idea: &str, tech_preferences: Option<&str>)
    -> Result<EnhancedIdea>;
}

/// Produces a PRD plus its rendered document.
#[async_trait]
pub trait PrdGenerator: Send + Sync {
    async fn generate(&self, idea: &EnhancedIdea) -> Result<GeneratedPrd>;
}

/// Creates the remote repository. Must tolerate being called again after a
/// failed attempt.
#[async_trait]
pub trait RepositoryProvisioner: Send + Sync {
    async fn create(&self, name_hint: &str, description: &str) -> Result<RepositoryInfo>;
}

/// Writes the initial project files. Returns the path of the rendered PRD
/// document inside the project.
#[async_trait]
pub trait ProjectScaffolder: Send + Sync {
    async fn scaffold(
        &self,
        project_dir: &Path,
        idea: &EnhancedIdea,
        prd: &Prd,
        prd_document: &str,
    ) -> Result<PathBuf>;
}

/// Drives a coding agent over the resolved features, in order.
#[async_trait]
pub trait Implementer: Send + Sync {
    async fn implement(
        &self,
        project_dir: &Path,
        prd_document: &Path,
        features: &[FeatureRecord],
        progress: ProgressReporter,
    ) -> Result<ImplementationReport>;
}

/// Tidies the project tree before publishing.
#[async_trait]
pub trait ArtifactOrganizer: Send + Sync {
    async fn organize(&self, project_dir: &Path) -> Result<()>;
}

/// Pushes the project to its repository. Re-pushing must be harmless.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, project_dir: &Path, repo: &RepositoryInfo) -> Result<()>;
}

/// Durable record of finished runs. Must accept concurrent appends.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, summary: &RunSummary) -> Result<()>;
}

/// Non-blocking handle the implementer uses to report sub-progress.
///
/// Updates go over a bounded channel; when the consumer falls behind the
/// update is dropped rather than stalling the implementer.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<ImplementationProgress>>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<ImplementationProgress>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A reporter that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Bounded channel pair with room for `capacity` pending updates.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ImplementationProgress>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Returns false when the update was dropped.
    pub fn report(&self, progress: ImplementationProgress) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(progress) {
            Ok(()) => true,
            Err(TrySendError::Full(p)) => {
                debug!(
                    feature = %p.current_feature_name,
                    "Progress consumer is behind; dropping update"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
