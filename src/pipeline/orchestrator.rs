//! Run driver: takes one idea from validation to a published repository.
//!
//! Steps run strictly in sequence. External calls that can fail
//! transiently (enhancement, PRD generation, repository creation, publish)
//! go through [`retry_with_backoff`]; local steps and the long
//! implementation call do not. Every failure after validation lands the run
//! in `Failed` with a history record before the error is returned.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::collaborators::{
    ArtifactOrganizer, HistorySink, IdeaEnhancer, Implementer, PrdGenerator, ProgressReporter,
    ProjectScaffolder, Publisher, RepositoryProvisioner,
};
use super::models::{
    EnhancedIdea, FeatureRecord, ImplementationProgress, ImplementationReport,
    ImplementationStatus, Prd, RepositoryInfo, RunSummary,
};
use super::resolver::resolve_features;
use super::retry::{RetryPolicy, retry_with_backoff};
use super::state::{
    ProgressEvent, RunStatus, StatusObserver, StatusTracker, StepRecord, StepStatus, Transition,
};
use super::validate::{validate_app_idea, validate_enhanced_idea, validate_prd};
use crate::errors::PipelineError;

/// Characters of the original idea kept in history records.
pub const IDEA_EXCERPT_CHARS: usize = 200;

/// `run_<unix seconds>_<8 hex chars>`
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", Utc::now().timestamp(), &suffix[..8])
}

/// The external systems one run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub enhancer: Arc<dyn IdeaEnhancer>,
    pub prd_generator: Arc<dyn PrdGenerator>,
    pub repositories: Arc<dyn RepositoryProvisioner>,
    pub scaffolder: Arc<dyn ProjectScaffolder>,
    pub implementer: Arc<dyn Implementer>,
    pub organizer: Arc<dyn ArtifactOrganizer>,
    pub publisher: Arc<dyn Publisher>,
    pub history: Arc<dyn HistorySink>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent directory of every generated project.
    pub projects_dir: PathBuf,
    pub enhance_retry: RetryPolicy,
    pub prd_retry: RetryPolicy,
    pub repository_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
    /// Pending implementation-progress updates before new ones are dropped.
    pub progress_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let llm = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30));
        let remote = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(60));
        Self {
            projects_dir: PathBuf::from("projects"),
            enhance_retry: llm.clone(),
            prd_retry: llm,
            repository_retry: remote.clone(),
            publish_retry: remote,
            progress_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub idea: String,
    pub tech_preferences: Option<String>,
}

impl RunRequest {
    pub fn new(idea: impl Into<String>) -> Self {
        Self {
            idea: idea.into(),
            tech_preferences: None,
        }
    }

    pub fn with_tech(mut self, tech: impl Into<String>) -> Self {
        self.tech_preferences = Some(tech.into());
        self
    }
}

/// One pipeline execution and everything it produced.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub run_id: String,
    pub idea: String,
    pub tech_preferences: Option<String>,
    pub status: RunStatus,
    pub steps: BTreeMap<RunStatus, StepRecord>,
    pub transitions: Vec<Transition>,
    pub enhanced_idea: Option<EnhancedIdea>,
    pub prd: Option<Prd>,
    pub prd_document: Option<String>,
    pub features: Vec<FeatureRecord>,
    pub repository: Option<RepositoryInfo>,
    pub project_dir: Option<PathBuf>,
    pub implementation: Option<ImplementationReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    pub failed_step: Option<RunStatus>,
    pub error: Option<String>,
}

impl Run {
    fn new(run_id: String, idea: String, tech_preferences: Option<String>) -> Self {
        Self {
            run_id,
            idea,
            tech_preferences,
            status: RunStatus::Pending,
            steps: BTreeMap::new(),
            transitions: Vec::new(),
            enhanced_idea: None,
            prd: None,
            prd_document: None,
            features: Vec::new(),
            repository: None,
            project_dir: None,
            implementation: None,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_secs: 0.0,
            failed_step: None,
            error: None,
        }
    }

    fn sync_from(&mut self, tracker: &StatusTracker) {
        let snapshot = tracker.snapshot();
        self.status = snapshot.status;
        self.steps = snapshot.steps;
        self.transitions = snapshot.transitions;
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            timestamp: self.finished_at.unwrap_or(self.started_at),
            status: self.status.as_str().to_string(),
            project_title: self.enhanced_idea.as_ref().map(|i| i.title.clone()),
            idea_excerpt: self.idea.chars().take(IDEA_EXCERPT_CHARS).collect(),
            epics_count: self.prd.as_ref().map_or(0, |p| p.epics.len()),
            features_count: self.prd.as_ref().map_or(0, Prd::feature_count),
            features_completed: self
                .implementation
                .as_ref()
                .map_or(0, |r| r.features_completed.len()),
            implementation_mode: self.implementation.as_ref().map(|r| r.mode),
            repo_url: self.repository.as_ref().map(|r| r.url.clone()),
            elapsed_secs: self.elapsed_secs,
            failed_step: self.failed_step.map(|s| s.as_str().to_string()),
            error: self.error.clone(),
        }
    }
}

pub struct Orchestrator {
    collaborators: Collaborators,
    settings: PipelineSettings,
    observer: Option<StatusObserver>,
    events: Option<broadcast::Sender<ProgressEvent>>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            settings,
            observer: None,
            events: None,
        }
    }

    /// Register the status-change hook. It runs on the run's own task and
    /// must not block.
    pub fn on_status_change(
        mut self,
        observer: impl Fn(RunStatus, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Also publish every transition and progress update as a [`ProgressEvent`].
    pub fn with_event_channel(mut self, tx: broadcast::Sender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub async fn run(&self, request: RunRequest) -> Result<Run, PipelineError> {
        self.run_with_id(new_run_id(), request).await
    }

    /// Like [`Orchestrator::run`] with a caller-chosen run id.
    pub async fn run_with_id(
        &self,
        run_id: String,
        request: RunRequest,
    ) -> Result<Run, PipelineError> {
        let idea = validate_app_idea(Some(&request.idea))?;
        let tech = request
            .tech_preferences
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let tracker = StatusTracker::new(run_id.clone())
            .with_observer(self.observer.clone())
            .with_events(self.events.clone());
        let mut run = Run::new(run_id, idea, tech);
        let started = Instant::now();
        info!(run_id = %run.run_id, "Starting run");

        let outcome = self.execute(&mut run, &tracker).await;
        run.elapsed_secs = started.elapsed().as_secs_f64();
        run.finished_at = Some(Utc::now());

        match outcome {
            Ok(()) => {
                let message = format!("Run completed in {:.1}s", run.elapsed_secs);
                tracker.update_status(RunStatus::Completed, &message)?;
                run.sync_from(&tracker);
                self.record_history(&run).await;
                Ok(run)
            }
            Err(err) => {
                let step = match &err {
                    PipelineError::StepFailed { step, .. } => *step,
                    _ => tracker.retry_origin().unwrap_or_else(|| tracker.status()),
                };
                let message = err.to_string();
                error!(run_id = %run.run_id, step = %step, "Run failed: {}", message);

                if step != RunStatus::Pending {
                    tracker.mark_step(step, StepStatus::Failed, &message, None);
                    run.failed_step = Some(step);
                }
                if let Err(e) = tracker.update_status(RunStatus::Failed, &format!("Error: {}", message))
                {
                    warn!(run_id = %run.run_id, "Could not mark run failed: {}", e);
                }
                run.error = Some(message);
                run.sync_from(&tracker);
                self.record_history(&run).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, run: &mut Run, tracker: &StatusTracker) -> Result<(), PipelineError> {
        let c = &self.collaborators;
        let s = &self.settings;

        // Enhance
        let idea = run.idea.clone();
        let tech = run.tech_preferences.clone();
        let enhanced = self
            .retry_step(
                tracker,
                RunStatus::EnhancingIdea,
                "Enhancing idea",
                &s.enhance_retry,
                || c.enhancer.enhance(&idea, tech.as_deref()),
            )
            .await?;
        validate_enhanced_idea(&enhanced)?;
        tracker.mark_step(
            RunStatus::EnhancingIdea,
            StepStatus::Completed,
            &format!("Enhanced idea: {}", enhanced.title),
            Some(json!({ "title": enhanced.title })),
        );
        run.enhanced_idea = Some(enhanced.clone());

        // PRD
        let generated = self
            .retry_step(
                tracker,
                RunStatus::GeneratingPrd,
                "Generating PRD",
                &s.prd_retry,
                || c.prd_generator.generate(&enhanced),
            )
            .await?;
        validate_prd(&generated.prd)?;
        tracker.mark_step(
            RunStatus::GeneratingPrd,
            StepStatus::Completed,
            &format!(
                "PRD with {} epics and {} features",
                generated.prd.epics.len(),
                generated.prd.feature_count()
            ),
            Some(json!({
                "epics": generated.prd.epics.len(),
                "features": generated.prd.feature_count(),
            })),
        );
        run.prd = Some(generated.prd.clone());
        run.prd_document = Some(generated.document.clone());

        // Repository
        let repo = self
            .retry_step(
                tracker,
                RunStatus::CreatingRepo,
                "Creating repository",
                &s.repository_retry,
                || c.repositories.create(&enhanced.title, &enhanced.description),
            )
            .await?;
        tracker.mark_step(
            RunStatus::CreatingRepo,
            StepStatus::Completed,
            &format!("Repository {}", repo.url),
            Some(json!({ "url": repo.url, "full_name": repo.full_name })),
        );
        run.repository = Some(repo.clone());

        // Scaffold + resolve
        tracker.update_status(RunStatus::BreakingDownFeatures, "Extracting features")?;
        let project_dir = s.projects_dir.join(&repo.name);
        run.project_dir = Some(project_dir.clone());
        let prd_path = c
            .scaffolder
            .scaffold(&project_dir, &enhanced, &generated.prd, &generated.document)
            .await
            .map_err(|e| PipelineError::step_failed(RunStatus::BreakingDownFeatures, e))?;
        let features = resolve_features(&generated.prd);
        let order: Vec<&str> = features.iter().map(|f| f.name.as_str()).collect();
        tracker.mark_step(
            RunStatus::BreakingDownFeatures,
            StepStatus::Completed,
            &format!("{} features in dependency order", features.len()),
            Some(json!({ "order": order })),
        );
        run.features = features;

        // Implement
        tracker.update_status(RunStatus::Implementing, "Implementing features")?;
        if run.features.is_empty() {
            tracker.mark_step(RunStatus::Implementing, StepStatus::Skipped, "no features", None);
        } else {
            let report = self
                .implement(tracker, &project_dir, &prd_path, &run.features)
                .await
                .map_err(|e| PipelineError::step_failed(RunStatus::Implementing, e))?;
            self.record_implementation(tracker, &report);
            run.implementation = Some(report);
        }

        // Organize
        tracker.update_status(RunStatus::OrganizingArtifacts, "Organizing artifacts")?;
        c.organizer
            .organize(&project_dir)
            .await
            .map_err(|e| PipelineError::step_failed(RunStatus::OrganizingArtifacts, e))?;
        tracker.mark_step(
            RunStatus::OrganizingArtifacts,
            StepStatus::Completed,
            "Artifacts organized",
            None,
        );

        // Publish
        self.retry_step(
            tracker,
            RunStatus::Publishing,
            "Publishing to repository",
            &s.publish_retry,
            || c.publisher.publish(&project_dir, &repo),
        )
        .await?;
        tracker.mark_step(
            RunStatus::Publishing,
            StepStatus::Completed,
            &format!("Published to {}", repo.url),
            None,
        );

        Ok(())
    }

    /// Enter `step` and run `op` under `policy`, bouncing through `Retrying`
    /// between attempts.
    async fn retry_step<T, F, Fut>(
        &self,
        tracker: &StatusTracker,
        step: RunStatus,
        message: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        tracker.update_status(step, message)?;

        let result = retry_with_backoff(
            policy,
            || {
                if tracker.status() == RunStatus::Retrying
                    && let Err(e) = tracker.update_status(step, message)
                {
                    warn!(step = %step, "{}", e);
                }
                op()
            },
            |attempt, err, delay| {
                warn!(
                    run_id = %tracker.run_id(),
                    step = %step,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed: {:#}",
                    err
                );
                let detail = format!(
                    "{} failed (attempt {}/{}), retrying in {:.1}s: {}",
                    step,
                    attempt,
                    policy.max_attempts,
                    delay.as_secs_f64(),
                    err
                );
                if let Err(e) = tracker.update_status(RunStatus::Retrying, &detail) {
                    warn!(step = %step, "{}", e);
                }
            },
        )
        .await;

        result.map_err(|e| PipelineError::step_failed(step, e))
    }

    /// Call the implementer while forwarding its progress updates as events.
    async fn implement(
        &self,
        tracker: &StatusTracker,
        project_dir: &Path,
        prd_path: &Path,
        features: &[FeatureRecord],
    ) -> anyhow::Result<ImplementationReport> {
        let (reporter, mut progress_rx) = ProgressReporter::channel(self.settings.progress_capacity);
        let call = self
            .collaborators
            .implementer
            .implement(project_dir, prd_path, features, reporter);
        tokio::pin!(call);

        let result = loop {
            tokio::select! {
                result = &mut call => break result,
                Some(progress) = progress_rx.recv() => forward_progress(tracker, &progress),
            }
        };
        while let Ok(progress) = progress_rx.try_recv() {
            forward_progress(tracker, &progress);
        }
        result
    }

    fn record_implementation(&self, tracker: &StatusTracker, report: &ImplementationReport) {
        let data = serde_json::to_value(report).ok();
        match report.status {
            ImplementationStatus::Completed => tracker.mark_step(
                RunStatus::Implementing,
                StepStatus::Completed,
                &format!(
                    "{} features implemented ({} mode)",
                    report.features_completed.len(),
                    report.mode.as_str()
                ),
                data,
            ),
            ImplementationStatus::Failed => {
                let detail = report
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} features failed", report.features_failed.len()));
                warn!(run_id = %tracker.run_id(), "Implementation reported failure: {}", detail);
                tracker.mark_step(RunStatus::Implementing, StepStatus::Failed, &detail, data);
            }
        }
    }

    async fn record_history(&self, run: &Run) {
        if let Err(e) = self.collaborators.history.append(&run.summary()).await {
            warn!(run_id = %run.run_id, "Failed to save run history: {:#}", e);
        }
    }
}

fn forward_progress(tracker: &StatusTracker, progress: &ImplementationProgress) {
    let detail = format!(
        "Feature {}/{}: {}",
        progress.current_feature_index + 1,
        progress.total_features,
        progress.current_feature_name
    );
    tracker.emit(
        RunStatus::Implementing.as_str(),
        "progress",
        &detail,
        serde_json::to_value(progress).ok(),
    );
}
