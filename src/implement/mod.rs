//! Autonomous implementation collaborator.
//!
//! Features are handed to a coding agent in resolved order, one session per
//! feature. An optional whole-project session can run first; when it
//! succeeds every feature is reported completed in that same order. Without
//! the Claude Code CLI on `PATH` the run is simulated: a plan and a
//! placeholder tree are written instead.
//!
//! - `claude`: CLI sessions and the session log
//! - `prompts`: whole-project and per-feature prompts
//! - `simulate`: simulated mode

pub mod claude;
pub mod prompts;
pub mod simulate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

pub use claude::{ClaudeCli, CodingAgent, SessionLog, find_executable};

use crate::pipeline::models::{
    FeatureFailure, FeatureRecord, ImplementationMode, ImplementationProgress,
    ImplementationReport, ImplementationStatus,
};
use crate::pipeline::{Implementer, ProgressReporter};

pub const SESSION_LOG: &str = "logs/claude_session.log";
/// Removed again by the artifact organizer.
pub const INSTRUCTIONS_FILE: &str = ".claude_instructions.md";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Budget for the whole-project session
    pub timeout: Duration,
    pub per_feature_timeout: Duration,
    pub single_session_first: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            per_feature_timeout: Duration::from_secs(300),
            single_session_first: false,
        }
    }
}

/// Cumulative per-feature outcome, reported after every change.
struct FeatureProgress<'a> {
    features: &'a [FeatureRecord],
    reporter: &'a ProgressReporter,
    completed: Vec<String>,
    failed: Vec<FeatureFailure>,
}

impl<'a> FeatureProgress<'a> {
    fn new(features: &'a [FeatureRecord], reporter: &'a ProgressReporter) -> Self {
        Self {
            features,
            reporter,
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn report(&self, index: usize) {
        let name = self
            .features
            .get(index)
            .map(|f| f.name.clone())
            .unwrap_or_default();
        self.reporter.report(ImplementationProgress {
            total_features: self.features.len(),
            current_feature_index: index,
            current_feature_name: name,
            features_completed: self.completed.clone(),
            features_failed: self.failed.clone(),
        });
    }

    fn start(&self, index: usize) {
        self.report(index);
    }

    fn complete(&mut self, index: usize) {
        self.completed.push(self.features[index].name.clone());
        self.report(index);
    }

    fn fail(&mut self, index: usize, error: &str) {
        self.failed.push(FeatureFailure {
            name: self.features[index].name.clone(),
            error: error.to_string(),
        });
        self.report(index);
    }
}

/// Run the agent over `features`. Per-feature failures are recorded, not
/// returned as errors.
async fn drive_agent(
    agent: &dyn CodingAgent,
    options: &SessionOptions,
    project_dir: &Path,
    instructions: &str,
    progress: &mut FeatureProgress<'_>,
    log: &mut SessionLog,
) -> Result<()> {
    let features = progress.features;
    let total = features.len();
    log.log(format!("Features to implement: {}", total));

    if options.single_session_first {
        log.log("Attempting full implementation in a single session");
        if agent
            .run_session(project_dir, instructions, options.timeout, log)
            .await?
        {
            log.log("Full implementation session completed");
            for index in 0..total {
                progress.complete(index);
            }
            return Ok(());
        }
        log.log("Full session failed or timed out; switching to per-feature sessions");
    }

    for (index, feature) in features.iter().enumerate() {
        progress.start(index);
        log.log(format!(
            "Implementing feature {}/{}: {}",
            index + 1,
            total,
            feature.name
        ));
        let prompt = prompts::feature_prompt(feature, index + 1, total);
        if agent
            .run_session(project_dir, &prompt, options.per_feature_timeout, log)
            .await?
        {
            log.log(format!("Feature completed: {}", feature.name));
            progress.complete(index);
        } else {
            log.log(format!("Feature FAILED: {}", feature.name));
            progress.fail(index, "Claude Code session failed or timed out");
        }
    }
    Ok(())
}

fn run_simulated(
    project_dir: &Path,
    progress: &mut FeatureProgress<'_>,
    log: &mut SessionLog,
) -> Result<()> {
    simulate::write_simulated_project(project_dir, progress.features, log)?;
    for index in 0..progress.features.len() {
        progress.start(index);
        progress.complete(index);
    }
    Ok(())
}

/// Run `features` with `agent`, or in simulated mode when `agent` is `None`.
pub async fn run_implementation(
    agent: Option<&dyn CodingAgent>,
    options: &SessionOptions,
    project_dir: &Path,
    prd_document: &Path,
    features: &[FeatureRecord],
    reporter: &ProgressReporter,
) -> ImplementationReport {
    let mode = if agent.is_some() {
        ImplementationMode::Real
    } else {
        ImplementationMode::Simulated
    };
    info!(
        dir = %project_dir.display(),
        features = features.len(),
        mode = mode.as_str(),
        "Starting implementation"
    );

    let mut progress = FeatureProgress::new(features, reporter);
    let mut log = SessionLog::new();
    let log_path = project_dir.join(SESSION_LOG);

    let instructions = prompts::project_instructions(prd_document, features);
    let outcome = match std::fs::write(project_dir.join(INSTRUCTIONS_FILE), &instructions)
        .context("Failed to write agent instructions")
    {
        Err(e) => Err(e),
        Ok(()) => match agent {
            Some(agent) => {
                drive_agent(
                    agent,
                    options,
                    project_dir,
                    &instructions,
                    &mut progress,
                    &mut log,
                )
                .await
            }
            None => run_simulated(project_dir, &mut progress, &mut log),
        },
    };

    if let Err(e) = &outcome {
        log.log(format!("Implementation aborted: {:#}", e));
    }
    let log_file = match log.write_to(&log_path) {
        Ok(()) => Some(log_path),
        Err(e) => {
            warn!("Could not write session log: {:#}", e);
            None
        }
    };

    let FeatureProgress {
        completed, failed, ..
    } = progress;
    let error = match outcome {
        Err(e) => Some(format!("{:#}", e)),
        Ok(()) if !failed.is_empty() => Some(format!(
            "{} of {} features failed",
            failed.len(),
            features.len()
        )),
        Ok(()) => None,
    };
    let status = if error.is_some() {
        ImplementationStatus::Failed
    } else {
        ImplementationStatus::Completed
    };
    info!(
        completed = completed.len(),
        failed = failed.len(),
        "Implementation finished"
    );

    ImplementationReport {
        status,
        mode,
        features_completed: completed,
        features_failed: failed,
        error,
        log_file,
    }
}

/// Implementer backed by the Claude Code CLI.
pub struct ClaudeImplementer {
    claude_cmd: String,
    options: SessionOptions,
}

impl ClaudeImplementer {
    pub fn new(claude_cmd: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            claude_cmd: claude_cmd.into(),
            options,
        }
    }

    /// Path of the CLI, if it is installed.
    pub fn locate(&self) -> Option<PathBuf> {
        find_executable(&self.claude_cmd)
    }
}

#[async_trait]
impl Implementer for ClaudeImplementer {
    async fn implement(
        &self,
        project_dir: &Path,
        prd_document: &Path,
        features: &[FeatureRecord],
        progress: ProgressReporter,
    ) -> Result<ImplementationReport> {
        std::fs::create_dir_all(project_dir)
            .with_context(|| format!("Failed to create {}", project_dir.display()))?;

        let cli = self.locate().map(ClaudeCli::new);
        match &cli {
            Some(cli) => info!(path = %cli.program().display(), "Claude Code CLI detected"),
            None => warn!(cmd = %self.claude_cmd, "Claude Code CLI not found; simulating"),
        }
        let agent = cli.as_ref().map(|c| c as &dyn CodingAgent);

        Ok(run_implementation(
            agent,
            &self.options,
            project_dir,
            prd_document,
            features,
            &progress,
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::prompts::tests::record;
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Succeeds unless the prompt mentions one of `failing`.
    struct FakeAgent {
        failing: HashSet<String>,
        fail_full_session: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeAgent {
        fn new(failing: &[&str], fail_full_session: bool) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                fail_full_session,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CodingAgent for FakeAgent {
        async fn run_session(
            &self,
            _project_dir: &Path,
            prompt: &str,
            _timeout: Duration,
            log: &mut SessionLog,
        ) -> Result<bool> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            log.log("fake session");
            if prompt.starts_with("# Implementation Instructions") {
                return Ok(!self.fail_full_session);
            }
            Ok(!self
                .failing
                .iter()
                .any(|f| prompt.contains(&format!("**Feature:** {}", f))))
        }
    }

    fn features() -> Vec<FeatureRecord> {
        vec![
            record("Setup", "Scaffold"),
            record("Auth", "Login"),
            record("Tasks", "Create task"),
        ]
    }

    #[tokio::test]
    async fn test_per_feature_sessions_in_order() {
        let dir = tempdir().unwrap();
        let agent = FakeAgent::new(&[], false);
        let (reporter, mut rx) = ProgressReporter::channel(64);

        let report = run_implementation(
            Some(&agent),
            &SessionOptions::default(),
            dir.path(),
            &dir.path().join("docs/PRD.md"),
            &features(),
            &reporter,
        )
        .await;

        assert_eq!(report.status, ImplementationStatus::Completed);
        assert_eq!(report.mode, ImplementationMode::Real);
        assert_eq!(report.features_completed, vec!["Scaffold", "Login", "Create task"]);
        assert!(report.error.is_none());

        let prompts = agent.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].starts_with("Implement feature 1/3"));
        assert!(prompts[2].contains("**Feature:** Create task"));

        // start + complete per feature
        drop(reporter);
        let mut updates = Vec::new();
        while let Ok(p) = rx.try_recv() {
            updates.push(p);
        }
        assert_eq!(updates.len(), 6);
        assert_eq!(updates.last().unwrap().features_completed.len(), 3);
        assert_eq!(updates[0].current_feature_index, 0);
        assert_eq!(updates[2].current_feature_index, 1);
        assert_eq!(updates.last().unwrap().current_feature_index, 2);

        assert!(dir.path().join(SESSION_LOG).is_file());
        assert!(dir.path().join(INSTRUCTIONS_FILE).is_file());
    }

    #[tokio::test]
    async fn test_feature_failure_is_recorded_and_continues() {
        let dir = tempdir().unwrap();
        let agent = FakeAgent::new(&["Login"], false);
        let report = run_implementation(
            Some(&agent),
            &SessionOptions::default(),
            dir.path(),
            &dir.path().join("docs/PRD.md"),
            &features(),
            &ProgressReporter::disabled(),
        )
        .await;

        assert_eq!(report.status, ImplementationStatus::Failed);
        assert_eq!(report.features_completed, vec!["Scaffold", "Create task"]);
        assert_eq!(report.features_failed.len(), 1);
        assert_eq!(report.features_failed[0].name, "Login");
        assert_eq!(report.error.as_deref(), Some("1 of 3 features failed"));
    }

    #[tokio::test]
    async fn test_single_session_success_completes_all_in_order() {
        let dir = tempdir().unwrap();
        let agent = FakeAgent::new(&["Login"], false);
        let options = SessionOptions {
            single_session_first: true,
            ..Default::default()
        };
        let report = run_implementation(
            Some(&agent),
            &options,
            dir.path(),
            &dir.path().join("docs/PRD.md"),
            &features(),
            &ProgressReporter::disabled(),
        )
        .await;

        assert_eq!(report.status, ImplementationStatus::Completed);
        assert_eq!(report.features_completed, vec!["Scaffold", "Login", "Create task"]);
        assert_eq!(agent.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_session_failure_falls_back_to_features() {
        let dir = tempdir().unwrap();
        let agent = FakeAgent::new(&[], true);
        let options = SessionOptions {
            single_session_first: true,
            ..Default::default()
        };
        let report = run_implementation(
            Some(&agent),
            &options,
            dir.path(),
            &dir.path().join("docs/PRD.md"),
            &features(),
            &ProgressReporter::disabled(),
        )
        .await;

        assert_eq!(report.status, ImplementationStatus::Completed);
        assert_eq!(report.features_completed.len(), 3);
        assert_eq!(agent.prompts.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_simulated_mode() {
        let dir = tempdir().unwrap();
        let report = run_implementation(
            None,
            &SessionOptions::default(),
            dir.path(),
            &dir.path().join("docs/PRD.md"),
            &features(),
            &ProgressReporter::disabled(),
        )
        .await;

        assert_eq!(report.status, ImplementationStatus::Completed);
        assert_eq!(report.mode, ImplementationMode::Simulated);
        assert_eq!(report.features_completed.len(), 3);
        assert!(dir.path().join("PLAN.md").is_file());
        let log = std::fs::read_to_string(dir.path().join(SESSION_LOG)).unwrap();
        assert!(log.contains("simulated mode"));
    }

    #[tokio::test]
    async fn test_simulated_mode_reports_start_and_complete() {
        let dir = tempdir().unwrap();
        let (reporter, mut rx) = ProgressReporter::channel(64);
        run_implementation(
            None,
            &SessionOptions::default(),
            dir.path(),
            &dir.path().join("docs/PRD.md"),
            &features(),
            &reporter,
        )
        .await;
        drop(reporter);

        let mut updates = Vec::new();
        while let Ok(p) = rx.try_recv() {
            updates.push(p);
        }
        let shape: Vec<(usize, usize)> = updates
            .iter()
            .map(|p| (p.current_feature_index, p.features_completed.len()))
            .collect();
        assert_eq!(shape, vec![(0, 0), (0, 1), (1, 1), (1, 2), (2, 2), (2, 3)]);
    }

    #[tokio::test]
    async fn test_missing_project_dir_reports_failure() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let report = run_implementation(
            None,
            &SessionOptions::default(),
            &missing,
            &missing.join("docs/PRD.md"),
            &features(),
            &ProgressReporter::disabled(),
        )
        .await;
        assert_eq!(report.status, ImplementationStatus::Failed);
        assert!(report.error.unwrap().contains("instructions"));
    }

    #[tokio::test]
    async fn test_claude_implementer_simulates_without_cli() {
        let dir = tempdir().unwrap();
        let implementer =
            ClaudeImplementer::new("ideaforge-no-such-claude", SessionOptions::default());
        assert!(implementer.locate().is_none());
        let report = implementer
            .implement(
                dir.path(),
                &dir.path().join("docs/PRD.md"),
                &features(),
                ProgressReporter::disabled(),
            )
            .await
            .unwrap();
        assert_eq!(report.mode, ImplementationMode::Simulated);
    }
}
