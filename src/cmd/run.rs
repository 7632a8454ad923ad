//! Full pipeline for one idea: `ideaforge run`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;

use ideaforge::app::build_orchestrator;
use ideaforge::config::Settings;
use ideaforge::errors::PipelineError;
use ideaforge::pipeline::models::ImplementationStatus;
use ideaforge::pipeline::validate::validate_app_idea;
use ideaforge::pipeline::{ProgressEvent, Run, RunRequest};

/// Idea text from `--idea` or the contents of `--idea-file`.
pub fn read_idea(idea: Option<&str>, idea_file: Option<&Path>) -> Result<String> {
    match (idea, idea_file) {
        (Some(idea), _) => Ok(idea.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read idea file: {}", path.display())),
        (None, None) => bail!("Provide an idea with --idea or --idea-file"),
    }
}

fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {prefix:.bold.dim} {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Mirror progress events onto the spinner until the channel closes.
async fn follow_events(bar: ProgressBar, mut rx: broadcast::Receiver<ProgressEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                bar.set_prefix(event.step.replace('_', " "));
                bar.set_message(event.detail.clone());
                if event.status == "completed" && event.step != "completed" {
                    bar.println(format!(
                        "  {} {}",
                        style("✓").green(),
                        event.detail
                    ));
                } else if event.status == "retrying" {
                    bar.println(format!("  {} {}", style("↻").yellow(), event.detail));
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_summary(run: &Run) {
    println!();
    println!("{}", style("Run completed").green().bold());
    println!("  Run:       {}", run.run_id);
    if let Some(idea) = &run.enhanced_idea {
        println!("  Project:   {}", idea.title);
    }
    if let Some(prd) = &run.prd {
        println!(
            "  PRD:       {} epics, {} features",
            prd.epics.len(),
            prd.feature_count()
        );
    }
    if let Some(repo) = &run.repository {
        println!("  Repo:      {}", repo.url);
    }
    if let Some(dir) = &run.project_dir {
        println!("  Directory: {}", dir.display());
    }
    if let Some(report) = &run.implementation {
        let status = match report.status {
            ImplementationStatus::Completed => style("completed").green(),
            ImplementationStatus::Failed => style("failed").red(),
        };
        println!(
            "  Code:      {} ({} of {} features, {} mode)",
            status,
            report.features_completed.len(),
            run.features.len(),
            report.mode.as_str()
        );
        for failure in &report.features_failed {
            println!("    {} {}: {}", style("✗").red(), failure.name, failure.error);
        }
    }
    println!("  Elapsed:   {:.1}s", run.elapsed_secs);
    println!();
}

pub async fn cmd_run(settings: &Settings, idea: String, tech: Option<String>) -> Result<()> {
    // Reject bad input before touching credentials or the network.
    let idea = match validate_app_idea(Some(&idea)) {
        Ok(idea) => idea,
        Err(e) => bail!("Invalid idea: {}", e),
    };

    let (tx, rx) = broadcast::channel(256);
    let orchestrator = build_orchestrator(settings)?.with_event_channel(tx);

    let mut request = RunRequest::new(idea);
    request.tech_preferences = tech;

    println!();
    println!("{}", style("ideaforge").cyan().bold());
    println!("  Projects: {}", settings.projects_dir.display());
    println!();

    let bar = spinner();
    let follower = tokio::spawn(follow_events(bar.clone(), rx));
    let result = orchestrator.run(request).await;
    drop(orchestrator);
    let _ = follower.await;
    bar.finish_and_clear();

    match result {
        Ok(run) => {
            print_summary(&run);
            Ok(())
        }
        Err(PipelineError::InputValidation(e)) => bail!("Invalid input: {}", e),
        Err(e) => {
            println!("{} {}", style("Run failed:").red().bold(), e);
            Err(e.into())
        }
    }
}
