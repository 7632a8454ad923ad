//! Recent runs: `ideaforge history`.

use anyhow::Result;
use console::style;

use ideaforge::app::open_history;
use ideaforge::config::Settings;
use ideaforge::pipeline::models::RunSummary;

fn status_label(status: &str) -> String {
    match status {
        "completed" => style(status).green().to_string(),
        "failed" => style(status).red().to_string(),
        _ => style(status).yellow().to_string(),
    }
}

fn print_run(summary: &RunSummary) {
    println!(
        "{}  {:<9}  {}",
        summary.timestamp.format("%Y-%m-%d %H:%M"),
        status_label(&summary.status),
        summary.project_title.as_deref().unwrap_or("(untitled)")
    );
    println!(
        "    {}  {}/{} features  {:.0}s",
        style(&summary.run_id).dim(),
        summary.features_completed,
        summary.features_count,
        summary.elapsed_secs
    );
    if let Some(url) = &summary.repo_url {
        println!("    {}", url);
    }
    if let Some(error) = &summary.error {
        let step = summary.failed_step.as_deref().unwrap_or("run");
        println!("    {} {}: {}", style("✗").red(), step, error);
    }
}

pub async fn cmd_history(settings: &Settings, limit: usize) -> Result<()> {
    let history = open_history(settings)?;
    let runs = history.list(limit).await?;

    println!();
    if runs.is_empty() {
        println!("No runs recorded yet.");
        println!();
        return Ok(());
    }
    for summary in &runs {
        print_run(summary);
    }
    println!();
    Ok(())
}
