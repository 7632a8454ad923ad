//! Simulated implementation: a plan and a placeholder tree, written when no
//! coding agent is installed.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

use super::claude::SessionLog;
use crate::pipeline::models::FeatureRecord;

const INSTALL_HINT: &str = "npm install -g @anthropic-ai/claude-code";

pub fn plan_markdown(features: &[FeatureRecord]) -> String {
    let mut md = String::from("# Implementation Plan\n\n## Overview\n\n");
    md.push_str("All PRD features in dependency and priority order.\n\n");
    let _ = writeln!(
        md,
        "> This plan was generated without a coding agent. Install the Claude Code CLI\n\
         > (`{INSTALL_HINT}`) and re-run for a real implementation.\n"
    );

    let mut current_epic: Option<&str> = None;
    for feature in features {
        if current_epic != Some(feature.epic.as_str()) {
            current_epic = Some(feature.epic.as_str());
            let _ = writeln!(md, "\n## Epic: {} [{}]\n", feature.epic, feature.epic_priority);
        }
        let _ = write!(md, "- [ ] {} ({})", feature.name, feature.complexity);
        if !feature.description.is_empty() {
            let _ = write!(md, ": {}", feature.description);
        }
        md.push('\n');
    }
    md.push_str("\n---\n*Generated by ideaforge (simulated mode)*\n");
    md
}

fn write_if_absent(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Write PLAN.md plus src/ and tests/ placeholders, recording each feature
/// in the session log.
pub fn write_simulated_project(
    project_dir: &Path,
    features: &[FeatureRecord],
    log: &mut SessionLog,
) -> Result<()> {
    log.log("Claude Code CLI not found; running in simulated mode");
    log.log(format!("To enable real implementation: {INSTALL_HINT}"));
    log.log("Then set CLAUDE_CODE_PATH if the CLI is installed somewhere custom");
    log.log(format!(
        "Project: {} ({})",
        project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));

    std::fs::write(project_dir.join("PLAN.md"), plan_markdown(features))
        .context("Failed to write PLAN.md")?;
    log.log("Created implementation plan (PLAN.md)");

    write_if_absent(
        &project_dir.join("src/main.py"),
        "\"\"\"Application entry point. Placeholder from simulated mode.\"\"\"\n\n\n\
         def main():\n    print(\"Application initialized; features pending implementation\")\n\n\n\
         if __name__ == \"__main__\":\n    main()\n",
    )?;
    write_if_absent(&project_dir.join("tests/__init__.py"), "")?;
    write_if_absent(
        &project_dir.join("tests/test_main.py"),
        "def test_placeholder():\n    assert True\n",
    )?;
    log.log("Created project scaffold with placeholder code");

    for (i, feature) in features.iter().enumerate() {
        log.log(format!("[FEATURE {}] {}: {}", i + 1, feature.name, feature.description));
    }
    log.log("Simulation finished");
    Ok(())
}
