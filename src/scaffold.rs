//! Initial project files written right after the repository is created.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::pipeline::ProjectScaffolder;
use crate::pipeline::models::{EnhancedIdea, Epic, Prd};

pub const PRD_DOCUMENT: &str = "docs/PRD.md";
const EPICS_DIR: &str = "docs/epics";
const SLUG_MAX_CHARS: usize = 40;

const GITIGNORE: &str = "\
# Dependencies and build output
node_modules/
target/
dist/
build/
__pycache__/
*.pyc
.venv/

# Environment
.env
.env.local

# Editors and OS
.idea/
.vscode/
.DS_Store
Thumbs.db

# Logs
*.log
";

/// Convert a title to a filename-safe slug, limited to `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(max_len).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "epic".to_string()
    } else {
        slug.to_string()
    }
}

fn readme(idea: &EnhancedIdea, prd: &Prd) -> String {
    let mut md = format!("# {}\n\n{}\n\n", idea.title, idea.description);

    if !idea.problem_statement.is_empty() {
        let _ = writeln!(md, "## Problem\n\n{}\n", idea.problem_statement);
    }
    if !idea.target_users.is_empty() {
        let _ = writeln!(md, "## Target Users\n\n{}\n", idea.target_users);
    }
    if !idea.key_value_props.is_empty() {
        md.push_str("## Key Value Propositions\n\n");
        for prop in &idea.key_value_props {
            let _ = writeln!(md, "- {prop}");
        }
        md.push('\n');
    }
    if !idea.suggested_tech_stack.layers.is_empty() {
        md.push_str("## Tech Stack\n\n");
        for (layer, techs) in &idea.suggested_tech_stack.layers {
            let _ = writeln!(md, "- **{}**: {}", layer, techs.join(", "));
        }
        md.push('\n');
    }
    if !prd.epics.is_empty() {
        md.push_str("## Epics\n\n");
        for (i, epic) in prd.epics.iter().enumerate() {
            let _ = writeln!(
                md,
                "{}. [{}]({}/{}) ({})",
                i + 1,
                epic.name,
                EPICS_DIR,
                epic_file_name(i, epic),
                epic.priority
            );
        }
        md.push('\n');
    }

    let _ = write!(
        md,
        "See [the PRD]({}) for the full requirements.\n\n---\n*Generated by ideaforge on {}*\n",
        PRD_DOCUMENT,
        Utc::now().format("%Y-%m-%d")
    );
    md
}

fn epic_file_name(index: usize, epic: &Epic) -> String {
    format!("{:02}-{}.md", index + 1, slugify(&epic.name, SLUG_MAX_CHARS))
}

fn epic_document(index: usize, epic: &Epic) -> String {
    let mut md = format!("# Epic {}: {} [{}]\n\n", index + 1, epic.name, epic.priority);
    if !epic.description.is_empty() {
        let _ = writeln!(md, "{}\n", epic.description);
    }
    if !epic.depends_on.is_empty() {
        let _ = writeln!(md, "**Depends on:** {}\n", epic.depends_on.join(", "));
    }
    for story in &epic.user_stories {
        let _ = writeln!(md, "## {}\n", story.title);
        if !story.story.is_empty() {
            let _ = writeln!(md, "> {}\n", story.story);
        }
        for ac in &story.acceptance_criteria {
            let _ = writeln!(md, "- [ ] {ac}");
        }
        if !story.acceptance_criteria.is_empty() {
            md.push('\n');
        }
        for feature in &story.features {
            let _ = writeln!(
                md,
                "- `[{}]` **{}** {}",
                feature.complexity, feature.name, feature.description
            );
        }
        if !story.features.is_empty() {
            md.push('\n');
        }
    }
    md
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Wrote scaffold file");
    Ok(())
}

/// Write README.md, docs/PRD.md, one file per epic, requirements.json and
/// .gitignore. Returns the path of docs/PRD.md.
pub fn write_project_files(
    project_dir: &Path,
    idea: &EnhancedIdea,
    prd: &Prd,
    prd_document: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(project_dir)
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    write_file(&project_dir.join("README.md"), &readme(idea, prd))?;

    let prd_path = project_dir.join(PRD_DOCUMENT);
    write_file(&prd_path, prd_document)?;

    for (i, epic) in prd.epics.iter().enumerate() {
        write_file(
            &project_dir.join(EPICS_DIR).join(epic_file_name(i, epic)),
            &epic_document(i, epic),
        )?;
    }

    let requirements = json!({
        "enhanced_idea": idea,
        "prd": prd,
        "generated_at": Utc::now().to_rfc3339(),
    });
    let requirements =
        serde_json::to_string_pretty(&requirements).context("Failed to serialize requirements")?;
    write_file(&project_dir.join("requirements.json"), &requirements)?;

    let gitignore = project_dir.join(".gitignore");
    if !gitignore.exists() {
        write_file(&gitignore, GITIGNORE)?;
    }

    info!(
        dir = %project_dir.display(),
        epics = prd.epics.len(),
        "Project scaffolded"
    );
    Ok(prd_path)
}

pub struct FileScaffolder;

#[async_trait]
impl ProjectScaffolder for FileScaffolder {
    async fn scaffold(
        &self,
        project_dir: &Path,
        idea: &EnhancedIdea,
        prd: &Prd,
        prd_document: &str,
    ) -> Result<PathBuf> {
        let project_dir = project_dir.to_path_buf();
        let idea = idea.clone();
        let prd = prd.clone();
        let prd_document = prd_document.to_string();
        tokio::task::spawn_blocking(move || {
            write_project_files(&project_dir, &idea, &prd, &prd_document)
        })
        .await
        .context("Scaffold task panicked")?
    }
}
