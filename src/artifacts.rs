//! Project tree tidy-up before publishing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::pipeline::ArtifactOrganizer;

const STANDARD_DIRS: &[&str] = &["docs", "src", "tests", "logs", "config"];
const DOC_EXTENSIONS: &[&str] = &["md", "txt", "pdf"];
const DOC_KEYWORDS: &[&str] = &["spec", "plan", "design", "architecture"];
const TEMP_EXTENSIONS: &[&str] = &["pyc", "pyo", "tmp"];
const CACHE_DIRS: &[&str] = &["__pycache__"];
/// Removed from the project root only.
const ROOT_JUNK: &[&str] = &[".DS_Store", "Thumbs.db", ".claude_instructions.md"];
/// Skipped entirely while walking.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", ".venv"];

/// Never moved or deleted.
const PROTECTED: &[&str] = &[
    "src",
    "tests",
    "docs",
    "config",
    "logs",
    "README.md",
    "LICENSE",
    ".gitignore",
    "requirements.txt",
    "requirements.json",
    "setup.py",
    "pyproject.toml",
    "package.json",
    "Cargo.toml",
];

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OrganizeSummary {
    pub moved_docs: Vec<String>,
    pub moved_logs: Vec<String>,
    pub removed: Vec<PathBuf>,
}

fn is_protected(name: &str) -> bool {
    PROTECTED.contains(&name)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

fn is_doc(path: &Path, name: &str) -> bool {
    let lower = name.to_lowercase();
    extension(path).is_some_and(|e| DOC_EXTENSIONS.contains(&e.as_str()))
        || DOC_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn is_log(path: &Path) -> bool {
    extension(path).is_some_and(|e| e == "log")
}

fn root_files(project_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(project_dir)
        .with_context(|| format!("Failed to read {}", project_dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push((entry.path(), entry.file_name().to_string_lossy().into_owned()));
        }
    }
    files.sort();
    Ok(files)
}

/// Move `path` into `dir` unless a file of that name is already there.
fn move_into(path: &Path, name: &str, dir: &Path) -> Result<bool> {
    let target = dir.join(name);
    if target.exists() {
        debug!(file = name, "Target exists; leaving in place");
        return Ok(false);
    }
    std::fs::rename(path, &target)
        .with_context(|| format!("Failed to move {} to {}", path.display(), dir.display()))?;
    Ok(true)
}

fn remove_temp_files(project_dir: &Path, summary: &mut OrganizeSummary) {
    let walker = WalkDir::new(project_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !SKIP_DIRS.iter().any(|d| *d == name)
        });

    let mut cache_dirs = Vec::new();
    let mut temp_files = Vec::new();
    for entry in walker.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy();
        if is_protected(&name) {
            continue;
        }
        if entry.file_type().is_dir() && CACHE_DIRS.iter().any(|d| *d == name) {
            cache_dirs.push(entry.into_path());
        } else if entry.file_type().is_file()
            && extension(entry.path()).is_some_and(|e| TEMP_EXTENSIONS.contains(&e.as_str()))
        {
            temp_files.push(entry.into_path());
        }
    }

    for dir in cache_dirs {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => summary.removed.push(dir),
            // Already gone with an enclosing cache dir
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", dir.display(), e),
        }
    }
    for file in temp_files {
        match std::fs::remove_file(&file) {
            Ok(()) => summary.removed.push(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", file.display(), e),
        }
    }

    for name in ROOT_JUNK {
        let path = project_dir.join(name);
        if path.is_file() {
            match std::fs::remove_file(&path) {
                Ok(()) => summary.removed.push(path),
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Ensure the standard directories, move stray root-level docs and logs
/// into them, and delete temp and cache files.
pub fn organize_project(project_dir: &Path) -> Result<OrganizeSummary> {
    let mut summary = OrganizeSummary::default();

    for dir in STANDARD_DIRS {
        let path = project_dir.join(dir);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }

    let docs_dir = project_dir.join("docs");
    let logs_dir = project_dir.join("logs");
    for (path, name) in root_files(project_dir)? {
        // Hidden files are tool state, not documents
        if is_protected(&name) || name.starts_with('.') {
            continue;
        }
        if is_log(&path) {
            if move_into(&path, &name, &logs_dir)? {
                summary.moved_logs.push(name);
            }
        } else if is_doc(&path, &name) && move_into(&path, &name, &docs_dir)? {
            summary.moved_docs.push(name);
        }
    }

    remove_temp_files(project_dir, &mut summary);

    info!(
        dir = %project_dir.display(),
        docs = summary.moved_docs.len(),
        logs = summary.moved_logs.len(),
        removed = summary.removed.len(),
        "Artifacts organized"
    );
    Ok(summary)
}

pub struct ArtifactManager;

#[async_trait]
impl ArtifactOrganizer for ArtifactManager {
    async fn organize(&self, project_dir: &Path) -> Result<()> {
        let dir = project_dir.to_path_buf();
        tokio::task::spawn_blocking(move || organize_project(&dir))
            .await
            .context("Organize task panicked")??;
        Ok(())
    }
}
