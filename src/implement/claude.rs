//! Claude Code CLI sessions.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Output lines copied into the session log per stream.
const STDOUT_LOG_LINES: usize = 50;
const STDERR_LOG_LINES: usize = 10;

/// Timestamped lines written to `logs/claude_session.log`.
#[derive(Debug, Default)]
pub struct SessionLog {
    lines: Vec<String>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!("{}", message);
        self.lines
            .push(format!("[{}] {}", Local::now().format("%H:%M:%S"), message));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut content = self.lines.join("\n");
        content.push('\n');
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write session log {}", path.display()))
    }
}

/// One non-interactive agent session in a project directory.
#[async_trait]
pub trait CodingAgent: Send + Sync {
    /// Returns whether the session finished successfully within `timeout`.
    async fn run_session(
        &self,
        project_dir: &Path,
        prompt: &str,
        timeout: Duration,
        log: &mut SessionLog,
    ) -> Result<bool>;
}

/// Resolve a command to an executable path. Commands containing a path
/// separator are checked as-is; bare names are searched on `PATH`.
pub fn find_executable(cmd: &str) -> Option<PathBuf> {
    let candidate = Path::new(cmd);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| {
            [
                dir.join(cmd),
                dir.join(format!("{cmd}.exe")),
                dir.join(format!("{cmd}.cmd")),
            ]
        })
        .find(|p| p.is_file())
}

fn log_output(log: &mut SessionLog, prefix: &str, output: &[u8], limit: usize) {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.trim().lines().collect();
    for line in lines.iter().take(limit) {
        log.log(format!("[{}] {}", prefix, line));
    }
    if lines.len() > limit {
        log.log(format!("[{}] ... ({} more lines)", prefix, lines.len() - limit));
    }
}

/// `claude --print --output-format text` with the prompt on stdin.
pub struct ClaudeCli {
    program: PathBuf,
}

impl ClaudeCli {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl CodingAgent for ClaudeCli {
    async fn run_session(
        &self,
        project_dir: &Path,
        prompt: &str,
        timeout: Duration,
        log: &mut SessionLog,
    ) -> Result<bool> {
        log.log(format!(
            "Executing: {} --print --output-format text",
            self.program.display()
        ));
        let start = Instant::now();

        let mut child = match Command::new(&self.program)
            .args(["--print", "--output-format", "text"])
            .current_dir(project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log.log(format!("Failed to start Claude Code: {}", e));
                return Ok(false);
            }
        };

        // A process that exits early closes the pipe; its exit status decides.
        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                log.log(format!("Could not write prompt to stdin: {}", e));
            }
        }

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for Claude process")?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Claude session timed out");
                log.log(format!(
                    "Session timed out after {}s; terminated",
                    timeout.as_secs()
                ));
                return Ok(false);
            }
        };

        log_output(log, "claude", &output.stdout, STDOUT_LOG_LINES);
        log_output(log, "claude:stderr", &output.stderr, STDERR_LOG_LINES);

        let elapsed = start.elapsed().as_secs_f64();
        if !output.status.success() {
            log.log(format!(
                "Claude Code exited with code {} after {:.1}s",
                output.status.code().unwrap_or(-1),
                elapsed
            ));
            return Ok(false);
        }

        info!(elapsed_secs = elapsed, "Claude session completed");
        log.log(format!("Session completed in {:.1}s", elapsed));
        Ok(true)
    }
}
