//! tracing subscriber setup: stderr output plus an optional daily-rotated
//! JSON log file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "ideaforge.log";

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Used when `RUST_LOG` is not set
    pub level: String,
    /// JSON lines on stderr instead of the human format
    pub json: bool,
    /// Directory for the rotated log file; `None` disables it
    pub file_dir: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_dir: None,
        }
    }
}

/// `RUST_LOG` wins; otherwise `level`, falling back to `info` when it does
/// not parse.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop and must be held for the life of the process.
pub fn init_tracing(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
    if options.json {
        layers.push(stderr.json().boxed());
    } else {
        layers.push(stderr.boxed());
    }

    let mut guard = None;
    if let Some(dir) = &options.file_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .boxed(),
        );
        guard = Some(file_guard);
    }

    let subscriber = tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&options.level));

    if subscriber.try_init().is_err() {
        tracing::debug!("Global tracing subscriber already set; keeping it");
    }

    Ok(guard)
}
