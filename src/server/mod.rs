//! HTTP + WebSocket adapter over the run store.

pub mod api;
pub mod ws;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

pub use api::{AppState, SharedState};

/// Upper bound on the interval between eviction sweeps.
const EVICTION_SWEEP: Duration = Duration::from_secs(60);

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow cross-origin requests from any origin.
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            permissive_cors: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

/// Periodically drop finished runs older than the state's TTL.
pub fn spawn_eviction(state: SharedState) -> tokio::task::JoinHandle<()> {
    let period = state.run_ttl.min(EVICTION_SWEEP).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = state.store.evict_expired(state.run_ttl);
            if evicted > 0 {
                debug!(evicted, remaining = state.store.len(), "Evicted finished runs");
            }
        }
    })
}

/// Serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, state: SharedState) -> Result<()> {
    let eviction = spawn_eviction(state.clone());

    let mut app = build_router(state);
    if config.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "ideaforge server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");
    eviction.abort();
    served?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        // Without a signal handler, serve until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::{AppState, SharedState};
    use crate::artifacts::ArtifactManager;
    use crate::history::HistoryHandle;
    use crate::implement::{ClaudeImplementer, SessionOptions};
    use crate::llm::{LlmClient, LlmIdeaService};
    use crate::pipeline::models::RepositoryInfo;
    use crate::pipeline::{
        Collaborators, PipelineSettings, Publisher, RepositoryProvisioner, RetryPolicy, RunStore,
    };
    use crate::scaffold::FileScaffolder;

    /// Replies with prose, so both LLM steps take their fallbacks.
    struct ProseClient;

    #[async_trait]
    impl LlmClient for ProseClient {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("Sure! Here is a great plan for your app.".to_string())
        }
    }

    struct LocalRepos;

    #[async_trait]
    impl RepositoryProvisioner for LocalRepos {
        async fn create(&self, name_hint: &str, _description: &str) -> Result<RepositoryInfo> {
            let name = crate::github::sanitize_repo_name(name_hint);
            Ok(RepositoryInfo {
                url: format!("https://example.test/me/{}", name),
                clone_url: format!("https://example.test/me/{}.git", name),
                full_name: format!("me/{}", name),
                name,
            })
        }
    }

    struct NoopPublisher;

    #[async_trait]
    impl Publisher for NoopPublisher {
        async fn publish(&self, _dir: &Path, _repo: &RepositoryInfo) -> Result<()> {
            Ok(())
        }
    }

    /// Real local collaborators with fake network edges, rooted in a temp dir.
    pub(crate) fn test_state() -> (SharedState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryHandle::in_memory().unwrap();
        let llm = Arc::new(LlmIdeaService::new(Arc::new(ProseClient)));
        let collaborators = Collaborators {
            enhancer: llm.clone(),
            prd_generator: llm,
            repositories: Arc::new(LocalRepos),
            scaffolder: Arc::new(FileScaffolder),
            implementer: Arc::new(ClaudeImplementer::new(
                "/nonexistent/claude",
                SessionOptions::default(),
            )),
            organizer: Arc::new(ArtifactManager),
            publisher: Arc::new(NoopPublisher),
            history: Arc::new(history.clone()),
        };
        let fast = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2))
            .with_jitter(Duration::ZERO);
        let settings = PipelineSettings {
            projects_dir: PathBuf::from(dir.path()),
            enhance_retry: fast.clone(),
            prd_retry: fast.clone(),
            repository_retry: fast.clone(),
            publish_retry: fast,
            progress_capacity: 16,
        };
        let state = Arc::new(AppState {
            store: RunStore::new(),
            collaborators,
            settings,
            history,
            run_ttl: Duration::from_secs(3600),
        });
        (state, dir)
    }
}
