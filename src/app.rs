//! Production wiring: collaborators and server state built from [`Settings`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::info;

use crate::artifacts::ArtifactManager;
use crate::config::Settings;
use crate::github::{GitPublisher, GithubClient};
use crate::history::HistoryHandle;
use crate::implement::{ClaudeImplementer, SessionOptions};
use crate::llm::{GeminiClient, LlmIdeaService};
use crate::pipeline::{Collaborators, Orchestrator, RunStore};
use crate::scaffold::FileScaffolder;
use crate::server::AppState;

/// Username git sends alongside a token when the account login is unknown.
/// GitHub accepts any non-empty value for token auth.
const TOKEN_GIT_USER: &str = "x-access-token";

pub fn session_options(settings: &Settings) -> SessionOptions {
    SessionOptions {
        timeout: settings.implementation_timeout,
        per_feature_timeout: settings.per_feature_timeout,
        single_session_first: settings.toml.implementation.single_session_first,
    }
}

/// Live collaborators. Fails when a required credential is missing.
pub fn build_collaborators(settings: &Settings, history: HistoryHandle) -> Result<Collaborators> {
    let missing = settings.missing_credentials();
    if !missing.is_empty() {
        bail!(
            "Missing required credentials: {}. Set them in the environment or a .env file.",
            missing.join(", ")
        );
    }
    let (Some(api_key), Some(token)) = (&settings.gemini_api_key, &settings.github_token) else {
        bail!("Missing required credentials");
    };

    let gemini = GeminiClient::new(api_key.clone(), &settings.toml.gemini)?;
    info!(model = gemini.model(), "Using Gemini");
    let llm = Arc::new(LlmIdeaService::new(Arc::new(gemini)));

    let github = GithubClient::new(
        token.clone(),
        &settings.toml.github.api_base,
        settings.repo_visibility,
        settings.github_username.clone(),
    );
    let git_user = settings
        .github_username
        .clone()
        .unwrap_or_else(|| TOKEN_GIT_USER.to_string());

    Ok(Collaborators {
        enhancer: llm.clone(),
        prd_generator: llm,
        repositories: Arc::new(github),
        scaffolder: Arc::new(FileScaffolder),
        implementer: Arc::new(ClaudeImplementer::new(
            settings.claude_cmd.clone(),
            session_options(settings),
        )),
        organizer: Arc::new(ArtifactManager),
        publisher: Arc::new(GitPublisher::new(token.clone(), git_user)),
        history: Arc::new(history),
    })
}

pub fn open_history(settings: &Settings) -> Result<HistoryHandle> {
    HistoryHandle::open(&settings.history_db())
}

/// Orchestrator over live collaborators.
pub fn build_orchestrator(settings: &Settings) -> Result<Orchestrator> {
    let history = open_history(settings)?;
    let collaborators = build_collaborators(settings, history)?;
    Ok(Orchestrator::new(collaborators, settings.pipeline_settings()))
}

pub fn build_app_state(settings: &Settings) -> Result<Arc<AppState>> {
    let history = open_history(settings)?;
    let collaborators = build_collaborators(settings, history.clone())?;
    Ok(Arc::new(AppState {
        store: RunStore::new(),
        collaborators,
        settings: settings.pipeline_settings(),
        history,
        run_ttl: Duration::from_secs(settings.toml.server.run_ttl_secs),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdeaForgeToml;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn settings(vars: &[(&str, &str)], data_dir: PathBuf) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut toml = IdeaForgeToml::default();
        toml.storage.data_dir = data_dir;
        Settings::from_sources(PathBuf::from(".ideaforge"), toml, |k| vars.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_missing_credentials_are_named() {
        let dir = tempdir().unwrap();
        let s = settings(&[("GITHUB_TOKEN", "ghp_x")], dir.path().to_path_buf());
        let history = HistoryHandle::in_memory().unwrap();
        let err = build_collaborators(&s, history).err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
        assert!(!err.to_string().contains("GITHUB_TOKEN"));
    }

    #[tokio::test]
    async fn test_app_state_from_settings() {
        let dir = tempdir().unwrap();
        let s = settings(
            &[("GEMINI_API_KEY", "key"), ("GITHUB_TOKEN", "ghp_x")],
            dir.path().join("data"),
        );
        let state = build_app_state(&s).unwrap();
        assert_eq!(state.run_ttl, Duration::from_secs(3600));
        assert!(state.store.is_empty());
        assert!(dir.path().join("data/history.db").is_file());
    }

    #[test]
    fn test_session_options_follow_settings() {
        let dir = tempdir().unwrap();
        let s = settings(&[("CODE_EXECUTION_TIMEOUT", "900")], dir.path().to_path_buf());
        let options = session_options(&s);
        assert_eq!(options.timeout, Duration::from_secs(900));
        assert_eq!(options.per_feature_timeout, Duration::from_secs(300));
        assert!(!options.single_session_first);
    }
}
