//! GitHub repository provisioning (REST) and publishing (git CLI).

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::RepoVisibility;
use crate::pipeline::models::RepositoryInfo;
use crate::pipeline::{Publisher, RepositoryProvisioner};

const USER_AGENT: &str = "ideaforge";
const MAX_REPO_NAME_CHARS: usize = 100;
const FALLBACK_REPO_NAME: &str = "generated-project";
/// Upper bound on `-N` suffixes tried before giving up on a free name.
const MAX_NAME_SUFFIX: u32 = 100;
const COMMIT_MESSAGE: &str = "Initial commit: generated by ideaforge";

/// A GitHub repository (subset of fields we care about).
#[derive(Debug, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub full_name: String,
    pub name: String,
    pub private: bool,
    pub html_url: String,
    pub clone_url: String,
    pub description: Option<String>,
}

impl From<GitHubRepo> for RepositoryInfo {
    fn from(repo: GitHubRepo) -> Self {
        Self {
            name: repo.name,
            url: repo.html_url,
            clone_url: repo.clone_url,
            full_name: repo.full_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
    auto_init: bool,
}

/// Lowercase, non `[a-z0-9-]` characters become `-`, runs of `-` collapse,
/// edges are trimmed and the result is capped at 100 characters.
pub fn sanitize_repo_name(name: &str) -> String {
    let slug = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(MAX_REPO_NAME_CHARS).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        FALLBACK_REPO_NAME.to_string()
    } else {
        slug.to_string()
    }
}

/// Candidate names in the order they are tried: `base`, `base-1`, `base-2`, …
fn candidate_name(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

pub struct GithubClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
    visibility: RepoVisibility,
    username: OnceCell<String>,
}

impl GithubClient {
    pub fn new(
        token: impl Into<String>,
        api_base: &str,
        visibility: RepoVisibility,
        username: Option<String>,
    ) -> Self {
        let cell = OnceCell::new();
        if let Some(name) = username {
            let _ = cell.set(name);
        }
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            visibility,
            username: cell,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    /// Login of the token's owner, fetched once.
    pub async fn username(&self) -> Result<&str> {
        let name = self
            .username
            .get_or_try_init(|| async {
                let user = self
                    .get("/user")
                    .send()
                    .await
                    .context("Failed to send user request to GitHub")?
                    .error_for_status()
                    .context("GitHub user API returned error status")?
                    .json::<GitHubUser>()
                    .await
                    .context("Failed to parse user response from GitHub")?;
                Ok::<_, anyhow::Error>(user.login)
            })
            .await?;
        Ok(name.as_str())
    }

    pub async fn repo_exists(&self, owner: &str, name: &str) -> Result<bool> {
        let resp = self
            .get(&format!("/repos/{}/{}", owner, name))
            .send()
            .await
            .context("Failed to send repo lookup to GitHub")?;
        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => bail!("GitHub repo lookup for {}/{} returned {}", owner, name, s),
        }
    }

    async fn create_repo(&self, name: &str, description: &str) -> Result<GitHubRepo> {
        let body = CreateRepoRequest {
            name,
            description,
            private: self.visibility.is_private(),
            auto_init: false,
        };
        self.http
            .post(format!("{}/user/repos", self.api_base))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .json(&body)
            .send()
            .await
            .context("Failed to send create-repo request to GitHub")?
            .error_for_status()
            .context("GitHub create-repo API returned error status")?
            .json::<GitHubRepo>()
            .await
            .context("Failed to parse create-repo response from GitHub")
    }
}

#[async_trait]
impl RepositoryProvisioner for GithubClient {
    async fn create(&self, name_hint: &str, description: &str) -> Result<RepositoryInfo> {
        let owner = self.username().await?.to_string();
        let base = sanitize_repo_name(name_hint);

        for attempt in 0..=MAX_NAME_SUFFIX {
            let name = candidate_name(&base, attempt);
            if self.repo_exists(&owner, &name).await? {
                debug!(repo = %name, "Repository name taken");
                continue;
            }
            info!(repo = %name, visibility = %self.visibility, "Creating repository");
            let repo = self.create_repo(&name, description).await?;
            return Ok(repo.into());
        }
        bail!(
            "No free repository name for '{}' after {} attempts",
            base,
            MAX_NAME_SUFFIX + 1
        )
    }
}

// ── Publishing ────────────────────────────────────────────────────────

/// Replace every occurrence of `secret` in `text`.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "[REDACTED]")
    }
}

/// Pushes a project directory with the git CLI.
///
/// Credentials reach git through an inline credential helper that reads
/// them from the environment, so the token never appears in argv or in the
/// remote URL.
pub struct GitPublisher {
    token: String,
    username: String,
}

impl GitPublisher {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
        }
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("IDEAFORGE_GIT_USER", &self.username)
            .env("IDEAFORGE_GIT_TOKEN", &self.token)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))
    }

    async fn git_ok(&self, dir: &Path, args: &[&str]) -> Result<()> {
        let output = self.git(dir, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git {} failed: {}",
                args.join(" "),
                redact(stderr.trim(), &self.token)
            );
        }
        Ok(())
    }
}

fn nothing_to_commit(output: &std::process::Output) -> bool {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout.contains("nothing to commit") || stderr.contains("nothing to commit")
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn publish(&self, project_dir: &Path, repo: &RepositoryInfo) -> Result<()> {
        info!(url = %repo.url, "Publishing project");

        if !project_dir.join(".git").exists() {
            self.git_ok(project_dir, &["init"]).await?;
        }
        self.git_ok(project_dir, &["branch", "-M", "main"]).await?;

        let add_remote = self
            .git(project_dir, &["remote", "add", "origin", &repo.clone_url])
            .await?;
        if !add_remote.status.success() {
            self.git_ok(project_dir, &["remote", "set-url", "origin", &repo.clone_url])
                .await?;
        }

        self.git_ok(project_dir, &["add", "-A"]).await?;

        let commit = self
            .git(
                project_dir,
                &[
                    "-c",
                    "user.name=ideaforge",
                    "-c",
                    "user.email=ideaforge@users.noreply.github.com",
                    "commit",
                    "-m",
                    COMMIT_MESSAGE,
                ],
            )
            .await?;
        if !commit.status.success() {
            if nothing_to_commit(&commit) {
                debug!("Nothing new to commit; pushing existing history");
            } else {
                let stderr = String::from_utf8_lossy(&commit.stderr);
                bail!("git commit failed: {}", redact(stderr.trim(), &self.token));
            }
        }

        self.git_ok(
            project_dir,
            &[
                "-c",
                "credential.helper=",
                "-c",
                "credential.helper=!f() { echo username=$IDEAFORGE_GIT_USER; echo password=$IDEAFORGE_GIT_TOKEN; }; f",
                "push",
                "-u",
                "origin",
                "main",
            ],
        )
        .await?;

        info!(url = %repo.url, "Published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_repo_name("My Cool App"), "my-cool-app");
        assert_eq!(sanitize_repo_name("TeamFlow: Async Standups!"), "teamflow-async-standups");
    }

    #[test]
    fn test_sanitize_collapses_and_trims_dashes() {
        assert_eq!(sanitize_repo_name("--a___b--"), "a-b");
        assert_eq!(sanitize_repo_name("Café ☕ Finder"), "caf-finder");
    }

    #[test]
    fn test_sanitize_falls_back_when_empty() {
        assert_eq!(sanitize_repo_name(""), "generated-project");
        assert_eq!(sanitize_repo_name("!!!"), "generated-project");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let name = sanitize_repo_name(&"a".repeat(150));
        assert_eq!(name.len(), 100);
        // A dash landing on the cut is trimmed.
        let name = sanitize_repo_name(&format!("{}-b", "a".repeat(99)));
        assert_eq!(name, "a".repeat(99));
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name("app", 0), "app");
        assert_eq!(candidate_name("app", 1), "app-1");
        assert_eq!(candidate_name("app", 12), "app-12");
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("fatal: auth failed for ghp_secret", "ghp_secret"),
            "fatal: auth failed for [REDACTED]"
        );
        assert_eq!(redact("unchanged", ""), "unchanged");
    }

    #[test]
    fn test_github_repo_into_repository_info() {
        let repo: GitHubRepo = serde_json::from_str(
            r#"{"full_name": "me/app", "name": "app", "private": true,
                "html_url": "https://github.com/me/app",
                "clone_url": "https://github.com/me/app.git",
                "description": null, "default_branch": "main"}"#,
        )
        .unwrap();
        let info: RepositoryInfo = repo.into();
        assert_eq!(info.name, "app");
        assert_eq!(info.url, "https://github.com/me/app");
        assert_eq!(info.full_name, "me/app");
    }

    #[test]
    fn test_create_request_visibility() {
        let body = CreateRepoRequest {
            name: "app",
            description: "d",
            private: RepoVisibility::Private.is_private(),
            auto_init: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["private"], true);
        assert_eq!(json["auto_init"], false);
    }

    #[tokio::test]
    async fn test_username_preset_skips_lookup() {
        let client = GithubClient::new(
            "token",
            "http://127.0.0.1:9",
            RepoVisibility::Private,
            Some("octocat".to_string()),
        );
        assert_eq!(client.username().await.unwrap(), "octocat");
    }

    #[tokio::test]
    async fn test_publish_fails_cleanly_without_remote() {
        // Push to a nonexistent local path fails after init/add/commit.
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi\n").unwrap();
        let repo = RepositoryInfo {
            name: "app".into(),
            url: "https://example.invalid/app".into(),
            clone_url: dir.path().join("no-such-remote").display().to_string(),
            full_name: "me/app".into(),
        };
        let publisher = GitPublisher::new("secret-token", "me");
        let err = publisher.publish(dir.path(), &repo).await;
        if let Err(e) = err {
            assert!(!e.to_string().contains("secret-token"));
        }
    }
}
