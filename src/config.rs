//! Layered configuration for IdeaForge.
//!
//! Settings are read from `.ideaforge/ideaforge.toml`, then overridden by
//! environment variables (a `.env` file is honoured via `dotenvy`), then by
//! CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [storage]
//! projects_dir = "projects"
//! data_dir = ".ideaforge"
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [gemini]
//! model = "gemini-2.0-flash"
//!
//! [github]
//! visibility = "private"
//!
//! [implementation]
//! claude_cmd = "claude"
//! timeout_secs = 600
//! single_session_first = false
//!
//! [retry.repository]
//! max_attempts = 3
//! base_delay_secs = 5.0
//! max_delay_secs = 60.0
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! run_ttl_secs = 3600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::{PipelineSettings, RetryPolicy};

pub const CONFIG_DIR: &str = ".ideaforge";
pub const CONFIG_FILE: &str = "ideaforge.toml";

/// Upper bound for a single per-feature session unless configured otherwise.
const PER_FEATURE_TIMEOUT_CAP_SECS: u64 = 300;

// ── File sections ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Parent directory of generated projects
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    /// Run history database and log files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("projects")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR)
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Also write a daily-rotated log file under `<data_dir>/logs`
    #[serde(default = "default_true")]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSection {
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for GeminiSection {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            api_base: default_gemini_api_base(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoVisibility {
    Public,
    #[default]
    Private,
}

impl RepoVisibility {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

impl std::fmt::Display for RepoVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoVisibility::Public => write!(f, "public"),
            RepoVisibility::Private => write!(f, "private"),
        }
    }
}

impl std::str::FromStr for RepoVisibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(RepoVisibility::Public),
            "private" => Ok(RepoVisibility::Private),
            _ => anyhow::bail!("Invalid repository visibility '{}'. Valid values: public, private", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSection {
    #[serde(default)]
    pub visibility: RepoVisibility,
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
    /// Owner login; looked up from the token when absent
    #[serde(default)]
    pub username: Option<String>,
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            visibility: RepoVisibility::default(),
            api_base: default_github_api_base(),
            username: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationSection {
    /// Claude CLI command (default: "claude")
    #[serde(default)]
    pub claude_cmd: Option<String>,
    /// Budget for a whole-project session
    #[serde(default = "default_implementation_timeout_secs")]
    pub timeout_secs: u64,
    /// Budget per feature session; defaults to min(timeout / 2, 300)
    #[serde(default)]
    pub per_feature_timeout_secs: Option<u64>,
    /// Try one whole-project session before per-feature sessions
    #[serde(default)]
    pub single_session_first: bool,
}

fn default_implementation_timeout_secs() -> u64 {
    600
}

impl Default for ImplementationSection {
    fn default() -> Self {
        Self {
            claude_cmd: None,
            timeout_secs: default_implementation_timeout_secs(),
            per_feature_timeout_secs: None,
            single_session_first: false,
        }
    }
}

/// Backoff parameters for one retried step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
}

impl RetryConfig {
    fn llm() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2.0,
            max_delay_secs: 30.0,
        }
    }

    fn remote() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5.0,
            max_delay_secs: 60.0,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        let secs = |s: f64| Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO);
        RetryPolicy::new(
            self.max_attempts,
            secs(self.base_delay_secs),
            secs(self.max_delay_secs),
        )
    }

    fn warnings(&self, name: &str) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_attempts == 0 {
            warnings.push(format!("retry.{}.max_attempts is 0; treated as 1", name));
        }
        let invalid = |s: f64| s.is_nan() || s < 0.0;
        if invalid(self.base_delay_secs) || invalid(self.max_delay_secs) {
            warnings.push(format!("retry.{} delays must be non-negative numbers", name));
        } else if self.max_delay_secs < self.base_delay_secs {
            warnings.push(format!(
                "retry.{}.max_delay_secs ({}) is below base_delay_secs ({})",
                name, self.max_delay_secs, self.base_delay_secs
            ));
        }
        warnings
    }
}

fn default_llm_retry() -> RetryConfig {
    RetryConfig::llm()
}

fn default_remote_retry() -> RetryConfig {
    RetryConfig::remote()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_llm_retry")]
    pub enhance: RetryConfig,
    #[serde(default = "default_llm_retry")]
    pub prd: RetryConfig,
    #[serde(default = "default_remote_retry")]
    pub repository: RetryConfig,
    #[serde(default = "default_remote_retry")]
    pub publish: RetryConfig,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            enhance: RetryConfig::llm(),
            prd: RetryConfig::llm(),
            repository: RetryConfig::remote(),
            publish: RetryConfig::remote(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long finished runs stay queryable
    #[serde(default = "default_run_ttl_secs")]
    pub run_ttl_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_run_ttl_secs() -> u64 {
    3600
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            run_ttl_secs: default_run_ttl_secs(),
        }
    }
}

/// The complete ideaforge.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdeaForgeToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub gemini: GeminiSection,
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub implementation: ImplementationSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub server: ServerSection,
}

impl IdeaForgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ideaforge.toml")
    }

    /// Load `<config_dir>/ideaforge.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize ideaforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.logging.level.parse::<tracing::Level>().is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected trace, debug, info, warn or error",
                self.logging.level
            ));
        }
        if self.implementation.timeout_secs == 0 {
            warnings.push(
                "implementation.timeout_secs is 0; sessions would time out immediately".to_string(),
            );
        }
        if self.implementation.per_feature_timeout_secs == Some(0) {
            warnings.push("implementation.per_feature_timeout_secs is 0".to_string());
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be chosen".to_string());
        }
        for (name, cfg) in [
            ("enhance", &self.retry.enhance),
            ("prd", &self.retry.prd),
            ("repository", &self.retry.repository),
            ("publish", &self.retry.publish),
        ] {
            warnings.extend(cfg.warnings(name));
        }

        warnings
    }
}

// ── Resolved settings ─────────────────────────────────────────────────

/// CLI flags that override file and environment values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub projects_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub single_session_first: bool,
}

/// Effective settings after layering file → environment → CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding ideaforge.toml
    pub config_dir: PathBuf,
    pub toml: IdeaForgeToml,
    pub gemini_api_key: Option<String>,
    pub github_token: Option<String>,
    pub github_username: Option<String>,
    pub projects_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub claude_cmd: String,
    pub implementation_timeout: Duration,
    pub per_feature_timeout: Duration,
    pub repo_visibility: RepoVisibility,
    pub port: u16,
}

impl Settings {
    /// Load `.ideaforge/ideaforge.toml` under `base_dir` and apply the
    /// process environment (after reading `.env`).
    pub fn load(base_dir: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let config_dir = base_dir.join(CONFIG_DIR);
        let toml = IdeaForgeToml::load_or_default(&config_dir)?;
        Self::from_sources(config_dir, toml, |key| std::env::var(key).ok())
    }

    /// Resolve settings from a parsed file and an environment lookup.
    pub fn from_sources(
        config_dir: PathBuf,
        toml: IdeaForgeToml,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let repo_visibility = match env("DEFAULT_REPO_VISIBILITY") {
            Some(v) => v.parse().context("DEFAULT_REPO_VISIBILITY")?,
            None => toml.github.visibility,
        };
        let timeout_secs = match env("CODE_EXECUTION_TIMEOUT") {
            Some(v) => v
                .parse::<u64>()
                .with_context(|| format!("CODE_EXECUTION_TIMEOUT must be seconds, got '{}'", v))?,
            None => toml.implementation.timeout_secs,
        };
        let per_feature_secs = toml
            .implementation
            .per_feature_timeout_secs
            .unwrap_or_else(|| (timeout_secs / 2).min(PER_FEATURE_TIMEOUT_CAP_SECS));

        Ok(Self {
            gemini_api_key: env("GEMINI_API_KEY"),
            github_token: env("GITHUB_TOKEN"),
            github_username: env("GITHUB_USERNAME").or_else(|| toml.github.username.clone()),
            projects_dir: env("PROJECT_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| toml.storage.projects_dir.clone()),
            data_dir: toml.storage.data_dir.clone(),
            log_level: env("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|| toml.logging.level.clone()),
            claude_cmd: env("CLAUDE_CODE_PATH")
                .or_else(|| toml.implementation.claude_cmd.clone())
                .unwrap_or_else(|| "claude".to_string()),
            implementation_timeout: Duration::from_secs(timeout_secs),
            per_feature_timeout: Duration::from_secs(per_feature_secs),
            repo_visibility,
            port: toml.server.port,
            config_dir,
            toml,
        })
    }

    /// Apply CLI flags on top of file and environment values.
    pub fn with_cli(mut self, cli: &CliOverrides) -> Self {
        if let Some(dir) = &cli.projects_dir {
            self.projects_dir = dir.clone();
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if cli.single_session_first {
            self.toml.implementation.single_session_first = true;
        }
        self
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn history_db(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Retry policies and storage paths for the orchestrator.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            projects_dir: self.projects_dir.clone(),
            enhance_retry: self.toml.retry.enhance.policy(),
            prd_retry: self.toml.retry.prd.policy(),
            repository_retry: self.toml.retry.repository.policy(),
            publish_retry: self.toml.retry.publish.policy(),
            ..PipelineSettings::default()
        }
    }

    /// Secrets a live run needs that are not set.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.gemini_api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        if self.github_token.is_none() {
            missing.push("GITHUB_TOKEN");
        }
        missing
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
