use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Enhanced idea ─────────────────────────────────────────────────────

/// Layer name → technologies, plus optional free-text notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechStack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub layers: BTreeMap<String, Vec<String>>,
}

impl TechStack {
    pub fn with_layer(mut self, layer: &str, techs: &[&str]) -> Self {
        self.layers.insert(
            layer.to_string(),
            techs.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.notes.is_none()
    }
}

/// Structured product concept derived from a raw idea.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedIdea {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_users: String,
    #[serde(default)]
    pub problem_statement: String,
    #[serde(default)]
    pub key_value_props: Vec<String>,
    #[serde(default)]
    pub suggested_tech_stack: TechStack,
}

impl EnhancedIdea {
    pub fn new(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }
}

// ── PRD ───────────────────────────────────────────────────────────────

/// Epic priority. Values outside P0–P3 are kept verbatim and rank last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    P0,
    #[default]
    P1,
    P2,
    P3,
    Other(String),
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::Other(s) => s,
        }
    }

    /// Sort rank: P0=0 … P3=3, anything else 9.
    pub fn rank(&self) -> u8 {
        match self {
            Self::P0 => 0,
            Self::P1 => 1,
            Self::P2 => 2,
            Self::P3 => 3,
            Self::Other(_) => 9,
        }
    }
}

impl From<String> for Priority {
    fn from(s: String) -> Self {
        match s.trim().to_uppercase().as_str() {
            "P0" => Self::P0,
            "P1" => Self::P1,
            "P2" => Self::P2,
            "P3" => Self::P3,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for Priority {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Priority> for String {
    fn from(p: Priority) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// T-shirt size estimate for a feature. Unknown values rank as M.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Complexity {
    S,
    #[default]
    M,
    L,
    Other(String),
}

impl Complexity {
    pub fn as_str(&self) -> &str {
        match self {
            Self::S => "S",
            Self::M => "M",
            Self::L => "L",
            Self::Other(s) => s,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::S => 0,
            Self::M | Self::Other(_) => 1,
            Self::L => 2,
        }
    }
}

impl From<String> for Complexity {
    fn from(s: String) -> Self {
        match s.trim().to_uppercase().as_str() {
            "S" => Self::S,
            "M" => Self::M,
            "L" => Self::L,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for Complexity {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Complexity> for String {
    fn from(c: Complexity) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Feature {
    pub fn new(name: &str, description: &str, complexity: Complexity) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            complexity,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStory {
    pub title: String,
    /// "As a …, I want … so that …"
    #[serde(default, alias = "narrative")]
    pub story: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl UserStory {
    pub fn new(title: &str, story: &str) -> Self {
        Self {
            title: title.to_string(),
            story: story.to_string(),
            ..Default::default()
        }
    }

    pub fn with_criteria(mut self, criteria: &[&str]) -> Self {
        self.acceptance_criteria = criteria.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub user_stories: Vec<UserStory>,
}

impl Epic {
    pub fn new(name: &str, priority: Priority) -> Self {
        Self {
            name: name.to_string(),
            priority,
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_story(mut self, story: UserStory) -> Self {
        self.user_stories.push(story);
        self
    }

    pub fn feature_count(&self) -> usize {
        self.user_stories.iter().map(|s| s.features.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductOverview {
    #[serde(default)]
    pub vision: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub success_metrics: Vec<String>,
}

/// Hierarchical product requirements: overview + ordered epics.
///
/// Sections the pipeline does not interpret (architecture, roadmap, NFRs)
/// ride along in `extra` so they survive a round trip to requirements.json.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prd {
    #[serde(default)]
    pub product_overview: ProductOverview,
    #[serde(default)]
    pub epics: Vec<Epic>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Prd {
    pub fn new(epics: Vec<Epic>) -> Self {
        Self {
            epics,
            ..Default::default()
        }
    }

    pub fn feature_count(&self) -> usize {
        self.epics.iter().map(Epic::feature_count).sum()
    }

    pub fn architecture_overview(&self) -> Option<&str> {
        self.extra
            .get("technical_architecture")
            .and_then(|a| a.get("overview"))
            .and_then(|o| o.as_str())
            .filter(|o| !o.is_empty())
    }
}

/// Output of the PRD generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPrd {
    pub prd: Prd,
    /// Rendered Markdown document written to docs/PRD.md.
    pub document: String,
}

// ── Resolved features ────────────────────────────────────────────────

/// One feature flattened out of the PRD, carrying its epic and story context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub epic: String,
    pub epic_priority: Priority,
    pub epic_depends_on: Vec<String>,
    pub story: String,
    pub story_narrative: String,
    pub name: String,
    pub description: String,
    pub complexity: Complexity,
    pub acceptance_criteria: Vec<String>,
    pub depends_on: Vec<String>,
}

// ── Repository / implementation ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub url: String,
    pub clone_url: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationMode {
    /// A coding agent actually ran.
    Real,
    /// No agent available; a scaffold and plan were written instead.
    Simulated,
}

impl ImplementationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationReport {
    pub status: ImplementationStatus,
    pub mode: ImplementationMode,
    pub features_completed: Vec<String>,
    pub features_failed: Vec<FeatureFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// Structured progress payload reported by the implementation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImplementationProgress {
    pub total_features: usize,
    /// Zero-based position in the resolved feature order.
    pub current_feature_index: usize,
    pub current_feature_name: String,
    pub features_completed: Vec<String>,
    pub features_failed: Vec<FeatureFailure>,
}

// ── History ───────────────────────────────────────────────────────────

/// Terminal record of a run, appended once to the history sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub project_title: Option<String>,
    pub idea_excerpt: String,
    pub epics_count: usize,
    pub features_count: usize,
    pub features_completed: usize,
    pub implementation_mode: Option<ImplementationMode>,
    pub repo_url: Option<String>,
    pub elapsed_secs: f64,
    pub failed_step: Option<String>,
    pub error: Option<String>,
}
