//! LLM-backed idea enhancement and PRD generation.
//!
//! [`LlmIdeaService`] implements both `IdeaEnhancer` and `PrdGenerator` on
//! top of any [`LlmClient`]. Transport failures propagate so the pipeline
//! can retry them; a response that arrives but cannot be parsed falls back
//! to a structured default instead.

pub mod fallback;
pub mod gemini;
pub mod prompts;
pub mod render;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::pipeline::models::{EnhancedIdea, GeneratedPrd, Prd};
use crate::pipeline::{IdeaEnhancer, PrdGenerator};

pub use gemini::GeminiClient;

/// A text-in, text-out completion endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Extract the JSON object from a response that may wrap it in a markdown
/// fence or surrounding prose.
pub fn extract_json(response: &str) -> Option<&str> {
    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    // Fenced block, with or without a language tag
    if let Some(start) = response.find("```") {
        let after_marker = &response[start + 3..];
        if let Some(end) = after_marker.find("```") {
            let block = &after_marker[..end];
            if let Some(json_start) = block.find('{')
                && let Some(json_end) = block.rfind('}')
                && json_end > json_start
            {
                return Some(block[json_start..=json_end].trim());
            }
        }
    }

    // First '{' to last '}'
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

/// Parse the JSON object embedded in an LLM response, if there is one.
pub fn parse_json_response(response: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(response.trim())
        && value.is_object()
    {
        return Some(value);
    }
    let candidate = extract_json(response)?;
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

pub struct LlmIdeaService {
    client: Arc<dyn LlmClient>,
}

impl LlmIdeaService {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn parse_idea(text: &str) -> Option<EnhancedIdea> {
        let value = parse_json_response(text)?;
        value.get("title")?;
        serde_json::from_value(value)
            .map_err(|e| debug!("Enhanced idea JSON did not match schema: {}", e))
            .ok()
    }

    fn parse_prd(text: &str) -> Option<Prd> {
        let value = parse_json_response(text)?;
        value.get("epics")?;
        serde_json::from_value(value)
            .map_err(|e| debug!("PRD JSON did not match schema: {}", e))
            .ok()
    }
}

#[async_trait]
impl IdeaEnhancer for LlmIdeaService {
    async fn enhance(&self, raw_idea: &str, tech_preferences: Option<&str>) -> Result<EnhancedIdea> {
        let prompt = prompts::enhance_idea(raw_idea, tech_preferences);
        let text = self.client.generate(&prompt).await?;
        match Self::parse_idea(&text) {
            Some(idea) => Ok(idea),
            None => {
                warn!("Could not parse enhanced idea from model response; using fallback");
                Ok(fallback::enhanced_idea(raw_idea, tech_preferences))
            }
        }
    }
}

#[async_trait]
impl PrdGenerator for LlmIdeaService {
    async fn generate(&self, idea: &EnhancedIdea) -> Result<GeneratedPrd> {
        let prompt = prompts::prd(idea);
        let text = self.client.generate(&prompt).await?;
        let prd = match Self::parse_prd(&text) {
            Some(prd) => prd,
            None => {
                warn!("Could not parse PRD from model response; using fallback");
                fallback::prd(idea)
            }
        };
        let document = render::prd_markdown(&prd, idea);
        Ok(GeneratedPrd { prd, document })
    }
}
