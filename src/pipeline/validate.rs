//! Input gates checked before any costly external call.
//!
//! All three validators are pure apart from a logged warning and return
//! `InputValidationError` so callers can tell bad input from system failure.

use tracing::warn;

use super::models::{EnhancedIdea, Prd};
use crate::errors::InputValidationError;

pub const MIN_IDEA_CHARS: usize = 20;
pub const MAX_IDEA_CHARS: usize = 5000;
pub const MIN_TITLE_CHARS: usize = 2;
pub const MAX_TITLE_CHARS: usize = 200;

/// Validate a raw application idea and return it trimmed.
pub fn validate_app_idea(text: Option<&str>) -> Result<String, InputValidationError> {
    let trimmed = text.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(InputValidationError::new(
            "Application idea cannot be empty",
        ));
    }

    let len = trimmed.chars().count();
    if len < MIN_IDEA_CHARS {
        return Err(InputValidationError::new(format!(
            "Application idea is too short ({} characters, minimum {})",
            len, MIN_IDEA_CHARS
        )));
    }
    if len > MAX_IDEA_CHARS {
        return Err(InputValidationError::new(format!(
            "Application idea is too long ({} characters, maximum {})",
            len, MAX_IDEA_CHARS
        )));
    }

    Ok(trimmed.to_string())
}

/// Structural check on an enhanced idea: title and description present,
/// title length within bounds.
pub fn validate_enhanced_idea(idea: &EnhancedIdea) -> Result<(), InputValidationError> {
    let title = idea.title.trim();
    if title.is_empty() {
        return Err(InputValidationError::new(
            "Enhanced idea is missing a title",
        ));
    }
    if idea.description.trim().is_empty() {
        return Err(InputValidationError::new(
            "Enhanced idea is missing a description",
        ));
    }

    let len = title.chars().count();
    if !(MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&len) {
        return Err(InputValidationError::new(format!(
            "Enhanced idea title must be between {} and {} characters (got {})",
            MIN_TITLE_CHARS, MAX_TITLE_CHARS, len
        )));
    }

    Ok(())
}

/// Structural check on a PRD: at least one epic, every epic named.
///
/// An epic without user stories only logs a warning; it contributes no
/// features but does not corrupt the pipeline.
pub fn validate_prd(prd: &Prd) -> Result<(), InputValidationError> {
    if prd.epics.is_empty() {
        return Err(InputValidationError::new("PRD has no epics"));
    }

    for (i, epic) in prd.epics.iter().enumerate() {
        if epic.name.trim().is_empty() {
            return Err(InputValidationError::new(format!(
                "Epic at index {} is missing a name",
                i
            )));
        }
        if epic.user_stories.is_empty() {
            warn!(epic = %epic.name, "Epic has no user stories; it contributes no features");
        }
    }

    Ok(())
}
