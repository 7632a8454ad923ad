//! Prompts handed to the coding agent.

use std::fmt::Write as _;
use std::path::Path;

use crate::pipeline::models::FeatureRecord;

/// Feature list grouped under epic headings, numbered in resolved order.
fn feature_outline(features: &[FeatureRecord]) -> String {
    let mut out = String::new();
    let mut current_epic: Option<&str> = None;
    for (i, feature) in features.iter().enumerate() {
        if current_epic != Some(feature.epic.as_str()) {
            current_epic = Some(feature.epic.as_str());
            let _ = writeln!(out, "\n### Epic: {} [{}]", feature.epic, feature.epic_priority);
            if !feature.epic_depends_on.is_empty() {
                let _ = writeln!(out, "_Depends on: {}_", feature.epic_depends_on.join(", "));
            }
        }
        let _ = write!(
            out,
            "{}. **{}** ({})",
            i + 1,
            feature.name,
            feature.complexity
        );
        if !feature.description.is_empty() {
            let _ = write!(out, ": {}", feature.description);
        }
        out.push('\n');
        for ac in &feature.acceptance_criteria {
            let _ = writeln!(out, "   - AC: {ac}");
        }
        if !feature.depends_on.is_empty() {
            let _ = writeln!(out, "   - _Depends on: {}_", feature.depends_on.join(", "));
        }
    }
    out
}

/// Whole-project instructions for a single session.
pub fn project_instructions(prd_document: &Path, features: &[FeatureRecord]) -> String {
    let prd_name = prd_document
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "PRD.md".to_string());

    format!(
        r#"# Implementation Instructions

You are an expert software engineer implementing a project from a Product Requirements Document.

## Your Task

1. Read the PRD: `{prd_name}` in the `docs/` directory
2. Review the epic documents in `docs/epics/` for user stories and acceptance criteria
3. Write an implementation plan to PLAN.md
4. Implement every feature below in the order listed
5. Write tests for each feature as you implement it
6. Update README.md with setup and usage instructions

## Features to Implement (dependency order, then priority)
{outline}
## Guidelines

- Follow the tech stack in the PRD
- Dependencies are already resolved; keep the listed order
- Each feature should be a working increment on the previous ones
- Satisfy every acceptance criterion
- Verify each feature before moving to the next

Begin by reading the PRD and epic documents, then write the plan."#,
        prd_name = prd_name,
        outline = feature_outline(features),
    )
}

/// Focused prompt for one feature session.
pub fn feature_prompt(feature: &FeatureRecord, index: usize, total: usize) -> String {
    let mut prompt = format!(
        "Implement feature {index}/{total}:\n\n\
         **Epic:** {} [{}]\n\
         **Story:** {}\n\
         **Feature:** {}\n\
         **Complexity:** {}\n\
         **Description:** {}\n",
        feature.epic,
        feature.epic_priority,
        feature.story,
        feature.name,
        feature.complexity,
        feature.description,
    );
    if !feature.story_narrative.is_empty() {
        let _ = writeln!(prompt, "\n> {}", feature.story_narrative);
    }
    if !feature.acceptance_criteria.is_empty() {
        prompt.push_str("\n**Acceptance Criteria:**\n");
        for ac in &feature.acceptance_criteria {
            let _ = writeln!(prompt, "  - {ac}");
        }
    }
    if !feature.depends_on.is_empty() {
        let _ = writeln!(
            prompt,
            "\n**Dependencies (already implemented):** {}",
            feature.depends_on.join(", ")
        );
    }
    prompt.push_str(
        "\nInstructions:\n\
         - Read the existing code to understand the current project state\n\
         - Implement this feature following the PRD in docs/PRD.md\n\
         - Write tests for this feature\n\
         - Keep existing tests passing\n",
    );
    prompt
}
