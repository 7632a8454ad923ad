//! Markdown rendering of a PRD.

use std::fmt::Write;

use crate::pipeline::models::{EnhancedIdea, Prd};

pub fn prd_markdown(prd: &Prd, idea: &EnhancedIdea) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Product Requirements Document: {}\n", idea.title);

    let overview = &prd.product_overview;
    md.push_str("## Product Overview\n\n");
    if !overview.vision.is_empty() {
        let _ = writeln!(md, "**Vision:** {}\n", overview.vision);
    }
    if !idea.description.is_empty() {
        let _ = writeln!(md, "**Description:** {}\n", idea.description);
    }
    if !idea.target_users.is_empty() {
        let _ = writeln!(md, "**Target Users:** {}\n", idea.target_users);
    }
    if !overview.goals.is_empty() {
        md.push_str("### Goals\n\n");
        for goal in &overview.goals {
            let _ = writeln!(md, "- {goal}");
        }
        md.push('\n');
    }
    if !overview.success_metrics.is_empty() {
        md.push_str("### Success Metrics\n\n");
        for metric in &overview.success_metrics {
            let _ = writeln!(md, "- {metric}");
        }
        md.push('\n');
    }

    md.push_str("## Epics & User Stories\n\n");
    for (i, epic) in prd.epics.iter().enumerate() {
        let _ = writeln!(md, "### Epic {}: {} [{}]\n", i + 1, epic.name, epic.priority);
        if !epic.description.is_empty() {
            let _ = writeln!(md, "_{}_\n", epic.description);
        }
        if !epic.depends_on.is_empty() {
            let _ = writeln!(md, "**Depends on:** {}\n", epic.depends_on.join(", "));
        }
        for (j, story) in epic.user_stories.iter().enumerate() {
            let _ = writeln!(md, "#### Story {}.{}: {}\n", i + 1, j + 1, story.title);
            if !story.story.is_empty() {
                let _ = writeln!(md, "> {}\n", story.story);
            }
            if !story.acceptance_criteria.is_empty() {
                md.push_str("**Acceptance Criteria:**\n");
                for ac in &story.acceptance_criteria {
                    let _ = writeln!(md, "- [ ] {ac}");
                }
                md.push('\n');
            }
            if !story.features.is_empty() {
                md.push_str("**Features:**\n");
                for feature in &story.features {
                    let _ = write!(md, "- `[{}]` **{}**", feature.complexity, feature.name);
                    if !feature.description.is_empty() {
                        let _ = write!(md, " - {}", feature.description);
                    }
                    md.push('\n');
                }
                md.push('\n');
            }
        }
    }

    if let Some(overview) = prd.architecture_overview() {
        let _ = writeln!(md, "## Technical Architecture\n\n{overview}\n");
    }

    md.push_str("---\n*Generated by ideaforge*\n");
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{Complexity, Epic, Feature, Priority, UserStory};
    use serde_json::json;

    fn sample() -> (Prd, EnhancedIdea) {
        let mut prd = Prd::new(vec![
            Epic::new("Auth", Priority::P0).with_story(
                UserStory::new("Login", "As a user, I want to log in")
                    .with_criteria(&["Valid credentials succeed"])
                    .with_feature(Feature::new("Login form", "Email + password", Complexity::S)),
            ),
            Epic::new("Tasks", Priority::P1).depends_on(&["Auth"]),
        ]);
        prd.product_overview.vision = "Todo for everyone".to_string();
        prd.product_overview.goals = vec!["Be fast".to_string()];
        prd.extra.insert(
            "technical_architecture".to_string(),
            json!({"overview": "Axum + SQLite"}),
        );
        (prd, EnhancedIdea::new("TodoApp", "Tracks todos"))
    }

    #[test]
    fn test_renders_headings_and_stories() {
        let (prd, idea) = sample();
        let md = prd_markdown(&prd, &idea);
        assert!(md.starts_with("# Product Requirements Document: TodoApp\n"));
        assert!(md.contains("**Vision:** Todo for everyone"));
        assert!(md.contains("### Goals\n\n- Be fast"));
        assert!(md.contains("### Epic 1: Auth [P0]"));
        assert!(md.contains("#### Story 1.1: Login"));
        assert!(md.contains("> As a user, I want to log in"));
        assert!(md.contains("- [ ] Valid credentials succeed"));
        assert!(md.contains("- `[S]` **Login form** - Email + password"));
        assert!(md.contains("### Epic 2: Tasks [P1]"));
        assert!(md.contains("**Depends on:** Auth"));
        assert!(md.contains("## Technical Architecture\n\nAxum + SQLite"));
        assert!(md.trim_end().ends_with("*Generated by ideaforge*"));
    }

    #[test]
    fn test_omits_empty_sections() {
        let md = prd_markdown(&Prd::default(), &EnhancedIdea::new("Bare", ""));
        assert!(!md.contains("### Goals"));
        assert!(!md.contains("**Description:**"));
        assert!(!md.contains("## Technical Architecture"));
    }
}
