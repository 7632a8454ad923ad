//! Deterministic stand-ins used when a model response cannot be parsed.

use serde_json::json;

use crate::pipeline::models::{
    Complexity, EnhancedIdea, Epic, Feature, Prd, Priority, ProductOverview, TechStack, UserStory,
};

const MAX_TITLE_CHARS: usize = 80;
const PROBLEM_EXCERPT_CHARS: usize = 200;

/// First sentence or line of the idea, capped at 80 characters.
pub fn derive_title(raw_idea: &str) -> String {
    let first = raw_idea
        .trim()
        .split(['.', '\n', '!', '?'])
        .next()
        .unwrap_or_default()
        .trim();
    let title: String = first.chars().take(MAX_TITLE_CHARS).collect();
    let title = title.trim().to_string();
    if title.chars().count() < 5 {
        "Application Project".to_string()
    } else {
        title
    }
}

pub fn enhanced_idea(raw_idea: &str, tech_preferences: Option<&str>) -> EnhancedIdea {
    let mut stack = TechStack::default()
        .with_layer("frontend", &["React", "TypeScript"])
        .with_layer("backend", &["Python", "FastAPI"])
        .with_layer("database", &["PostgreSQL"])
        .with_layer("infrastructure", &["Docker"]);
    if let Some(tech) = tech_preferences.map(str::trim).filter(|t| !t.is_empty()) {
        stack.notes = Some(format!("User preference: {tech}"));
    }

    let excerpt: String = raw_idea.trim().chars().take(PROBLEM_EXCERPT_CHARS).collect();
    EnhancedIdea {
        title: derive_title(raw_idea),
        description: raw_idea.trim().to_string(),
        target_users: "End users who need the described functionality".to_string(),
        problem_statement: format!("Users need: {excerpt}"),
        key_value_props: vec![
            "Solves the core need".to_string(),
            "Modern architecture".to_string(),
            "Production-ready".to_string(),
        ],
        suggested_tech_stack: stack,
    }
}

fn story(title: &str, narrative: &str, criteria: &[&str], features: Vec<Feature>) -> UserStory {
    features.into_iter().fold(
        UserStory::new(title, narrative).with_criteria(criteria),
        UserStory::with_feature,
    )
}

/// Four-epic skeleton PRD: foundation, core features, data layer, testing.
pub fn prd(idea: &EnhancedIdea) -> Prd {
    let mut foundation = Epic::new("Project Foundation", Priority::P0).with_story(story(
        "Project Setup",
        "As a developer, I want a well-structured project so that I can build features efficiently",
        &["Project runs locally", "Dependencies are documented"],
        vec![Feature::new(
            "Project scaffolding",
            "Directory layout, build configuration and tooling",
            Complexity::S,
        )],
    ));
    foundation.description = "Set up the project structure and core infrastructure".to_string();

    let mut core = Epic::new("Core Features", Priority::P0)
        .depends_on(&["Project Foundation"])
        .with_story(story(
            "Core Logic",
            "As a user, I want the main functionality so that my need is solved",
            &["Primary workflow works end to end"],
            vec![
                Feature::new("Business logic", "Core domain behaviour", Complexity::L),
                Feature::new("User interface", "Screens for the primary workflow", Complexity::M),
            ],
        ));
    core.description = format!("Implement the primary functionality of {}", idea.title);

    let mut data = Epic::new("Data Layer", Priority::P0)
        .depends_on(&["Project Foundation"])
        .with_story(story(
            "Data Persistence",
            "As a user, I want my data saved so that it is there when I come back",
            &["Data survives restarts"],
            vec![
                Feature::new("Database schema", "Tables and migrations", Complexity::M),
                Feature::new("Data access", "Repository layer over the schema", Complexity::M),
            ],
        ));
    data.description = "Storage and data access".to_string();

    let mut testing = Epic::new("Testing", Priority::P1)
        .depends_on(&["Core Features", "Data Layer"])
        .with_story(story(
            "Automated Tests",
            "As a developer, I want automated tests so that regressions are caught early",
            &["Tests run in CI"],
            vec![Feature::new("Unit tests", "Coverage for core logic", Complexity::M)],
        ));
    testing.description = "Quality assurance".to_string();

    let mut prd = Prd::new(vec![foundation, core, data, testing]);
    prd.product_overview = ProductOverview {
        vision: if idea.description.is_empty() {
            idea.title.clone()
        } else {
            idea.description.clone()
        },
        goals: idea.key_value_props.clone(),
        success_metrics: vec!["Core workflow completes without errors".to_string()],
    };
    prd.extra.insert(
        "technical_architecture".to_string(),
        json!({
            "overview": format!("Architecture for {}", idea.title),
            "components": ["Frontend", "Backend API", "Database"],
        }),
    );
    prd.extra.insert(
        "non_functional_requirements".to_string(),
        json!({
            "performance": ["Responsive UI"],
            "security": ["Authenticated access to user data"],
            "scalability": ["Stateless backend"],
        }),
    );
    prd.extra.insert(
        "implementation_roadmap".to_string(),
        json!({
            "mvp_scope": "Project Foundation, Core Features and Data Layer",
            "phases": [
                {"name": "Phase 1", "epics": ["Project Foundation", "Core Features", "Data Layer"],
                 "description": "MVP"},
                {"name": "Phase 2", "epics": ["Testing"], "description": "Hardening"}
            ],
        }),
    );
    prd
}
