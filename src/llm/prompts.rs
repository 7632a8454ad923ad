use crate::pipeline::models::EnhancedIdea;

pub fn enhance_idea(raw_idea: &str, tech_preferences: Option<&str>) -> String {
    let tech_section = match tech_preferences {
        Some(tech) if !tech.trim().is_empty() => format!(
            "\nThe user prefers these technologies: {}\nIncorporate them where appropriate.\n",
            tech.trim()
        ),
        _ => String::new(),
    };

    format!(
        r#"You are a senior product strategist. Enhance this rough application idea into a clear product concept.

**User's idea:**
{idea}
{tech_section}
**Return ONLY valid JSON** with this structure:
{{
  "title": "Concise project name",
  "description": "2-3 paragraph detailed description",
  "target_users": "Primary user personas",
  "problem_statement": "The specific problem this solves",
  "key_value_props": ["Prop 1", "Prop 2", "Prop 3"],
  "suggested_tech_stack": {{
    "frontend": ["tech1"],
    "backend": ["tech1"],
    "database": ["tech1"],
    "infrastructure": ["tech1"]
  }}
}}

Be specific and practical."#,
        idea = raw_idea,
        tech_section = tech_section,
    )
}

pub fn prd(idea: &EnhancedIdea) -> String {
    let tech_stack =
        serde_json::to_string(&idea.suggested_tech_stack).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"You are a senior product manager creating a comprehensive PRD.

**Application:**
Title: {title}
Description: {description}
Target Users: {target_users}
Problem: {problem}
Tech Stack: {tech_stack}

**Return ONLY valid JSON** with this structure:
{{
  "product_overview": {{
    "vision": "Vision statement",
    "goals": ["Goal 1", "Goal 2"],
    "success_metrics": ["Metric 1"]
  }},
  "epics": [
    {{
      "name": "Epic Name",
      "description": "Epic description",
      "priority": "P0",
      "depends_on": ["Name of an epic that must be built first"],
      "user_stories": [
        {{
          "title": "Story Title",
          "story": "As a [user], I want [feature] so that [benefit]",
          "acceptance_criteria": ["Criterion 1"],
          "features": [
            {{"name": "Feature", "description": "What to build", "complexity": "S"}}
          ]
        }}
      ]
    }}
  ],
  "technical_architecture": {{
    "overview": "Architecture description",
    "components": ["Component 1"],
    "data_model": [{{"entity": "Name", "fields": ["field: type"], "relationships": "desc"}}],
    "api_endpoints": [{{"method": "GET", "path": "/api/x", "description": "desc"}}]
  }},
  "non_functional_requirements": {{
    "performance": ["Req 1"],
    "security": ["Req 1"],
    "scalability": ["Req 1"]
  }},
  "implementation_roadmap": {{
    "mvp_scope": "MVP description",
    "phases": [{{"name": "Phase 1", "epics": ["Epic"], "description": "desc"}}]
  }}
}}

Create 4-6 epics with 3-5 user stories each. Priorities are P0-P3 and complexity is S, M or L.
Be specific and technical."#,
        title = idea.title,
        description = idea.description,
        target_users = idea.target_users,
        problem = idea.problem_statement,
        tech_stack = tech_stack,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::TechStack;

    #[test]
    fn test_enhance_prompt_includes_idea_and_tech() {
        let prompt = enhance_idea("A recipe planner", Some("Svelte, Axum"));
        assert!(prompt.contains("A recipe planner"));
        assert!(prompt.contains("Svelte, Axum"));
        assert!(prompt.contains("\"title\""));
    }

    #[test]
    fn test_enhance_prompt_omits_blank_tech() {
        let prompt = enhance_idea("A recipe planner", Some("   "));
        assert!(!prompt.contains("prefers these technologies"));
    }

    #[test]
    fn test_prd_prompt_embeds_idea_fields() {
        let mut idea = EnhancedIdea::new("Planner", "Plans meals");
        idea.suggested_tech_stack = TechStack::default().with_layer("backend", &["Axum"]);
        let prompt = prd(&idea);
        assert!(prompt.contains("Title: Planner"));
        assert!(prompt.contains("Plans meals"));
        assert!(prompt.contains("\"backend\":[\"Axum\"]"));
        assert!(prompt.contains("depends_on"));
    }
}
