//! Feature ordering for a PRD file: `ideaforge resolve`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use ideaforge::pipeline::models::{FeatureRecord, Prd};
use ideaforge::pipeline::resolve_features;

/// Accepts a bare PRD or a project's requirements.json, which nests it
/// under `prd`.
pub fn load_prd(path: &Path) -> Result<Prd> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    if let Some(prd) = value.get_mut("prd").filter(|p| p.get("epics").is_some()) {
        value = prd.take();
    }
    serde_json::from_value(value).with_context(|| format!("{} is not a PRD", path.display()))
}

fn print_features(features: &[FeatureRecord]) {
    let mut current_epic: Option<&str> = None;
    for (i, feature) in features.iter().enumerate() {
        if current_epic != Some(feature.epic.as_str()) {
            current_epic = Some(feature.epic.as_str());
            println!(
                "{} {}",
                style(&feature.epic).bold(),
                style(format!("[{}]", feature.epic_priority)).dim()
            );
        }
        println!(
            "  {:>3}. {} {}",
            i + 1,
            feature.name,
            style(format!("({})", feature.complexity)).dim()
        );
    }
}

pub fn cmd_resolve(path: &Path) -> Result<()> {
    let prd = load_prd(path)?;
    let features = resolve_features(&prd);
    if features.is_empty() {
        println!("No features found in {}", path.display());
        return Ok(());
    }
    print_features(&features);
    println!();
    println!(
        "{} features across {} epics",
        features.len(),
        prd.epics.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PRD: &str = r#"{
        "epics": [
            {"name": "Core", "priority": "P0", "depends_on": ["Setup"],
             "user_stories": [{"title": "Tasks", "features": [{"name": "Create task"}]}]},
            {"name": "Setup", "priority": "P0",
             "user_stories": [{"title": "Skeleton", "features": [{"name": "Scaffold"}]}]}
        ]
    }"#;

    #[test]
    fn test_load_bare_prd() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prd.json");
        std::fs::write(&path, PRD).unwrap();
        let prd = load_prd(&path).unwrap();
        assert_eq!(prd.epics.len(), 2);
        let order: Vec<_> = resolve_features(&prd).into_iter().map(|f| f.name).collect();
        assert_eq!(order, vec!["Scaffold", "Create task"]);
    }

    #[test]
    fn test_load_requirements_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("requirements.json");
        std::fs::write(
            &path,
            format!(r#"{{"enhanced_idea": {{"title": "X"}}, "prd": {}}}"#, PRD),
        )
        .unwrap();
        assert_eq!(load_prd(&path).unwrap().epics.len(), 2);
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_prd(&path).is_err());
    }
}
