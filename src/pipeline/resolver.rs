//! Feature resolver: flattens epic → story → feature into one ordered list.
//!
//! Epics are ordered topologically (Kahn's algorithm, lexicographic
//! tie-break) when they declare dependencies. Without dependency
//! information, or when the declared dependencies form a cycle, the order
//! falls back to epic priority alone and is otherwise stable.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use super::models::{FeatureRecord, Prd};

/// Epic name → position in the dependency order.
pub type EpicRanks = HashMap<String, usize>;

/// One record per feature, in PRD order, with epic and story context copied
/// onto it.
pub fn flatten(prd: &Prd) -> Vec<FeatureRecord> {
    let mut records = Vec::with_capacity(prd.feature_count());
    for epic in &prd.epics {
        for story in &epic.user_stories {
            for feature in &story.features {
                records.push(FeatureRecord {
                    epic: epic.name.clone(),
                    epic_priority: epic.priority.clone(),
                    epic_depends_on: epic.depends_on.clone(),
                    story: story.title.clone(),
                    story_narrative: story.story.clone(),
                    name: feature.name.clone(),
                    description: feature.description.clone(),
                    complexity: feature.complexity.clone(),
                    acceptance_criteria: story.acceptance_criteria.clone(),
                    depends_on: feature.depends_on.clone(),
                });
            }
        }
    }
    records
}

/// Epic name → declared dependencies. Repeated epic names merge their lists.
pub fn epic_dependencies(prd: &Prd) -> BTreeMap<String, Vec<String>> {
    let mut deps: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for epic in &prd.epics {
        deps.entry(epic.name.clone())
            .or_default()
            .extend(epic.depends_on.iter().cloned());
    }
    deps
}

/// Kahn's algorithm over epics.
///
/// Returns `None` when there is nothing to order (no epics, or no epic
/// declares a dependency) or when the graph has a cycle. References to
/// unknown epics add no edge.
pub fn topological_epic_order(deps: &BTreeMap<String, Vec<String>>) -> Option<EpicRanks> {
    if deps.values().all(|d| d.is_empty()) {
        return None;
    }

    let mut in_degree: BTreeMap<&str, usize> = deps.keys().map(|k| (k.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (epic, epic_deps) in deps {
        let unique: BTreeSet<&str> = epic_deps.iter().map(String::as_str).collect();
        for dep in unique {
            if !deps.contains_key(dep) {
                debug!(epic = %epic, dependency = %dep, "Ignoring dependency on unknown epic");
                continue;
            }
            dependents.entry(dep).or_default().push(epic.as_str());
            if let Some(d) = in_degree.get_mut(epic.as_str()) {
                *d += 1;
            }
        }
    }

    // BTreeSet keeps the ready queue sorted by name.
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut sorted: Vec<&str> = Vec::with_capacity(deps.len());

    while let Some(epic) = ready.pop_first() {
        sorted.push(epic);
        for dependent in dependents.get(epic).map_or(&[][..], Vec::as_slice) {
            if let Some(d) = in_degree.get_mut(dependent) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if sorted.len() < deps.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(name, _)| *name)
            .collect();
        warn!(
            epics = ?stuck,
            "Circular dependency between epics; falling back to priority order"
        );
        return None;
    }

    Some(
        sorted
            .into_iter()
            .enumerate()
            .map(|(rank, name)| (name.to_string(), rank))
            .collect(),
    )
}

/// Order a flattened feature list. With epic ranks the key is
/// (epic rank, priority, complexity); without, priority only.
pub fn order_features(
    mut records: Vec<FeatureRecord>,
    ranks: Option<&EpicRanks>,
) -> Vec<FeatureRecord> {
    match ranks {
        Some(ranks) => records.sort_by_key(|r| {
            (
                ranks.get(&r.epic).copied().unwrap_or(usize::MAX),
                r.epic_priority.rank(),
                r.complexity.rank(),
            )
        }),
        None => records.sort_by_key(|r| r.epic_priority.rank()),
    }
    records
}

/// Flatten and order every feature in the PRD.
pub fn resolve_features(prd: &Prd) -> Vec<FeatureRecord> {
    let records = flatten(prd);
    if records.is_empty() {
        return records;
    }
    let ranks = topological_epic_order(&epic_dependencies(prd));
    order_features(records, ranks.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{Complexity, Epic, Feature, Priority, UserStory};

    fn epic_with_feature(name: &str, priority: Priority, deps: &[&str], feature: &str) -> Epic {
        Epic::new(name, priority).depends_on(deps).with_story(
            UserStory::new(&format!("{} story", name), "As a user...")
                .with_criteria(&["works"])
                .with_feature(Feature::new(feature, "", Complexity::M)),
        )
    }

    fn names(records: &[FeatureRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_flatten_inherits_epic_and_story_context() {
        let prd = Prd::new(vec![
            Epic::new("Auth", Priority::P0).depends_on(&["Setup"]).with_story(
                UserStory::new("Login", "As a user I want to log in")
                    .with_criteria(&["valid credentials accepted", "bad ones rejected"])
                    .with_feature(
                        Feature::new("Login form", "email + password", Complexity::S)
                            .depends_on(&["Session store"]),
                    ),
            ),
        ]);
        let records = flatten(&prd);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.epic, "Auth");
        assert_eq!(r.epic_priority, Priority::P0);
        assert_eq!(r.epic_depends_on, vec!["Setup"]);
        assert_eq!(r.story, "Login");
        assert_eq!(r.story_narrative, "As a user I want to log in");
        assert_eq!(r.acceptance_criteria.len(), 2);
        assert_eq!(r.complexity, Complexity::S);
        assert_eq!(r.depends_on, vec!["Session store"]);
    }

    #[test]
    fn test_topological_order_linear_chain() {
        let ranks = topological_epic_order(&deps(&[
            ("Tasks", &["Auth"]),
            ("Auth", &["Setup"]),
            ("Setup", &[]),
        ]))
        .unwrap();
        assert_eq!(ranks["Setup"], 0);
        assert_eq!(ranks["Auth"], 1);
        assert_eq!(ranks["Tasks"], 2);
    }

    #[test]
    fn test_topological_order_breaks_ties_lexicographically() {
        let ranks = topological_epic_order(&deps(&[
            ("Zeta", &[]),
            ("Alpha", &[]),
            ("Mid", &["Zeta"]),
        ]))
        .unwrap();
        assert_eq!(ranks["Alpha"], 0);
        assert_eq!(ranks["Zeta"], 1);
        assert_eq!(ranks["Mid"], 2);
    }

    #[test]
    fn test_topological_order_none_without_dependencies() {
        assert!(topological_epic_order(&BTreeMap::new()).is_none());
        assert!(topological_epic_order(&deps(&[("A", &[]), ("B", &[])])).is_none());
    }

    #[test]
    fn test_topological_order_none_on_cycle() {
        assert!(topological_epic_order(&deps(&[("A", &["B"]), ("B", &["A"])])).is_none());
        assert!(topological_epic_order(&deps(&[("A", &["A"])])).is_none());
    }

    #[test]
    fn test_unknown_dependencies_are_ignored() {
        let ranks =
            topological_epic_order(&deps(&[("B", &["Ghost"]), ("A", &["B"])])).unwrap();
        assert_eq!(ranks["B"], 0);
        assert_eq!(ranks["A"], 1);
    }

    #[test]
    fn test_resolve_dependency_chain_scenario() {
        let prd = Prd::new(vec![
            epic_with_feature("Setup", Priority::P0, &[], "Project skeleton"),
            epic_with_feature("Auth", Priority::P0, &["Setup"], "Login"),
            epic_with_feature("Tasks", Priority::P1, &["Auth"], "Create task"),
        ]);
        let resolved = resolve_features(&prd);
        assert_eq!(names(&resolved), vec!["Project skeleton", "Login", "Create task"]);
    }

    #[test]
    fn test_dependency_beats_priority() {
        // A P2 dependency still comes before the P0 epic that needs it.
        let prd = Prd::new(vec![
            epic_with_feature("Dashboard", Priority::P0, &["Data"], "Charts"),
            epic_with_feature("Data", Priority::P2, &[], "Importer"),
        ]);
        assert_eq!(names(&resolve_features(&prd)), vec!["Importer", "Charts"]);
    }

    #[test]
    fn test_cycle_falls_back_to_flatten_order() {
        let prd = Prd::new(vec![
            epic_with_feature("A", Priority::P1, &["B"], "FA"),
            epic_with_feature("B", Priority::P1, &["A"], "FB"),
        ]);
        assert_eq!(names(&resolve_features(&prd)), vec!["FA", "FB"]);
    }

    #[test]
    fn test_cycle_falls_back_to_priority_order() {
        let prd = Prd::new(vec![
            epic_with_feature("A", Priority::P3, &["B"], "FA"),
            epic_with_feature("B", Priority::P1, &["A"], "FB"),
            epic_with_feature("C", Priority::P0, &[], "FC"),
            epic_with_feature("D", Priority::P1, &[], "FD"),
        ]);
        assert_eq!(names(&resolve_features(&prd)), vec!["FC", "FB", "FD", "FA"]);
    }

    #[test]
    fn test_no_dependencies_sorts_by_priority_stably() {
        let prd = Prd::new(vec![
            Epic::new("Polish", Priority::P2).with_story(
                UserStory::new("s", "")
                    .with_feature(Feature::new("Dark mode", "", Complexity::L))
                    .with_feature(Feature::new("Animations", "", Complexity::S)),
            ),
            epic_with_feature("Core", Priority::P0, &[], "CRUD"),
            epic_with_feature("Odd", Priority::Other("urgent".into()), &[], "Mystery"),
        ]);
        // Complexity is not a key without dependency information.
        assert_eq!(
            names(&resolve_features(&prd)),
            vec!["CRUD", "Dark mode", "Animations", "Mystery"]
        );
    }

    #[test]
    fn test_complexity_breaks_ties_within_epic_when_ordered() {
        let prd = Prd::new(vec![
            Epic::new("Setup", Priority::P0),
            Epic::new("Core", Priority::P1).depends_on(&["Setup"]).with_story(
                UserStory::new("s", "")
                    .with_feature(Feature::new("Big", "", Complexity::L))
                    .with_feature(Feature::new("Odd", "", Complexity::Other("XL".into())))
                    .with_feature(Feature::new("Small", "", Complexity::S)),
            ),
        ]);
        assert_eq!(names(&resolve_features(&prd)), vec!["Small", "Odd", "Big"]);
    }

    #[test]
    fn test_epics_without_stories_resolve_to_empty() {
        let prd = Prd::new(vec![
            Epic::new("A", Priority::P0),
            Epic::new("B", Priority::P1).depends_on(&["A"]),
        ]);
        assert!(resolve_features(&prd).is_empty());
    }

    #[test]
    fn test_every_dependency_precedes_dependent() {
        let prd = Prd::new(vec![
            epic_with_feature("Reports", Priority::P2, &["Billing", "Users"], "R"),
            epic_with_feature("Billing", Priority::P1, &["Users"], "B"),
            epic_with_feature("Users", Priority::P0, &["Infra"], "U"),
            epic_with_feature("Infra", Priority::P3, &[], "I"),
            epic_with_feature("Docs", Priority::P0, &[], "D"),
        ]);
        let resolved = resolve_features(&prd);
        let pos = |name: &str| resolved.iter().position(|r| r.name == name).unwrap();
        assert!(pos("I") < pos("U"));
        assert!(pos("U") < pos("B"));
        assert!(pos("B") < pos("R"));
        assert!(pos("U") < pos("R"));
        assert_eq!(resolved.len(), 5);
    }
}
