//! CLI integration tests for ideaforge
//!
//! Everything here runs offline: no credentials, no network.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an ideaforge Command rooted in `dir`
fn ideaforge(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("ideaforge");
    cmd.current_dir(dir.path())
        .env_remove("GEMINI_API_KEY")
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG")
        .env_remove("LOG_LEVEL");
    cmd
}

const PRD_JSON: &str = r#"{
    "product_overview": {"vision": "Simple task tracking"},
    "epics": [
        {
            "name": "Testing",
            "priority": "P1",
            "depends_on": ["Core"],
            "user_stories": [{"title": "Quality", "features": [{"name": "Unit tests", "complexity": "M"}]}]
        },
        {
            "name": "Core",
            "priority": "P0",
            "depends_on": ["Foundation"],
            "user_stories": [{"title": "Tasks", "features": [
                {"name": "Task list", "complexity": "L"},
                {"name": "Add task", "complexity": "S"}
            ]}]
        },
        {
            "name": "Foundation",
            "priority": "P0",
            "user_stories": [{"title": "Setup", "features": [{"name": "Project scaffolding", "complexity": "S"}]}]
        }
    ]
}"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("history"))
            .stdout(predicate::str::contains("resolve"))
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir).arg("bogus").assert().failure();
    }
}

// =============================================================================
// Run
// =============================================================================

mod run_command {
    use super::*;

    #[test]
    fn test_short_idea_is_rejected_before_credentials() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .args(["run", "--idea", "todo app"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid idea"))
            .stderr(predicate::str::contains("too short"));
    }

    #[test]
    fn test_run_requires_an_idea() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--idea"));
    }

    #[test]
    fn test_valid_idea_without_credentials_names_them() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .args(["run", "--idea", "Build a todo app with tags and due dates"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("GEMINI_API_KEY"))
            .stderr(predicate::str::contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_idea_file_is_read() {
        let dir = TempDir::new().unwrap();
        let idea = dir.path().join("idea.txt");
        fs::write(&idea, "short").unwrap();
        ideaforge(&dir)
            .args(["run", "--idea-file"])
            .arg(&idea)
            .assert()
            .failure()
            .stderr(predicate::str::contains("too short"));
    }
}

// =============================================================================
// Resolve
// =============================================================================

mod resolve_command {
    use super::*;

    #[test]
    fn test_resolve_prints_dependency_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prd.json");
        fs::write(&path, PRD_JSON).unwrap();

        let output = ideaforge(&dir)
            .arg("resolve")
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("4 features across 3 epics"))
            .get_output()
            .stdout
            .clone();
        let stdout = String::from_utf8(output).unwrap();

        let pos = |name: &str| stdout.find(name).unwrap();
        assert!(pos("Project scaffolding") < pos("Add task"));
        assert!(pos("Add task") < pos("Task list"));
        assert!(pos("Task list") < pos("Unit tests"));
    }

    #[test]
    fn test_resolve_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .args(["resolve", "nope.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read"));
    }
}

// =============================================================================
// Config / History
// =============================================================================

mod config_command {
    use super::*;

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created ideaforge.toml"));
        assert!(dir.path().join(".ideaforge/ideaforge.toml").is_file());

        ideaforge(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        ideaforge(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"))
            .stdout(predicate::str::contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".ideaforge")).unwrap();
        fs::write(
            dir.path().join(".ideaforge/ideaforge.toml"),
            "[implementation]\ntimeout_secs = 0\n",
        )
        .unwrap();
        ideaforge(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeout_secs is 0"));
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("No ideaforge.toml found"))
            .stdout(predicate::str::contains("port = 8000"));
    }

    #[test]
    fn test_history_empty() {
        let dir = TempDir::new().unwrap();
        ideaforge(&dir)
            .arg("history")
            .assert()
            .success()
            .stdout(predicate::str::contains("No runs recorded yet"));
    }
}
