//! Configuration view and validation commands: `ideaforge config`.

use anyhow::Result;

use super::super::ConfigCommands;
use ideaforge::config::{CONFIG_DIR, CONFIG_FILE, IdeaForgeToml, Settings};

fn print_toml(toml: &IdeaForgeToml) {
    println!("[storage]");
    println!("  projects_dir = \"{}\"", toml.storage.projects_dir.display());
    println!("  data_dir = \"{}\"", toml.storage.data_dir.display());
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    println!("  file = {}", toml.logging.file);
    println!();
    println!("[gemini]");
    println!("  model = \"{}\"", toml.gemini.model);
    println!("  api_base = \"{}\"", toml.gemini.api_base);
    println!();
    println!("[github]");
    println!("  visibility = \"{}\"", toml.github.visibility);
    println!("  api_base = \"{}\"", toml.github.api_base);
    if let Some(username) = &toml.github.username {
        println!("  username = \"{}\"", username);
    }
    println!();
    println!("[implementation]");
    if let Some(cmd) = &toml.implementation.claude_cmd {
        println!("  claude_cmd = \"{}\"", cmd);
    }
    println!("  timeout_secs = {}", toml.implementation.timeout_secs);
    if let Some(secs) = toml.implementation.per_feature_timeout_secs {
        println!("  per_feature_timeout_secs = {}", secs);
    }
    println!(
        "  single_session_first = {}",
        toml.implementation.single_session_first
    );
    println!();
    for (name, retry) in [
        ("enhance", &toml.retry.enhance),
        ("prd", &toml.retry.prd),
        ("repository", &toml.retry.repository),
        ("publish", &toml.retry.publish),
    ] {
        println!(
            "[retry.{}] max_attempts = {}, base_delay_secs = {}, max_delay_secs = {}",
            name, retry.max_attempts, retry.base_delay_secs, retry.max_delay_secs
        );
    }
    println!();
    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!("  run_ttl_secs = {}", toml.server.run_ttl_secs);
    println!();
}

fn print_effective(settings: &Settings) {
    let set = |v: &Option<String>| if v.is_some() { "set" } else { "not set" };
    println!("Effective values (with env/CLI overrides):");
    println!("  projects_dir = \"{}\"", settings.projects_dir.display());
    println!("  log_level = \"{}\"", settings.log_level);
    println!("  claude_cmd = \"{}\"", settings.claude_cmd);
    println!(
        "  implementation_timeout = {}s",
        settings.implementation_timeout.as_secs()
    );
    println!(
        "  per_feature_timeout = {}s",
        settings.per_feature_timeout.as_secs()
    );
    println!("  repo_visibility = \"{}\"", settings.repo_visibility);
    println!("  GEMINI_API_KEY: {}", set(&settings.gemini_api_key));
    println!("  GITHUB_TOKEN: {}", set(&settings.github_token));
    println!();
}

pub fn cmd_config(base_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = base_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("ideaforge Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No ideaforge.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();

            let settings = Settings::load(base_dir)?;
            print_toml(&settings.toml);
            print_effective(&settings);

            if !config_path.exists() {
                println!("Run 'ideaforge config init' to create an ideaforge.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let settings = Settings::load(base_dir)?;
            let warnings = settings.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }

            let missing = settings.missing_credentials();
            if !missing.is_empty() {
                println!();
                println!("Missing credentials for a live run: {}", missing.join(", "));
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("ideaforge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            IdeaForgeToml::default().save(&config_path)?;

            println!("Created ideaforge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [storage] projects_dir, data_dir");
            println!("  - [implementation] claude_cmd, timeouts, single_session_first");
            println!("  - [retry.*] attempts and delays per step");
            println!();
            println!("Secrets (GEMINI_API_KEY, GITHUB_TOKEN) belong in the environment or .env.");
            println!();
        }
    }

    Ok(())
}
