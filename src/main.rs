use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ideaforge::config::{CliOverrides, Settings};
use ideaforge::logging::{LogOptions, init_tracing};

mod cmd;

#[derive(Parser)]
#[command(name = "ideaforge")]
#[command(version, about = "Turn an app idea into a PRD, a repository, and working code")]
pub struct Cli {
    /// Directory holding .ideaforge/ (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Where generated projects are created. Overrides PROJECT_STORAGE_PATH.
    #[arg(long, global = true)]
    pub projects_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Try one whole-project agent session before per-feature sessions
    #[arg(long, global = true)]
    pub single_session_first: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn overrides(&self, port: Option<u16>) -> CliOverrides {
        CliOverrides {
            projects_dir: self.projects_dir.clone(),
            log_level: self.log_level.clone(),
            port,
            single_session_first: self.single_session_first,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for one idea
    Run {
        /// The application idea
        #[arg(short, long, conflicts_with = "idea_file")]
        idea: Option<String>,

        /// Read the idea from a file
        #[arg(long)]
        idea_file: Option<PathBuf>,

        /// Technology preferences, e.g. "Rust, PostgreSQL"
        #[arg(short, long)]
        tech: Option<String>,
    },
    /// Show recent runs
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Print the implementation order of a PRD (or requirements.json)
    Resolve {
        /// Path to the PRD JSON
        prd: PathBuf,
    },
    /// Serve the HTTP and WebSocket API
    Serve {
        /// Port to serve on (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Allow cross-origin requests from any origin
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default ideaforge.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&base_dir, command.clone());
    }
    // `resolve` is offline and quiet
    if let Commands::Resolve { prd } = &cli.command {
        return cmd::cmd_resolve(prd);
    }

    let port = match &cli.command {
        Commands::Serve { port, .. } => *port,
        _ => None,
    };
    let settings = Settings::load(&base_dir)?.with_cli(&cli.overrides(port));

    let _log_guard = init_tracing(&LogOptions {
        level: settings.log_level.clone(),
        json: settings.toml.logging.json,
        file_dir: settings.toml.logging.file.then(|| settings.log_dir()),
    })?;

    match &cli.command {
        Commands::Run {
            idea,
            idea_file,
            tech,
        } => {
            let idea = cmd::read_idea(idea.as_deref(), idea_file.as_deref())?;
            cmd::cmd_run(&settings, idea, tech.clone()).await?;
        }
        Commands::History { limit } => cmd::cmd_history(&settings, *limit).await?,
        Commands::Serve { dev, .. } => cmd::cmd_serve(&settings, *dev).await?,
        Commands::Config { .. } | Commands::Resolve { .. } => {}
    }

    Ok(())
}
