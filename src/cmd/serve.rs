//! HTTP + WebSocket API: `ideaforge serve`.

use anyhow::Result;
use console::style;

use ideaforge::app::build_app_state;
use ideaforge::config::Settings;
use ideaforge::server::{ServerConfig, start_server};

pub async fn cmd_serve(settings: &Settings, dev: bool) -> Result<()> {
    let state = build_app_state(settings)?;
    let config = ServerConfig {
        host: settings.toml.server.host.clone(),
        port: settings.port,
        permissive_cors: dev,
    };

    println!(
        "{} http://{}:{}",
        style("ideaforge API at").cyan().bold(),
        config.host,
        config.port
    );
    start_server(config, state).await
}
