pub mod app;
pub mod artifacts;
pub mod config;
pub mod errors;
pub mod github;
pub mod history;
pub mod implement;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod scaffold;
pub mod server;
