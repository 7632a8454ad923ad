//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `run`      | `Run`            |
//! | `history`  | `History`        |
//! | `resolve`  | `Resolve`        |
//! | `serve`    | `Serve`          |
//! | `config`   | `Config`         |

pub mod config;
pub mod history;
pub mod resolve;
pub mod run;
pub mod serve;

pub use config::cmd_config;
pub use history::cmd_history;
pub use resolve::cmd_resolve;
pub use run::{cmd_run, read_idea};
pub use serve::cmd_serve;
