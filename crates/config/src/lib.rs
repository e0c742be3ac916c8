//! Configuration loading for switchboard.
//!
//! Config file: `switchboard.toml`, searched in `./` then
//! `~/.config/switchboard/`. Supplies the feature flags the core reads;
//! tool-server definitions live in their own document (see
//! `switchboard-mcp`).

pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, config_dir, discover_and_load, load_config, save_config,
             set_config_dir},
    schema::{AgentConfig, SwitchboardConfig, ToolsConfig},
};
