use std::{
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use tracing::{debug, warn};

use crate::schema::SwitchboardConfig;

const CONFIG_FILENAME: &str = "switchboard.toml";

/// Programmatic config-dir override (used by tests and embedding hosts).
fn config_dir_override() -> &'static Mutex<Option<PathBuf>> {
    static OVERRIDE: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();
    OVERRIDE.get_or_init(|| Mutex::new(None))
}

/// Override the config directory for this process.
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut slot) = config_dir_override().lock() {
        *slot = Some(path);
    }
}

/// Clear a previously set config-dir override.
pub fn clear_config_dir() {
    if let Ok(mut slot) = config_dir_override().lock() {
        *slot = None;
    }
}

/// Returns the config directory.
///
/// Resolution order:
/// 1. programmatic override ([`set_config_dir`])
/// 2. `SWITCHBOARD_CONFIG_DIR`
/// 3. `~/.config/switchboard`
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(slot) = config_dir_override().lock()
        && let Some(path) = slot.as_ref()
    {
        return Some(path.clone());
    }
    if let Ok(dir) = std::env::var("SWITCHBOARD_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "switchboard").map(|d| d.config_dir().to_path_buf())
}

/// Load config from the given path.
pub fn load_config(path: &Path) -> anyhow::Result<SwitchboardConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    Ok(toml::from_str(&raw)?)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./switchboard.toml` (project-local)
/// 2. `<config_dir>/switchboard.toml` (user-global)
///
/// Returns `SwitchboardConfig::default()` if no config file is found.
pub fn discover_and_load() -> SwitchboardConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    SwitchboardConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    let global = config_dir()?.join(CONFIG_FILENAME);
    global.exists().then_some(global)
}

/// Serialize `config` to TOML and write it to the user-global config path.
///
/// Creates parent directories if needed. Returns the path written to.
pub fn save_config(config: &SwitchboardConfig) -> anyhow::Result<PathBuf> {
    let path = config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILENAME);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(&path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}
