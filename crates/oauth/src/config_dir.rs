use std::path::PathBuf;

/// Returns the configured switchboard config directory.
///
/// Resolution order comes from `switchboard_config::config_dir()`:
/// 1. programmatic override (`set_config_dir`)
/// 2. `SWITCHBOARD_CONFIG_DIR`
/// 3. `~/.config/switchboard`
pub fn switchboard_config_dir() -> PathBuf {
    switchboard_config::config_dir().unwrap_or_else(|| PathBuf::from(".config/switchboard"))
}
