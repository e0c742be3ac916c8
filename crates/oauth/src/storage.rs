//! File-based token storage at `<config_dir>/oauth_tokens.json`.

use std::{collections::HashMap, path::PathBuf};

use tracing::{debug, info, warn};

use crate::{Result, config_dir::switchboard_config_dir, types::OAuthTokens};

/// Persists OAuth tokens per server, keyed by an opaque store key.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new() -> Self {
        let path = switchboard_config_dir().join("oauth_tokens.json");
        Self { path }
    }

    /// Create a token store at a specific path (useful for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self, key: &str) -> Option<OAuthTokens> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), key, "token file not found");
                return None;
            },
            Err(e) => {
                warn!(path = %self.path.display(), key, error = %e, "token file read failed");
                return None;
            },
        };

        let map: HashMap<String, OAuthTokens> = match serde_json::from_str(&data) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.path.display(), key, error = %e, "token file parse failed");
                return None;
            },
        };

        map.get(key).cloned()
    }

    pub fn save(&self, key: &str, tokens: &OAuthTokens) -> Result<()> {
        info!(path = %self.path.display(), key, "saving OAuth tokens");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut map: HashMap<String, OAuthTokens> = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|d| serde_json::from_str(&d).ok())
            .unwrap_or_default();

        map.insert(key.to_string(), tokens.clone());

        let data = serde_json::to_string_pretty(&map)?;
        std::fs::write(&self.path, &data)?;

        // Token file must not be world-readable.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(_) => return Ok(()),
        };

        let mut map: HashMap<String, OAuthTokens> = serde_json::from_str(&data)?;
        if map.remove(key).is_some() {
            info!(path = %self.path.display(), key, "deleted OAuth tokens");
        }

        let data = serde_json::to_string_pretty(&map)?;
        std::fs::write(&self.path, &data)?;
        Ok(())
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
