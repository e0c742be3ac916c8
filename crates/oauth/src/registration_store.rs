//! Persists dynamic client registrations for tool-server OAuth.
//!
//! Stores client credentials at `<config_dir>/oauth_registrations.json` so
//! re-registration is avoided on subsequent connections.

use std::{collections::HashMap, path::PathBuf};

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{Result, config_dir::switchboard_config_dir};

/// A stored dynamic client registration.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredRegistration {
    pub client_id: String,
    #[serde(
        default,
        serialize_with = "crate::types::serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub resource: String,
    pub registered_at: u64,
}

impl std::fmt::Debug for StoredRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredRegistration")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("resource", &self.resource)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// File-based store for OAuth client registrations, keyed by server URL.
#[derive(Debug, Clone)]
pub struct RegistrationStore {
    path: PathBuf,
}

impl RegistrationStore {
    pub fn new() -> Self {
        let path = switchboard_config_dir().join("oauth_registrations.json");
        Self { path }
    }

    /// Create a store at a specific path (useful for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load a stored registration for the given server URL.
    pub fn load(&self, server_url: &str) -> Option<StoredRegistration> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), server_url, "registration file not found");
                return None;
            },
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    server_url,
                    error = %e,
                    "registration file read failed"
                );
                return None;
            },
        };

        let map: HashMap<String, StoredRegistration> = match serde_json::from_str(&data) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    server_url,
                    error = %e,
                    "registration file parse failed"
                );
                return None;
            },
        };

        map.get(server_url).cloned()
    }

    /// Save a registration for the given server URL.
    pub fn save(&self, server_url: &str, reg: &StoredRegistration) -> Result<()> {
        info!(server_url, client_id = %reg.client_id, "saving OAuth registration");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut map: HashMap<String, StoredRegistration> = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|d| serde_json::from_str(&d).ok())
            .unwrap_or_default();

        map.insert(server_url.to_string(), reg.clone());

        let data = serde_json::to_string_pretty(&map)?;
        std::fs::write(&self.path, &data)?;
        Ok(())
    }

    /// Delete a stored registration. Returns `true` if one existed.
    pub fn delete(&self, server_url: &str) -> Result<bool> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(_) => return Ok(false),
        };

        let mut map: HashMap<String, StoredRegistration> = serde_json::from_str(&data)?;
        let removed = map.remove(server_url).is_some();
        if removed {
            let data = serde_json::to_string_pretty(&map)?;
            std::fs::write(&self.path, &data)?;
        }
        Ok(removed)
    }
}

impl Default for RegistrationStore {
    fn default() -> Self {
        Self::new()
    }
}
