//! Persisted tool-server definitions.
//!
//! Definitions live in `servers.json` under the switchboard config
//! directory and describe how to reach each server; runtime connection
//! state lives in the registry, never here.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

use crate::error::Result;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which channel a server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Socket,
    Http,
}

/// Per-server OAuth overrides for servers with known, pre-registered
/// clients. Absent fields fall back to dynamic discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// How to launch or reach one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDefinition {
    #[serde(default)]
    pub transport: TransportKind,
    /// Executable for stdio servers.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// `host:port` for socket servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Endpoint URL for HTTP servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthOverride>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ServerDefinition {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            address: None,
            url: None,
            enabled: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            oauth: None,
        }
    }
}

impl ServerDefinition {
    /// Per-request timeout for this server's transport.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The persisted set of server definitions, keyed by server name.
#[derive(Debug, Clone, Default)]
pub struct ServerDefinitions {
    servers: HashMap<String, ServerDefinition>,
    path: PathBuf,
}

impl ServerDefinitions {
    /// Load definitions from `<dir>/servers.json`. A missing file yields an
    /// empty set.
    pub fn load(dir: &std::path::Path) -> Result<Self> {
        let path = dir.join("servers.json");
        let servers = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no server definitions file");
                HashMap::new()
            },
            Err(e) => return Err(e.into()),
        };
        Ok(Self { servers, path })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.servers)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServerDefinition> {
        self.servers.get(name)
    }

    /// Insert or replace a definition and persist. Returns `true` if a
    /// definition with this name already existed.
    pub fn add(&mut self, name: &str, definition: ServerDefinition) -> Result<bool> {
        info!(name, "saving server definition");
        let replaced = self.servers.insert(name.to_string(), definition).is_some();
        self.save()?;
        Ok(replaced)
    }

    /// Remove a definition and persist. Returns `true` if one existed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let removed = self.servers.remove(name).is_some();
        if removed {
            info!(name, "removed server definition");
            self.save()?;
        }
        Ok(removed)
    }

    pub fn all(&self) -> &HashMap<String, ServerDefinition> {
        &self.servers
    }

    pub fn into_map(self) -> HashMap<String, ServerDefinition> {
        self.servers
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let defs = ServerDefinitions::load(dir.path()).unwrap();
        assert!(defs.all().is_empty());
    }

    #[test]
    fn add_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut defs = ServerDefinitions::load(dir.path()).unwrap();

        let replaced = defs
            .add("files", ServerDefinition {
                command: "file-server".into(),
                args: vec!["--root".into(), "/tmp".into()],
                ..Default::default()
            })
            .unwrap();
        assert!(!replaced);

        let reloaded = ServerDefinitions::load(dir.path()).unwrap();
        let def = reloaded.get("files").unwrap();
        assert_eq!(def.command, "file-server");
        assert_eq!(def.transport, TransportKind::Stdio);
        assert!(def.enabled);
        assert_eq!(def.timeout_secs, 30);
    }

    #[test]
    fn remove_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let mut defs = ServerDefinitions::load(dir.path()).unwrap();
        assert!(!defs.remove("absent").unwrap());

        defs.add("files", ServerDefinition::default()).unwrap();
        assert!(defs.remove("files").unwrap());
        assert!(defs.get("files").is_none());
    }

    #[test]
    fn transport_kind_parses_lowercase_tags() {
        let def: ServerDefinition = serde_json::from_str(
            r#"{"transport": "http", "url": "https://mcp.example.com/mcp"}"#,
        )
        .unwrap();
        assert_eq!(def.transport, TransportKind::Http);
        assert_eq!(def.url.as_deref(), Some("https://mcp.example.com/mcp"));
    }
}
