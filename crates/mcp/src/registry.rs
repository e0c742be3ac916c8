//! Runtime registry of tool-server connections.
//!
//! Owns one `Client` per connected server plus per-server runtime state:
//! session enable/disable overrides, last connection error, and the
//! OAuth authenticator for HTTP servers. Definitions say how to reach a
//! server; the registry says what is actually connected right now.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use {
    serde::Serialize,
    serde_json::Value,
    tokio::sync::{RwLock, Semaphore},
    tracing::{info, warn},
};

use crate::{
    auth::{OAuthAuthenticator, OAuthStatus},
    client::Client,
    definitions::{ServerDefinition, TransportKind},
    error::{Error, Result},
    traits::AuthProvider,
    types::{ToolCallResult, ToolDef},
};

/// Cap on simultaneous connection attempts during initialize.
const MAX_CONCURRENT_CONNECTS: usize = 4;

/// Point-in-time view of one server's runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub connected: bool,
    pub tool_count: usize,
    /// Session-scoped override; resets only when the process exits.
    pub runtime_enabled: bool,
    /// From the persisted definition.
    pub config_enabled: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<OAuthStatus>,
}

struct ServerEntry {
    definition: ServerDefinition,
    client: Option<Arc<RwLock<Client>>>,
    tools: Vec<ToolDef>,
    error: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, ServerEntry>,
    /// Names disabled for this session. Survives re-initialize.
    runtime_disabled: HashSet<String>,
    authenticators: HashMap<String, Arc<OAuthAuthenticator>>,
}

/// All live server connections. Constructed once by the host and shared.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a definition set and connect every server that is enabled in
    /// config and not runtime-disabled. Connection attempts run
    /// concurrently, bounded by `MAX_CONCURRENT_CONNECTS`; one server's
    /// failure never blocks the others.
    pub async fn initialize(&self, definitions: HashMap<String, ServerDefinition>) {
        let mut stale = Vec::new();
        {
            let mut inner = self.inner.write().await;

            let removed: Vec<String> = inner
                .entries
                .keys()
                .filter(|name| !definitions.contains_key(*name))
                .cloned()
                .collect();
            for name in removed {
                if let Some(mut entry) = inner.entries.remove(&name)
                    && let Some(client) = entry.client.take()
                {
                    stale.push(client);
                }
                inner.authenticators.remove(&name);
            }

            for (name, definition) in definitions {
                match inner.entries.get_mut(&name) {
                    Some(entry) => {
                        // A changed definition invalidates the connection.
                        if entry.definition != definition {
                            if let Some(client) = entry.client.take() {
                                stale.push(client);
                            }
                            entry.tools.clear();
                            entry.error = None;
                            entry.definition = definition;
                        }
                    },
                    None => {
                        inner.entries.insert(name, ServerEntry {
                            definition,
                            client: None,
                            tools: Vec::new(),
                            error: None,
                        });
                    },
                }
            }
        }

        for client in stale {
            client.write().await.shutdown().await;
        }

        let targets: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .entries
                .iter()
                .filter(|(name, entry)| {
                    entry.definition.enabled
                        && entry.client.is_none()
                        && !inner.runtime_disabled.contains(*name)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CONNECTS));
        let connects = targets.into_iter().map(|name| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Err(e) = self.connect_server(&name).await {
                    warn!(server = %name, error = %e, "connection failed");
                }
            }
        });
        futures::future::join_all(connects).await;
    }

    /// Connect one server and cache its tool list. Runs the transport I/O
    /// outside the registry lock.
    async fn connect_server(&self, name: &str) -> Result<()> {
        let (definition, auth) = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .entries
                .get(name)
                .ok_or_else(|| Error::message(format!("unknown server '{name}'")))?;
            if !entry.definition.enabled {
                return Err(Error::message(format!(
                    "server '{name}' is disabled in config"
                )));
            }
            if inner.runtime_disabled.contains(name) {
                return Err(Error::message(format!(
                    "server '{name}' is disabled for this session"
                )));
            }
            let definition = entry.definition.clone();

            let auth = if definition.transport == TransportKind::Http {
                let url = definition.url.clone().unwrap_or_default();
                let oauth = definition.oauth.clone();
                Some(Arc::clone(inner.authenticators.entry(name.to_string()).or_insert_with(
                    || Arc::new(OAuthAuthenticator::new(name, &url, oauth)),
                )))
            } else {
                None
            };
            (definition, auth)
        };

        let outcome = Client::connect(
            name,
            &definition,
            auth.map(|a| a as Arc<dyn AuthProvider>),
        )
        .await;

        let mut inner = self.inner.write().await;
        let Some(entry) = inner.entries.get_mut(name) else {
            // Removed while we were connecting.
            if let Ok(mut client) = outcome {
                client.shutdown().await;
            }
            return Ok(());
        };

        match outcome {
            Ok(client) => {
                entry.tools = client.tools().to_vec();
                entry.error = None;
                entry.client = Some(Arc::new(RwLock::new(client)));
                info!(server = %name, tools = entry.tools.len(), "server connected");
                Ok(())
            },
            Err(e) => {
                entry.client = None;
                entry.tools.clear();
                entry.error = Some(e.to_string());
                Err(e)
            },
        }
    }

    async fn disconnect_server(&self, name: &str) {
        let client = {
            let mut inner = self.inner.write().await;
            let Some(entry) = inner.entries.get_mut(name) else {
                return;
            };
            entry.tools.clear();
            entry.client.take()
        };
        if let Some(client) = client {
            client.write().await.shutdown().await;
        }
    }

    /// Tear down and re-establish one server's connection.
    pub async fn restart(&self, name: &str) -> Result<()> {
        info!(server = %name, "restarting server");
        self.disconnect_server(name).await;
        self.connect_server(name).await
    }

    /// Disable a server for the rest of this session and disconnect it.
    pub async fn stop(&self, name: &str) -> bool {
        self.set_runtime_enabled(name, false).await
    }

    /// Re-enable a runtime-disabled server and reconnect it.
    pub async fn start(&self, name: &str) -> bool {
        if !self.set_runtime_enabled(name, true).await {
            return false;
        }
        if let Err(e) = self.restart(name).await {
            warn!(server = %name, error = %e, "reconnect after enable failed");
        }
        true
    }

    /// Flip the session-scoped enable override. Returns `false` for names
    /// with no definition; the override map never holds unknown servers.
    /// Disabling a connected server disconnects it; enabling does not
    /// connect by itself (use `start`).
    pub async fn set_runtime_enabled(&self, name: &str, enabled: bool) -> bool {
        {
            let mut inner = self.inner.write().await;
            if !inner.entries.contains_key(name) {
                return false;
            }
            if enabled {
                inner.runtime_disabled.remove(name);
            } else {
                inner.runtime_disabled.insert(name.to_string());
            }
        }

        if !enabled {
            self.disconnect_server(name).await;
        }
        true
    }

    pub async fn is_runtime_enabled(&self, name: &str) -> bool {
        let inner = self.inner.read().await;
        inner.entries.contains_key(name) && !inner.runtime_disabled.contains(name)
    }

    /// Whether this server is eligible for use: enabled in config and not
    /// runtime-disabled. Independent of the current connection state.
    pub async fn is_available(&self, name: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(name)
            .is_some_and(|entry| entry.definition.enabled && !inner.runtime_disabled.contains(name))
    }

    pub async fn status(&self, name: &str) -> Option<RuntimeStatus> {
        let auth = {
            let inner = self.inner.read().await;
            inner.authenticators.get(name).cloned()
        };
        let auth_status = match auth {
            Some(a) => Some(a.status().await),
            None => None,
        };

        let inner = self.inner.read().await;
        let entry = inner.entries.get(name)?;
        Some(RuntimeStatus {
            connected: entry.client.is_some(),
            tool_count: entry.tools.len(),
            runtime_enabled: !inner.runtime_disabled.contains(name),
            config_enabled: entry.definition.enabled,
            error: entry.error.clone(),
            auth: auth_status,
        })
    }

    pub async fn status_all(&self) -> HashMap<String, RuntimeStatus> {
        let names: Vec<String> = {
            let inner = self.inner.read().await;
            inner.entries.keys().cloned().collect()
        };
        let mut out = HashMap::new();
        for name in names {
            if let Some(status) = self.status(&name).await {
                out.insert(name, status);
            }
        }
        out
    }

    /// Cached tool lists for every server whose tools are currently
    /// offered (connected, config-enabled, not runtime-disabled).
    pub async fn available_tools(&self) -> Vec<(String, Vec<ToolDef>)> {
        let inner = self.inner.read().await;
        let mut out: Vec<(String, Vec<ToolDef>)> = inner
            .entries
            .iter()
            .filter(|(name, entry)| {
                entry.definition.enabled
                    && entry.client.is_some()
                    && !inner.runtime_disabled.contains(*name)
            })
            .map(|(name, entry)| (name.clone(), entry.tools.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Invoke a tool by server name and server-local tool name.
    pub async fn call(&self, server: &str, tool: &str, arguments: Value) -> Result<ToolCallResult> {
        let client = {
            let inner = self.inner.read().await;
            if inner.runtime_disabled.contains(server) {
                return Err(Error::message(format!("server '{server}' is disabled")));
            }
            inner
                .entries
                .get(server)
                .and_then(|e| e.client.clone())
                .ok_or_else(|| Error::message(format!("server '{server}' is not connected")))?
        };
        let client = client.read().await;
        client.call_tool(tool, arguments).await
    }

    /// Shut down every connection. Definitions and runtime overrides stay.
    pub async fn cleanup(&self) {
        let clients: Vec<Arc<RwLock<Client>>> = {
            let mut inner = self.inner.write().await;
            inner
                .entries
                .values_mut()
                .filter_map(|entry| {
                    entry.tools.clear();
                    entry.client.take()
                })
                .collect()
        };
        for client in clients {
            client.write().await.shutdown().await;
        }
        info!("all server connections closed");
    }

    // ── OAuth plumbing ─────────────────────────────────────────────────

    async fn authenticator(&self, name: &str) -> Result<Arc<OAuthAuthenticator>> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .entries
            .get(name)
            .ok_or_else(|| Error::message(format!("unknown server '{name}'")))?;
        if entry.definition.transport != TransportKind::Http {
            return Err(Error::message(format!(
                "server '{name}' does not use OAuth (not an HTTP server)"
            )));
        }
        let url = entry.definition.url.clone().unwrap_or_default();
        let oauth = entry.definition.oauth.clone();
        Ok(Arc::clone(
            inner
                .authenticators
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OAuthAuthenticator::new(name, &url, oauth))),
        ))
    }

    /// Start interactive authorization for an HTTP server. Returns the
    /// consent URL to open.
    pub async fn begin_authorization(&self, name: &str, redirect_uri: &str) -> Result<String> {
        let auth = self.authenticator(name).await?;
        auth.begin_authorization(redirect_uri).await
    }

    /// Complete a pending authorization, then reconnect the server so the
    /// new token takes effect. Returns `false` on state mismatch.
    pub async fn complete_authorization(
        &self,
        name: &str,
        state: &str,
        code: &str,
    ) -> Result<bool> {
        let auth = self.authenticator(name).await?;
        let accepted = auth.complete_authorization(state, code).await?;
        if accepted && let Err(e) = self.restart(name).await {
            warn!(server = %name, error = %e, "reconnect after authorization failed");
        }
        Ok(accepted)
    }

    /// Drop stored credentials for a server and disconnect it.
    pub async fn revoke_authorization(&self, name: &str) -> Result<()> {
        let auth = self.authenticator(name).await?;
        auth.revoke().await?;
        self.disconnect_server(name).await;
        Ok(())
    }

    pub async fn auth_status(&self, name: &str) -> Option<OAuthStatus> {
        let auth = {
            let inner = self.inner.read().await;
            inner.authenticators.get(name).cloned()
        }?;
        Some(auth.status().await)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use {super::*, crate::test_support::mock_mcp_server};

    fn http_definition(url: &str) -> ServerDefinition {
        ServerDefinition {
            transport: TransportKind::Http,
            url: Some(url.to_string()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn defs(entries: Vec<(&str, ServerDefinition)>) -> HashMap<String, ServerDefinition> {
        entries
            .into_iter()
            .map(|(n, d)| (n.to_string(), d))
            .collect()
    }

    #[tokio::test]
    async fn initialize_connects_enabled_servers() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;

        let status = registry.status("alpha").await.unwrap();
        assert!(status.connected);
        assert_eq!(status.tool_count, 1);
        assert!(status.runtime_enabled);
        assert!(status.error.is_none());
        assert!(registry.is_available("alpha").await);
    }

    #[tokio::test]
    async fn failed_server_records_error_and_does_not_block_others() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![
                ("good", http_definition(&server.url())),
                ("bad", http_definition("http://127.0.0.1:1/mcp")),
            ]))
            .await;

        assert!(registry.status("good").await.unwrap().connected);
        let bad = registry.status("bad").await.unwrap();
        assert!(!bad.connected);
        assert!(bad.error.is_some());
        // Still eligible; availability ignores connection state.
        assert!(registry.is_available("bad").await);
    }

    #[tokio::test]
    async fn config_disabled_server_is_never_contacted() {
        let registry = ConnectionRegistry::new();
        let mut definition = http_definition("http://127.0.0.1:1/mcp");
        definition.enabled = false;
        registry.initialize(defs(vec![("off", definition)])).await;

        let status = registry.status("off").await.unwrap();
        assert!(!status.connected);
        assert!(!status.config_enabled);
        // No attempt means no error.
        assert!(status.error.is_none());
        assert!(!registry.is_available("off").await);
    }

    #[tokio::test]
    async fn runtime_disable_survives_reinitialize() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        let definitions = defs(vec![("alpha", http_definition(&server.url()))]);
        registry.initialize(definitions.clone()).await;

        assert!(registry.stop("alpha").await);
        assert!(!registry.is_runtime_enabled("alpha").await);
        assert!(!registry.status("alpha").await.unwrap().connected);

        registry.initialize(definitions).await;
        assert!(!registry.is_runtime_enabled("alpha").await);
        let status = registry.status("alpha").await.unwrap();
        assert!(!status.connected);
        assert!(!status.runtime_enabled);
    }

    #[tokio::test]
    async fn start_reconnects_runtime_disabled_server() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;

        registry.stop("alpha").await;
        assert!(registry.start("alpha").await);
        let status = registry.status("alpha").await.unwrap();
        assert!(status.connected);
        assert!(status.runtime_enabled);
        assert_eq!(status.tool_count, 1);
    }

    #[tokio::test]
    async fn enabling_override_alone_does_not_connect() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;
        registry.stop("alpha").await;

        assert!(registry.set_runtime_enabled("alpha", true).await);
        let status = registry.status("alpha").await.unwrap();
        assert!(status.runtime_enabled);
        assert!(!status.connected);
    }

    #[tokio::test]
    async fn set_runtime_enabled_rejects_unknown_server() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.set_runtime_enabled("ghost", false).await);
        assert!(!registry.is_runtime_enabled("ghost").await);
        assert!(registry.status("ghost").await.is_none());
    }

    #[tokio::test]
    async fn restart_keeps_tool_count_stable() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}, {"name": "sum"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;
        assert_eq!(registry.status("alpha").await.unwrap().tool_count, 2);

        registry.restart("alpha").await.unwrap();
        let status = registry.status("alpha").await.unwrap();
        assert!(status.connected);
        assert_eq!(status.tool_count, 2);
    }

    #[tokio::test]
    async fn restart_respects_runtime_disable() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;
        registry.stop("alpha").await;

        let err = registry.restart("alpha").await.unwrap_err();
        assert!(err.to_string().contains("disabled for this session"));
        let status = registry.status("alpha").await.unwrap();
        assert!(!status.connected);
        assert!(!status.runtime_enabled);
    }

    #[tokio::test]
    async fn call_routes_to_connected_server() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "echoed").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;

        let result = registry
            .call("alpha", "echo", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.text(), "echoed");
    }

    #[tokio::test]
    async fn call_to_disabled_server_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;
        registry.stop("alpha").await;

        let err = registry.call("alpha", "echo", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn cleanup_disconnects_everything() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;
        registry.cleanup().await;

        let status = registry.status("alpha").await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.tool_count, 0);
        assert!(registry.available_tools().await.is_empty());
    }

    #[tokio::test]
    async fn removed_definition_drops_entry() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let registry = ConnectionRegistry::new();
        registry
            .initialize(defs(vec![("alpha", http_definition(&server.url()))]))
            .await;
        registry.initialize(HashMap::new()).await;

        assert!(registry.status("alpha").await.is_none());
        assert!(!registry.is_available("alpha").await);
    }

    #[tokio::test]
    async fn oauth_operations_require_http_transport() {
        let registry = ConnectionRegistry::new();
        let definition = ServerDefinition {
            command: "some-server".into(),
            enabled: false,
            ..Default::default()
        };
        registry.initialize(defs(vec![("local", definition)])).await;

        let err = registry
            .begin_authorization("local", "http://127.0.0.1:7777/callback")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an HTTP server"));
        assert!(registry.auth_status("local").await.is_none());
    }
}
