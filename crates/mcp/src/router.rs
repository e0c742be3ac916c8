//! Aggregates every connected server's tools into one flat namespace and
//! routes calls back to the owning server.
//!
//! Qualified names are `server:tool`, split on the first `:`. Execution
//! never returns `Err`: every failure becomes a `ToolCallResult` with
//! `is_error` set, so a bad tool call reads like any other tool failure.

use std::sync::Arc;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    client::Client,
    definitions::{ServerDefinition, TransportKind},
    registry::ConnectionRegistry,
    types::ToolCallResult,
};

/// Separator between server name and tool name in qualified names.
pub const NAME_SEPARATOR: char = ':';

/// One tool in the aggregated namespace.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// `server:tool`.
    pub qualified_name: String,
    pub server: String,
    /// The server-local tool name.
    pub raw_name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    /// Whether the owning server currently offers this tool.
    pub enabled: bool,
}

/// A tool invocation addressed by qualified name.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Outcome of probing a candidate server definition.
#[derive(Debug, Clone, Serialize)]
pub struct TestConnectionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestConnectionResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tool_count: None,
            error: Some(error.into()),
        }
    }
}

pub struct ToolRouter {
    registry: Arc<ConnectionRegistry>,
}

impl ToolRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Every tool currently offered, sorted by qualified name. Servers
    /// that are disconnected or disabled contribute nothing.
    pub async fn aggregate_tools(&self) -> Vec<ToolDescriptor> {
        let mut out = Vec::new();
        for (server, tools) in self.registry.available_tools().await {
            for tool in tools {
                out.push(ToolDescriptor {
                    qualified_name: format!("{server}{NAME_SEPARATOR}{}", tool.name),
                    server: server.clone(),
                    raw_name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    enabled: true,
                });
            }
        }
        out.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        out
    }

    /// Route one call to the owning server. Infallible by construction:
    /// resolution failures and transport errors come back as error-flagged
    /// results.
    pub async fn execute_tool_call(&self, request: ToolCallRequest) -> ToolCallResult {
        let Some((server, raw_name)) = request.name.split_once(NAME_SEPARATOR) else {
            return ToolCallResult::error(format!("Unknown tool: {}", request.name));
        };

        let offered = self
            .registry
            .available_tools()
            .await
            .into_iter()
            .find(|(name, _)| name == server)
            .is_some_and(|(_, tools)| tools.iter().any(|t| t.name == raw_name));
        if !offered {
            return ToolCallResult::error(format!("Unknown tool: {}", request.name));
        }

        let arguments = match request.arguments {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        debug!(tool = %request.name, "routing tool call");
        match self.registry.call(server, raw_name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %request.name, error = %e, "tool call failed");
                ToolCallResult::error(format!("Tool call failed: {e}"))
            },
        }
    }

    /// Probe a candidate definition without touching the registry:
    /// validate it, connect, count tools, disconnect.
    pub async fn test_server_connection(
        &self,
        name: &str,
        definition: &Value,
    ) -> TestConnectionResult {
        let definition = match validate_definition(definition) {
            Ok(d) => d,
            Err(message) => return TestConnectionResult::failure(message),
        };

        match Client::connect(name, &definition, None).await {
            Ok(mut client) => {
                let tool_count = client.tools().len();
                client.shutdown().await;
                TestConnectionResult {
                    success: true,
                    tool_count: Some(tool_count),
                    error: None,
                }
            },
            Err(e) => TestConnectionResult::failure(e.to_string()),
        }
    }
}

/// Structural validation of a raw definition, with stable user-facing
/// messages for the common mistakes.
fn validate_definition(value: &Value) -> Result<ServerDefinition, String> {
    if !value.is_object() {
        return Err("Server definition must be an object".into());
    }

    if let Some(args) = value.get("args")
        && !args.is_array()
    {
        return Err("Args must be an array".into());
    }

    let definition: ServerDefinition = serde_json::from_value(value.clone())
        .map_err(|e| format!("Invalid server definition: {e}"))?;

    match definition.transport {
        TransportKind::Stdio if definition.command.trim().is_empty() => {
            Err("Command is required".into())
        },
        TransportKind::Socket
            if definition
                .address
                .as_deref()
                .is_none_or(|a| a.trim().is_empty()) =>
        {
            Err("Address is required for socket transport".into())
        },
        TransportKind::Http
            if definition.url.as_deref().is_none_or(|u| u.trim().is_empty()) =>
        {
            Err("URL is required for http transport".into())
        },
        _ => Ok(definition),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use {
        super::*,
        crate::test_support::{mock_mcp_call_result, mock_mcp_handshake, mock_mcp_server},
    };

    fn http_definition(url: &str) -> ServerDefinition {
        ServerDefinition {
            transport: TransportKind::Http,
            url: Some(url.to_string()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    async fn router_with(
        servers: Vec<(&str, ServerDefinition)>,
    ) -> (ToolRouter, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        registry
            .initialize(
                servers
                    .into_iter()
                    .map(|(n, d)| (n.to_string(), d))
                    .collect(),
            )
            .await;
        (ToolRouter::new(Arc::clone(&registry)), registry)
    }

    #[tokio::test]
    async fn aggregate_namespaces_tools_by_server() {
        let mut alpha = mockito::Server::new_async().await;
        mock_mcp_server(&mut alpha, json!([{"name": "echo"}]), "from alpha").await;
        let mut beta = mockito::Server::new_async().await;
        mock_mcp_server(&mut beta, json!([{"name": "sum"}, {"name": "echo"}]), "from beta").await;

        let (router, _registry) = router_with(vec![
            ("alpha", http_definition(&alpha.url())),
            ("beta", http_definition(&beta.url())),
        ])
        .await;

        let tools = router.aggregate_tools().await;
        let names: Vec<&str> = tools.iter().map(|t| t.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["alpha:echo", "beta:echo", "beta:sum"]);
        assert_eq!(tools[0].server, "alpha");
        assert_eq!(tools[0].raw_name, "echo");
        assert!(tools[0].enabled);
    }

    #[tokio::test]
    async fn execute_routes_by_qualified_name() {
        let mut alpha = mockito::Server::new_async().await;
        mock_mcp_server(&mut alpha, json!([{"name": "echo"}]), "from alpha").await;
        let mut beta = mockito::Server::new_async().await;
        mock_mcp_server(&mut beta, json!([{"name": "echo"}]), "from beta").await;

        let (router, _registry) = router_with(vec![
            ("alpha", http_definition(&alpha.url())),
            ("beta", http_definition(&beta.url())),
        ])
        .await;

        let result = router
            .execute_tool_call(ToolCallRequest {
                name: "beta:echo".into(),
                arguments: json!({"text": "hi"}),
            })
            .await;
        assert!(!result.is_error);
        assert_eq!(result.text(), "from beta");
    }

    #[tokio::test]
    async fn unqualified_name_is_unknown() {
        let (router, _registry) = router_with(vec![]).await;
        let result = router
            .execute_tool_call(ToolCallRequest {
                name: "echo".into(),
                arguments: Value::Null,
            })
            .await;
        assert!(result.is_error);
        assert_eq!(result.text(), "Unknown tool: echo");
    }

    #[tokio::test]
    async fn unknown_server_or_tool_is_flagged_not_raised() {
        let mut alpha = mockito::Server::new_async().await;
        mock_mcp_server(&mut alpha, json!([{"name": "echo"}]), "out").await;

        let (router, _registry) =
            router_with(vec![("alpha", http_definition(&alpha.url()))]).await;

        let result = router
            .execute_tool_call(ToolCallRequest {
                name: "alpha:missing".into(),
                arguments: Value::Null,
            })
            .await;
        assert!(result.is_error);
        assert_eq!(result.text(), "Unknown tool: alpha:missing");

        let result = router
            .execute_tool_call(ToolCallRequest {
                name: "ghost:echo".into(),
                arguments: Value::Null,
            })
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn disabled_server_tools_are_withheld() {
        let mut alpha = mockito::Server::new_async().await;
        mock_mcp_server(&mut alpha, json!([{"name": "echo"}]), "out").await;

        let (router, registry) =
            router_with(vec![("alpha", http_definition(&alpha.url()))]).await;
        registry.stop("alpha").await;

        assert!(router.aggregate_tools().await.is_empty());
        let result = router
            .execute_tool_call(ToolCallRequest {
                name: "alpha:echo".into(),
                arguments: Value::Null,
            })
            .await;
        assert!(result.is_error);
        assert_eq!(result.text(), "Unknown tool: alpha:echo");
    }

    #[tokio::test]
    async fn server_error_results_pass_through() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_handshake(&mut server, json!([{"name": "fails"}])).await;
        mock_mcp_call_result(&mut server, "disk full", true).await;

        let (router, _registry) =
            router_with(vec![("alpha", http_definition(&server.url()))]).await;

        let result = router
            .execute_tool_call(ToolCallRequest {
                name: "alpha:fails".into(),
                arguments: Value::Null,
            })
            .await;
        assert!(result.is_error);
        assert_eq!(result.text(), "disk full");
    }

    #[tokio::test]
    async fn validation_messages_are_stable() {
        let (router, _registry) = router_with(vec![]).await;

        let result = router
            .test_server_connection("candidate", &json!({"command": ""}))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Command is required"));

        let result = router
            .test_server_connection("candidate", &json!({"command": "x", "args": {}}))
            .await;
        assert_eq!(result.error.as_deref(), Some("Args must be an array"));

        let result = router
            .test_server_connection("candidate", &json!({"transport": "http"}))
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("URL is required for http transport")
        );

        let result = router
            .test_server_connection("candidate", &json!({"transport": "socket"}))
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("Address is required for socket transport")
        );
    }

    #[tokio::test]
    async fn test_connection_probes_and_disconnects() {
        let mut server = mockito::Server::new_async().await;
        mock_mcp_server(&mut server, json!([{"name": "echo"}]), "out").await;

        let (router, registry) = router_with(vec![]).await;
        let result = router
            .test_server_connection("candidate", &json!({
                "transport": "http",
                "url": server.url(),
                "timeout_secs": 5
            }))
            .await;

        assert!(result.success);
        assert_eq!(result.tool_count, Some(1));
        assert!(result.error.is_none());
        // The probe never registers the server.
        assert!(registry.status("candidate").await.is_none());
    }

    #[tokio::test]
    async fn test_connection_reports_unreachable_server() {
        let (router, _registry) = router_with(vec![]).await;
        let result = router
            .test_server_connection("candidate", &json!({
                "transport": "http",
                "url": "http://127.0.0.1:1/mcp",
                "timeout_secs": 1
            }))
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
