//! Per-server MCP client: handshake, tool listing, tool calls.

use std::sync::Arc;

use {serde_json::Value, tracing::debug};

use crate::{
    definitions::{ServerDefinition, TransportKind},
    error::{Context, Error, Result},
    http_transport::HttpTransport,
    socket_transport::SocketTransport,
    stdio_transport::StdioTransport,
    traits::{AuthProvider, Transport},
    types::{
        InitializeParams, InitializeResult, ServerInfo, ToolCallResult, ToolDef, ToolsCallParams,
        ToolsListResult,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport established, handshake not yet complete.
    Connected,
    /// Handshake complete, requests allowed.
    Ready,
    Closed,
}

pub struct Client {
    server_name: String,
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    server_info: Option<InitializeResult>,
    tools: Vec<ToolDef>,
}

impl Client {
    /// Open a transport per the definition, run the initialize handshake,
    /// and fetch the server's tool list.
    pub async fn connect(
        name: &str,
        definition: &ServerDefinition,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Result<Self> {
        let timeout = definition.timeout();
        let transport: Arc<dyn Transport> = match definition.transport {
            TransportKind::Stdio => {
                if definition.command.trim().is_empty() {
                    return Err(Error::message("Command is required"));
                }
                Arc::new(
                    StdioTransport::spawn(
                        &definition.command,
                        &definition.args,
                        &definition.env,
                        timeout,
                    )
                    .await?,
                )
            },
            TransportKind::Socket => {
                let address = definition
                    .address
                    .as_deref()
                    .context("Address is required for socket transport")?;
                Arc::new(SocketTransport::connect(address, timeout).await?)
            },
            TransportKind::Http => {
                let url = definition
                    .url
                    .as_deref()
                    .context("URL is required for http transport")?;
                match auth {
                    Some(auth) => HttpTransport::with_auth(url, auth, timeout)? as Arc<dyn Transport>,
                    None => HttpTransport::new(url, timeout)? as Arc<dyn Transport>,
                }
            },
        };

        let mut client = Self {
            server_name: name.to_string(),
            transport,
            state: ConnectionState::Connected,
            server_info: None,
            tools: Vec::new(),
        };

        if let Err(e) = client.handshake().await {
            client.shutdown().await;
            return Err(e);
        }
        if let Err(e) = client.refresh_tools().await {
            client.shutdown().await;
            return Err(e);
        }
        Ok(client)
    }

    async fn handshake(&mut self) -> Result<()> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self.transport.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(response.into_result()?)
            .with_context(|| format!("invalid initialize result from '{}'", self.server_name))?;

        debug!(
            server = %self.server_name,
            protocol = %result.protocol_version,
            "handshake complete"
        );

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.server_info = Some(result);
        self.state = ConnectionState::Ready;
        Ok(())
    }

    /// Re-query `tools/list` and update the cached tool list.
    pub async fn refresh_tools(&mut self) -> Result<&[ToolDef]> {
        let response = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult = serde_json::from_value(response.into_result()?)
            .with_context(|| format!("invalid tools/list result from '{}'", self.server_name))?;
        self.tools = result.tools;
        Ok(&self.tools)
    }

    /// Tool list captured at connect or the last refresh.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Invoke a tool by its server-local name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        if self.state != ConnectionState::Ready {
            return Err(Error::message(format!(
                "server '{}' is not ready",
                self.server_name
            )));
        }

        let params = serde_json::to_value(ToolsCallParams {
            name: name.to_string(),
            arguments,
        })?;
        let response = self.transport.request("tools/call", Some(params)).await?;
        let result: ToolCallResult = serde_json::from_value(response.into_result()?)
            .with_context(|| format!("invalid tools/call result from '{}'", self.server_name))?;
        Ok(result)
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()?.server_info.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn is_alive(&self) -> bool {
        self.state == ConnectionState::Ready && self.transport.is_alive().await
    }

    /// Close the transport. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.transport.close().await;
        debug!(server = %self.server_name, "client shut down");
    }
}
