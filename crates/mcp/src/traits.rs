//! Seams between the client, the transports, and the authenticator.

use {async_trait::async_trait, secrecy::Secret, serde_json::Value};

use crate::{error::Result, types::JsonRpcResponse};

/// A bidirectional JSON-RPC channel to one tool server.
///
/// Implementations own whatever resources the channel needs (a child
/// process, a TCP stream, an HTTP session) and release them on `close`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Whether the underlying channel is still usable.
    async fn is_alive(&self) -> bool;

    /// Tear down the channel. Must be safe to call more than once.
    async fn close(&self);
}

/// Supplies bearer tokens to the HTTP transport.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current access token, refreshed silently if needed. `None` when the
    /// server has no usable credentials.
    async fn access_token(&self) -> Option<Secret<String>>;

    /// Called after a 401 response. Returns `true` if credentials were
    /// recovered and the request is worth retrying once.
    async fn handle_unauthorized(&self, www_authenticate: Option<&str>) -> bool;
}
