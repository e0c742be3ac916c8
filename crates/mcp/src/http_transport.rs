//! Streamable HTTP transport for remote tool servers.
//!
//! JSON-RPC requests go out as HTTP POST; responses arrive either as a
//! plain JSON body or as an SSE body (`text/event-stream`) whose first
//! complete `data:` payload carries the response. A server-assigned
//! `Mcp-Session-Id` is echoed on every subsequent request.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    reqwest::Client as HttpClient,
    secrecy::ExposeSecret,
    serde_json::Value,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Context, Error, Result},
    traits::{AuthProvider, Transport},
    types::{
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, TransportError,
    },
};

const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const ACCEPT_HEADER: &str = "application/json, text/event-stream";

pub struct HttpTransport {
    client: HttpClient,
    url: String,
    next_id: AtomicU64,
    auth: Option<Arc<dyn AuthProvider>>,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        Self::build(url, None, request_timeout)
    }

    pub fn with_auth(
        url: &str,
        auth: Arc<dyn AuthProvider>,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        Self::build(url, Some(auth), request_timeout)
    }

    fn build(
        url: &str,
        auth: Option<Arc<dyn AuthProvider>>,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            auth,
            session_id: RwLock::new(None),
        }))
    }

    async fn build_post(&self) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", ACCEPT_HEADER)
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);

        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(SESSION_ID_HEADER, session_id);
        }

        if let Some(auth) = &self.auth
            && let Some(token) = auth.access_token().await
        {
            req = req.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        req
    }

    async fn store_session_id(&self, response: &reqwest::Response) {
        let Some(raw) = response.headers().get(SESSION_ID_HEADER) else {
            return;
        };
        let Ok(session_id) = raw.to_str() else {
            return;
        };
        if session_id.trim().is_empty() {
            return;
        }

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(url = %self.url, session_id, "session id updated");
            *slot = Some(session_id.to_string());
        }
    }

    fn is_event_stream(response: &reqwest::Response) -> bool {
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| {
                ct.split(';')
                    .next()
                    .is_some_and(|base| base.trim() == "text/event-stream")
            })
            .unwrap_or(false)
    }

    /// Pull the first complete JSON-RPC payload out of an SSE body.
    fn parse_event_stream(body: &str, method: &str) -> Result<JsonRpcResponse> {
        let mut data = String::new();

        for line in body.lines() {
            let trimmed = line.trim_end();
            if let Some(rest) = trimmed.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
                continue;
            }

            if trimmed.is_empty() && !data.is_empty() {
                if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&data) {
                    return Ok(response);
                }
                data.clear();
            }
        }

        if !data.is_empty()
            && let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&data)
        {
            return Ok(response);
        }

        Err(Error::message(format!(
            "no JSON-RPC response in event stream for '{method}'"
        )))
    }

    fn www_authenticate(response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    /// POST the body. On 401, give the authenticator one chance to recover
    /// credentials and retry once.
    async fn send_with_auth_retry(
        &self,
        method: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response> {
        let response = self
            .build_post()
            .await
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST to '{}' for '{method}' failed", self.url))?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            self.store_session_id(&response).await;
            return Ok(response);
        }

        self.store_session_id(&response).await;
        let www_authenticate = Self::www_authenticate(&response);

        if let Some(auth) = &self.auth {
            info!(method, url = %self.url, "received 401, attempting token refresh");
            if auth.handle_unauthorized(www_authenticate.as_deref()).await {
                let retry = self
                    .build_post()
                    .await
                    .json(body)
                    .send()
                    .await
                    .with_context(|| format!("POST retry to '{}' for '{method}' failed", self.url))?;

                if retry.status() != reqwest::StatusCode::UNAUTHORIZED {
                    self.store_session_id(&retry).await;
                    return Ok(retry);
                }

                return Err(TransportError::Unauthorized {
                    www_authenticate: Self::www_authenticate(&retry),
                }
                .into());
            }
        }

        Err(TransportError::Unauthorized { www_authenticate }.into())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        debug!(method, id, url = %self.url, "client -> server");

        let response = self.send_with_auth_retry(method, &request).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http { status, body }.into());
        }

        if Self::is_event_stream(&response) {
            let body = response
                .text()
                .await
                .with_context(|| format!("failed to read event stream for '{method}'"))?;
            Self::parse_event_stream(&body, method)
        } else {
            response
                .json()
                .await
                .with_context(|| format!("failed to parse JSON-RPC response for '{method}'"))
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);

        let response = self.send_with_auth_retry(method, &notification).await?;
        if !response.status().is_success() {
            warn!(method, status = %response.status(), "notification returned non-success");
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let mut req = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(5))
            .header("Accept", ACCEPT_HEADER)
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);

        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(SESSION_ID_HEADER, session_id);
        }

        match req.send().await {
            Ok(response) => {
                self.store_session_id(&response).await;
                true
            },
            Err(_) => false,
        }
    }

    async fn close(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };

        let req = self
            .client
            .delete(&self.url)
            .timeout(Duration::from_secs(5))
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(SESSION_ID_HEADER, session_id);

        if let Err(e) = req.send().await {
            warn!(url = %self.url, error = %e, "failed to close HTTP session");
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use secrecy::Secret;

    use super::*;

    struct FixedTokenProvider;

    #[async_trait::async_trait]
    impl AuthProvider for FixedTokenProvider {
        async fn access_token(&self) -> Option<Secret<String>> {
            Some(Secret::new("test-token-123".into()))
        }

        async fn handle_unauthorized(&self, _: Option<&str>) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn request_parses_json_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        let response = transport.request("ping", None).await.unwrap();
        assert!(response.result.is_some());
    }

    #[tokio::test]
    async fn request_parses_event_stream_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n",
            )
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        let response = transport.request("initialize", None).await.unwrap();
        assert!(response.result.is_some());
    }

    #[tokio::test]
    async fn session_id_echoed_on_subsequent_requests() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-123")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_header("mcp-session-id", "session-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        transport.request("initialize", None).await.unwrap();
        transport.request("tools/list", None).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn bearer_token_injected_when_auth_present() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer test-token-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::with_auth(
            &server.url(),
            Arc::new(FixedTokenProvider),
            Duration::from_secs(5),
        )
        .unwrap();
        transport.request("ping", None).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_without_auth_surfaces_www_authenticate() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(401)
            .with_header("www-authenticate", r#"Bearer realm="test""#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = transport.request("ping", None).await.unwrap_err();
        match err {
            Error::Transport(TransportError::Unauthorized { www_authenticate }) => {
                assert!(www_authenticate.unwrap().contains("Bearer"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn refresh_failure_stops_after_single_retry() {
        struct RecoveringProvider {
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait::async_trait]
        impl AuthProvider for RecoveringProvider {
            async fn access_token(&self) -> Option<Secret<String>> {
                Some(Secret::new("stale".into()))
            }

            async fn handle_unauthorized(&self, _: Option<&str>) -> bool {
                self.calls.fetch_add(1, Ordering::SeqCst);
                true
            }
        }

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let provider = Arc::new(RecoveringProvider {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let transport = HttpTransport::with_auth(
            &server.url(),
            Arc::clone(&provider) as Arc<dyn AuthProvider>,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Unauthorized { .. })
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn close_sends_delete_with_session_id() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-to-close")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/")
            .match_header("mcp-session-id", "session-to-close")
            .with_status(204)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), Duration::from_secs(5)).unwrap();
        transport.request("initialize", None).await.unwrap();
        transport.close().await;
        transport.close().await;

        init.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn request_against_unreachable_host_fails() {
        let transport =
            HttpTransport::new("http://127.0.0.1:1/mcp", Duration::from_secs(1)).unwrap();
        assert!(transport.request("ping", None).await.is_err());
        assert!(!transport.is_alive().await);
    }
}
