//! Shared mock MCP server plumbing for tests.

use {mockito::Matcher, serde_json::json};

/// Install mocks turning a mockito server into a minimal MCP endpoint:
/// initialize handshake, `tools/list` advertising `tools`, and a
/// `tools/call` that always answers with `call_text`.
pub(crate) async fn mock_mcp_server(
    server: &mut mockito::ServerGuard,
    tools: serde_json::Value,
    call_text: &str,
) {
    mock_mcp_handshake(server, tools).await;
    mock_mcp_call_result(server, call_text, false).await;
}

/// Handshake and `tools/list` mocks only; pair with `mock_mcp_call_result`
/// when a test needs to control the `tools/call` answer.
pub(crate) async fn mock_mcp_handshake(
    server: &mut mockito::ServerGuard,
    tools: serde_json::Value,
) {
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "initialize"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock", "version": "1.0"}
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(
            json!({"method": "notifications/initialized"}),
        ))
        .with_status(202)
        .create_async()
        .await;

    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "tools/list"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": tools}
            })
            .to_string(),
        )
        .create_async()
        .await;
}

/// A `tools/call` mock answering every call with one text block.
pub(crate) async fn mock_mcp_call_result(
    server: &mut mockito::ServerGuard,
    call_text: &str,
    is_error: bool,
) {
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "tools/call"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "result": {
                    "content": [{"type": "text", "text": call_text}],
                    "isError": is_error
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
}
