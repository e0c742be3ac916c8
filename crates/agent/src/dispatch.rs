//! Bridge between the agent loop and the tool router.

use {async_trait::async_trait, serde_json::Value};

use switchboard_mcp::{ToolCallRequest, ToolRouter};

/// A tool as offered to the model.
#[derive(Debug, Clone)]
pub struct DispatchableTool {
    /// Qualified `server:tool` name.
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
}

/// Flattened outcome of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

/// What the engine needs from a tool backend. Implemented for the MCP
/// router; tests substitute scripted fakes.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn list_tools(&self) -> Vec<DispatchableTool>;

    /// Execute a tool by qualified name. Never fails; failures come back
    /// flagged in the outcome.
    async fn dispatch(&self, name: &str, arguments: Value) -> ToolOutcome;
}

#[async_trait]
impl ToolDispatcher for ToolRouter {
    async fn list_tools(&self) -> Vec<DispatchableTool> {
        self.aggregate_tools()
            .await
            .into_iter()
            .map(|tool| DispatchableTool {
                name: tool.qualified_name,
                description: tool.description,
                parameters: tool.input_schema,
            })
            .collect()
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> ToolOutcome {
        let result = self
            .execute_tool_call(ToolCallRequest {
                name: name.to_string(),
                arguments,
            })
            .await;
        ToolOutcome {
            content: result.text(),
            is_error: result.is_error,
        }
    }
}

/// Render tool schemas the way chat-completion APIs expect them.
pub fn tool_schemas(tools: &[DispatchableTool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description.as_deref().unwrap_or_default(),
                    "parameters": tool
                        .parameters
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                }
            })
        })
        .collect()
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_fill_in_missing_parameters() {
        let tools = vec![DispatchableTool {
            name: "files:read_file".into(),
            description: None,
            parameters: None,
        }];
        let schemas = tool_schemas(&tools);
        assert_eq!(schemas[0]["function"]["name"], "files:read_file");
        assert_eq!(schemas[0]["function"]["parameters"]["type"], "object");
    }
}
