use serde::{Deserialize, Serialize};

/// Top-level configuration read from `switchboard.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub tools: ToolsConfig,
    pub agent: AgentConfig,
}

/// Settings for tool-server integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Master switch for tool-server connections.
    pub enabled: bool,
    /// Byte cap applied to a tool result before it re-enters model context.
    pub max_tool_result_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tool_result_bytes: default_max_tool_result_bytes(),
        }
    }
}

/// Settings for the agent iteration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Whether agent mode (the think/act loop) is available at all.
    pub enabled: bool,
    /// Upper bound on think/act cycles per request.
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_tool_result_bytes() -> usize {
    64 * 1024
}

fn default_max_iterations() -> usize {
    10
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_enabled() {
        let cfg = SwitchboardConfig::default();
        assert!(cfg.tools.enabled);
        assert!(cfg.agent.enabled);
        assert_eq!(cfg.agent.max_iterations, 10);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: SwitchboardConfig = toml::from_str("[agent]\nmax_iterations = 3\n").unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert!(cfg.tools.enabled);
        assert_eq!(cfg.tools.max_tool_result_bytes, 64 * 1024);
    }

    #[test]
    fn roundtrip_toml() {
        let cfg = SwitchboardConfig::default();
        let raw = toml::to_string_pretty(&cfg).unwrap();
        let parsed: SwitchboardConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.agent.max_iterations, cfg.agent.max_iterations);
    }
}
