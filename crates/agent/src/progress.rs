//! Watch-channel progress reporting for agent runs.
//!
//! Each publish replaces the previous snapshot; a consumer that falls
//! behind sees only the latest state, never a backlog of stale events.

use {
    serde::Serialize,
    serde_json::Value,
    tokio::sync::watch,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thinking,
    ToolCall,
    ToolResult,
    Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

/// One visible step in an agent run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub id: String,
    pub kind: StepKind,
    pub status: StepStatus,
    /// Unix timestamp (seconds) when the step was created.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl AgentStep {
    pub(crate) fn new(kind: StepKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: StepStatus::InProgress,
            timestamp: now(),
            text: None,
            tool_name: None,
            arguments: None,
        }
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Full state of a run at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub current_iteration: usize,
    pub max_iterations: usize,
    pub steps: Vec<AgentStep>,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    /// Serialized conversation, attached when the run finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Value>>,
}

impl ProgressSnapshot {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            current_iteration: 0,
            max_iterations,
            steps: Vec::new(),
            is_complete: false,
            final_content: None,
            history: None,
        }
    }
}

/// Publisher side of the progress channel.
pub struct ProgressChannel {
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressChannel {
    pub fn new(max_iterations: usize) -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::new(max_iterations));
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Replace the current snapshot. Succeeds with or without receivers.
    pub fn publish(&self, snapshot: &ProgressSnapshot) {
        self.tx.send_replace(snapshot.clone());
    }
}
