//! The bounded think/act loop.

use std::sync::Arc;

use {
    serde_json::Value,
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use switchboard_config::SwitchboardConfig;

use crate::{
    dispatch::{ToolDispatcher, tool_schemas},
    error::{Error, Result},
    model::{ChatMessage, ModelClient},
    progress::{AgentStep, ProgressChannel, ProgressSnapshot, StepKind, StepStatus},
};

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Hard cap on think/act iterations per run.
    pub max_iterations: usize,
    /// Byte cap applied to each tool result before it enters the
    /// conversation.
    pub max_tool_result_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tool_result_bytes: 65536,
        }
    }
}

impl From<&SwitchboardConfig> for EngineConfig {
    fn from(config: &SwitchboardConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations,
            max_tool_result_bytes: config.tools.max_tool_result_bytes,
        }
    }
}

/// How one run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_content: Option<String>,
    /// Iterations actually executed.
    pub iterations: usize,
    pub tool_calls: usize,
    pub cancelled: bool,
    /// True when the iteration budget forced completion.
    pub truncated: bool,
}

/// Drives the conversation: ask the model, execute any tool calls it
/// requests, feed the results back, repeat until it answers in plain
/// text or the budget runs out.
pub struct AgentEngine {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolDispatcher>,
    config: EngineConfig,
    progress: ProgressChannel,
    cancel: CancellationToken,
}

impl AgentEngine {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolDispatcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            model,
            tools,
            progress: ProgressChannel::new(config.max_iterations),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// Token that aborts the run at the next step boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the loop over the given conversation. The caller supplies any
    /// system prompt and the user message as the initial messages.
    pub async fn run(&self, mut messages: Vec<ChatMessage>) -> Result<RunOutcome> {
        if self.config.max_iterations == 0 {
            return Err(Error::message("max_iterations must be at least 1"));
        }

        let schemas = tool_schemas(&self.tools.list_tools().await);
        let mut snapshot = ProgressSnapshot::new(self.config.max_iterations);
        let mut tool_calls_made = 0;
        let mut last_text: Option<String> = None;

        info!(
            model = %self.model.name(),
            tools = schemas.len(),
            max_iterations = self.config.max_iterations,
            "agent run started"
        );

        for iteration in 1..=self.config.max_iterations {
            snapshot.current_iteration = iteration;

            if self.cancel.is_cancelled() {
                return Ok(self.finish_cancelled(&mut snapshot, iteration - 1, tool_calls_made));
            }

            let thinking_id = push_step(&mut snapshot, StepKind::Thinking);
            self.progress.publish(&snapshot);

            let response = match self.model.complete(&messages, &schemas).await {
                Ok(response) => response,
                Err(e) => {
                    fail_step(&mut snapshot, &thinking_id, e.to_string());
                    snapshot.is_complete = true;
                    self.progress.publish(&snapshot);
                    return Err(Error::Model(e.to_string()));
                },
            };

            complete_step(&mut snapshot, &thinking_id, response.text.clone());
            if response.text.is_some() {
                last_text = response.text.clone();
            }

            if response.tool_calls.is_empty() {
                messages.push(ChatMessage::Assistant {
                    content: response.text.clone(),
                    tool_calls: Vec::new(),
                });
                let id = push_step(&mut snapshot, StepKind::Completion);
                complete_step(&mut snapshot, &id, response.text.clone());
                snapshot.final_content = response.text.clone();
                snapshot.is_complete = true;
                snapshot.history = Some(messages.iter().map(ChatMessage::to_value).collect());
                self.progress.publish(&snapshot);
                info!(iterations = iteration, tool_calls = tool_calls_made, "agent run complete");
                return Ok(RunOutcome {
                    final_content: response.text,
                    iterations: iteration,
                    tool_calls: tool_calls_made,
                    cancelled: false,
                    truncated: false,
                });
            }

            messages.push(ChatMessage::Assistant {
                content: response.text.clone(),
                tool_calls: response.tool_calls.clone(),
            });

            // Queue every requested call before executing any, so consumers
            // see the whole batch up front.
            let mut call_ids = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let call_id = push_step(&mut snapshot, StepKind::ToolCall);
                if let Some(step) = snapshot.steps.iter_mut().find(|s| s.id == call_id) {
                    step.status = StepStatus::Pending;
                    step.tool_name = Some(call.name.clone());
                    step.arguments = Some(call.arguments.clone());
                }
                call_ids.push(call_id);
            }
            self.progress.publish(&snapshot);

            for (call, call_id) in response.tool_calls.iter().zip(call_ids) {
                if self.cancel.is_cancelled() {
                    return Ok(self.finish_cancelled(&mut snapshot, iteration, tool_calls_made));
                }

                if let Some(step) = snapshot.steps.iter_mut().find(|s| s.id == call_id) {
                    step.status = StepStatus::InProgress;
                }
                self.progress.publish(&snapshot);

                debug!(tool = %call.name, "executing tool call");
                let outcome = self.tools.dispatch(&call.name, call.arguments.clone()).await;

                // A cancel that arrived mid-call discards the result.
                if self.cancel.is_cancelled() {
                    return Ok(self.finish_cancelled(&mut snapshot, iteration, tool_calls_made));
                }

                complete_step(&mut snapshot, &call_id, None);
                tool_calls_made += 1;

                let content =
                    truncate_result(&outcome.content, self.config.max_tool_result_bytes);
                let result_id = push_step(&mut snapshot, StepKind::ToolResult);
                if let Some(step) = snapshot.steps.iter_mut().find(|s| s.id == result_id) {
                    step.tool_name = Some(call.name.clone());
                    step.text = Some(content.clone());
                    step.status = if outcome.is_error {
                        StepStatus::Error
                    } else {
                        StepStatus::Completed
                    };
                }
                if outcome.is_error {
                    warn!(tool = %call.name, "tool returned an error result");
                }

                messages.push(ChatMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content,
                });
                self.progress.publish(&snapshot);
            }
        }

        // Budget exhausted with tool calls still flowing.
        let final_content = last_text.unwrap_or_else(|| {
            format!(
                "Reached the maximum of {} iterations before producing a final answer.",
                self.config.max_iterations
            )
        });
        let id = push_step(&mut snapshot, StepKind::Completion);
        complete_step(&mut snapshot, &id, Some(final_content.clone()));
        snapshot.final_content = Some(final_content.clone());
        snapshot.is_complete = true;
        snapshot.history = Some(messages.iter().map(ChatMessage::to_value).collect());
        self.progress.publish(&snapshot);
        info!(
            iterations = self.config.max_iterations,
            tool_calls = tool_calls_made,
            "agent run hit iteration budget"
        );

        Ok(RunOutcome {
            final_content: Some(final_content),
            iterations: self.config.max_iterations,
            tool_calls: tool_calls_made,
            cancelled: false,
            truncated: true,
        })
    }

    /// Mark the run complete without fabricating an answer.
    fn finish_cancelled(
        &self,
        snapshot: &mut ProgressSnapshot,
        iterations: usize,
        tool_calls: usize,
    ) -> RunOutcome {
        info!(iterations, "agent run cancelled");
        snapshot.is_complete = true;
        self.progress.publish(snapshot);
        RunOutcome {
            final_content: None,
            iterations,
            tool_calls,
            cancelled: true,
            truncated: false,
        }
    }
}

fn push_step(snapshot: &mut ProgressSnapshot, kind: StepKind) -> String {
    let step = AgentStep::new(kind);
    let id = step.id.clone();
    snapshot.steps.push(step);
    id
}

fn complete_step(snapshot: &mut ProgressSnapshot, id: &str, text: Option<String>) {
    if let Some(step) = snapshot.steps.iter_mut().find(|s| s.id == id) {
        step.status = StepStatus::Completed;
        if text.is_some() {
            step.text = text;
        }
    }
}

fn fail_step(snapshot: &mut ProgressSnapshot, id: &str, message: String) {
    if let Some(step) = snapshot.steps.iter_mut().find(|s| s.id == id) {
        step.status = StepStatus::Error;
        step.text = Some(message);
    }
}

/// Cut a tool result at a character boundary at or below `max_bytes`,
/// appending a marker when anything was dropped.
fn truncate_result(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[output truncated]", &content[..cut])
}
