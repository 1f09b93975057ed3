//! Conversation Engine - bounded tool-calling loop
//!
//! Each `chat` call alternates between asking the model for the next turn
//! and running the tools it requested, until the model ends its turn, stops
//! for some other reason, or the iteration budget runs out. Tool failures are
//! fed back to the model as error payloads; only model failures escape.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::audit::AuditSink;
use crate::config::{DEFAULT_MAX_ITERATIONS, DEFAULT_SYSTEM_PROMPT};
use crate::error::Result;
use crate::model::{
    ContentBlock, Message, ModelBackend, ModelParams, ModelRequest, StopReason, TokenUsage,
    ToolSpec,
};
use crate::namespace::is_model_tool_name;
use crate::registry::SessionRegistry;

/// Returned (and recorded) when the model keeps calling tools past the budget
pub const FALLBACK_MESSAGE: &str =
    "Maximum iterations reached. Please try rephrasing your request.";

/// Offered to the model for tools that did not describe themselves
pub const NO_DESCRIPTION: &str = "No description available";

pub struct ConversationEngine {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<SessionRegistry>,
    audit: Arc<dyn AuditSink>,
    params: ModelParams,
    system_prompt: String,
    max_iterations: usize,
    history: Vec<Message>,
    usage: TokenUsage,
}

impl ConversationEngine {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<SessionRegistry>,
        audit: Arc<dyn AuditSink>,
        params: ModelParams,
    ) -> Self {
        Self {
            backend,
            registry,
            audit,
            params,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            history: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Tokens used by every model call since the engine was created
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn clear_history(&mut self) {
        debug!(messages = self.history.len(), "Clearing conversation history");
        self.history.clear();
    }

    /// Run one user turn to completion.
    ///
    /// On a model failure the history is rolled back to where it was before
    /// this call, so the engine can be used again.
    pub async fn chat(&mut self, user_message: &str) -> Result<String> {
        let checkpoint = self.history.len();
        self.history.push(Message::user(user_message));

        let tools = self.tool_specs().await;
        debug!(tools = tools.len(), model = %self.backend.model_id(), "Starting chat turn");

        for iteration in 1..=self.max_iterations {
            let request = ModelRequest {
                system: &self.system_prompt,
                messages: &self.history,
                tools: &tools,
                params: &self.params,
            };
            self.audit.record_prompt(&request);

            let response = match self.backend.send(&request).await {
                Ok(response) => response,
                Err(e) => {
                    error!(iteration, kind = ?e.kind, "Model request failed: {}", e);
                    self.history.truncate(checkpoint);
                    return Err(e.into());
                }
            };
            self.audit.record_response(&response);
            self.usage += response.usage;

            match response.stop_reason {
                StopReason::EndTurn => {
                    let text = response.text();
                    // Empty assistant turns are rejected on replay
                    if text.is_empty() {
                        debug!(iteration, "Model ended its turn without text");
                    } else {
                        self.history.push(Message::assistant(text.clone()));
                    }
                    return Ok(text);
                }
                StopReason::ToolUse => {
                    let calls: Vec<(String, String, Value)> = response
                        .tool_uses()
                        .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                        .collect();
                    if calls.is_empty() {
                        warn!(iteration, "Model stopped for tool use without requesting a tool");
                        return Ok(self.finish_unexpected(&StopReason::ToolUse));
                    }

                    self.history.push(Message::assistant_blocks(response.content));

                    let mut results = Vec::with_capacity(calls.len());
                    for (id, name, input) in calls {
                        let (content, is_error) = self.execute_tool(&name, input).await;
                        results.push(ContentBlock::tool_result(id, content, is_error));
                    }
                    self.history.push(Message::user_blocks(results));
                }
                ref other => return Ok(self.finish_unexpected(other)),
            }
        }

        warn!(max_iterations = self.max_iterations, "Iteration budget exhausted");
        self.history.push(Message::assistant(FALLBACK_MESSAGE));
        Ok(FALLBACK_MESSAGE.to_string())
    }

    fn finish_unexpected(&mut self, reason: &StopReason) -> String {
        let text = format!("Unexpected stop reason: {}", reason);
        self.history.push(Message::assistant(text.clone()));
        text
    }

    /// Returns the result content and whether it reports an error
    async fn execute_tool(&self, name: &str, input: Value) -> (String, bool) {
        info!(tool = %name, "Executing tool");

        match self.registry.invoke(name, input.clone()).await {
            Ok(value) => {
                let content = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                self.audit.record_tool_execution(name, &input, &content, true);
                (content, false)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                let content = json!({ "error": e.to_string() }).to_string();
                self.audit.record_tool_execution(name, &input, &content, false);
                (content, true)
            }
        }
    }

    /// The cached catalog, minus tools whose names the model would reject
    async fn tool_specs(&self) -> Vec<ToolSpec> {
        self.registry
            .catalog()
            .await
            .into_iter()
            .filter_map(|tool| {
                let name = tool.namespaced_name();
                if !is_model_tool_name(&name) {
                    warn!(tool = %name, "Skipping tool with a name the model cannot call");
                    return None;
                }
                Some(ToolSpec {
                    name,
                    description: tool.description.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
                    input_schema: tool.input_schema,
                })
            })
            .collect()
    }
}
