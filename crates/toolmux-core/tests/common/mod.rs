//! Shared fixtures: a scripted model and in-process providers that record
//! every call into one shared event log.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use toolmux_core::{
    ContentBlock, InProcessLauncher, McpHandler, McpTool, Message, ModelBackend, ModelError,
    ModelRequest, ModelResponse, StopReason, TokenUsage,
};

/// Ordered record of model calls and tool calls across all fixtures
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// What the engine sent on one model call
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub descriptions: Vec<String>,
}

/// Replays canned responses in order; fails once the script runs out
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    seen: Mutex<Vec<SeenRequest>>,
    log: EventLog,
}

impl ScriptedBackend {
    pub fn new(log: EventLog, script: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Answers every call with the same response
    pub fn repeating(log: EventLog, response: ModelResponse, times: usize) -> Self {
        Self::new(log, (0..times).map(|_| Ok(response.clone())).collect())
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn send(&self, request: &ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.log.push("model");
        self.seen.lock().push(SeenRequest {
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            descriptions: request.tools.iter().map(|t| t.description.clone()).collect(),
        });
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::unknown("script exhausted")))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

pub fn end_turn(text: &str) -> ModelResponse {
    ModelResponse {
        stop_reason: StopReason::EndTurn,
        content: vec![ContentBlock::text(text)],
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

/// A `tool_use` response requesting each `(id, name, input)` in order
pub fn tool_use(calls: &[(&str, &str, Value)]) -> ModelResponse {
    ModelResponse {
        stop_reason: StopReason::ToolUse,
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::tool_use(*id, *name, input.clone()))
            .collect(),
        usage: TokenUsage {
            input_tokens: 20,
            output_tokens: 8,
        },
    }
}

pub fn stopped(reason: &str) -> ModelResponse {
    ModelResponse {
        stop_reason: StopReason::from(reason),
        content: vec![ContentBlock::text("partial")],
        usage: TokenUsage::default(),
    }
}

/// In-process provider with fixed tools. Calls log `"<provider>:<tool>"`;
/// a tool named `broken` always fails.
pub struct FakeProvider {
    name: String,
    tools: Vec<McpTool>,
    log: EventLog,
}

impl FakeProvider {
    pub fn new(name: &str, tools: &[&str], log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|tool| {
                    McpTool::new(*tool)
                        .with_description(format!("{} from {}", tool, name))
                        .with_schema(json!({
                            "type": "object",
                            "properties": {"q": {"type": "string"}}
                        }))
                })
                .collect(),
            log,
        }
    }

    /// Tool without a description
    pub fn with_bare_tool(mut self, tool: &str) -> Self {
        self.tools.push(McpTool::new(tool));
        self
    }
}

#[async_trait]
impl McpHandler for FakeProvider {
    async fn list_tools(&self) -> Vec<McpTool> {
        self.tools.clone()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String> {
        self.log.push(format!("{}:{}", self.name, name));
        if name == "broken" {
            return Err("something went wrong".to_string());
        }
        Ok(Value::String(format!("{}.{} -> {}", self.name, name, arguments)))
    }
}

/// Launcher serving `alpha` (search) and `beta` (book)
pub fn alpha_beta(log: &EventLog) -> InProcessLauncher {
    InProcessLauncher::new()
        .with_handler("alpha", FakeProvider::new("alpha", &["search", "broken"], log.clone()))
        .with_handler(
            "beta",
            FakeProvider::new("beta", &["book"], log.clone()).with_bare_tool("cancel"),
        )
}

/// The tool result blocks of a user message, as `(tool_use_id, content, is_error)`
pub fn tool_results(message: &Message) -> Vec<(String, String, bool)> {
    match &message.content {
        toolmux_core::MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                    Some((tool_use_id.clone(), content.clone(), *is_error))
                }
                _ => None,
            })
            .collect(),
        toolmux_core::MessageContent::Text(_) => Vec::new(),
    }
}
