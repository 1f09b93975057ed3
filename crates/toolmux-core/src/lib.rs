//! Toolmux Core - tool-session multiplexer and bounded conversation loop
//!
//! This crate provides:
//! - Sessions to MCP tool providers and a registry that multiplexes them
//! - A flat `provider__tool` namespace over every connected provider
//! - A conversation engine that alternates model turns and tool calls
//! - Model backends, audit sinks and configuration

pub mod agent;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod namespace;
pub mod registry;
pub mod session;

pub use agent::{Agent, ConnectReport};
pub use audit::{AuditSink, JsonlAudit, NoopAudit};
pub use config::{AgentConfig, AuditConfig, Config, ConfigManager, ModelConfig, ProviderConfig};
pub use engine::{ConversationEngine, FALLBACK_MESSAGE, NO_DESCRIPTION};
pub use error::{
    ConnectionError, Error, InvocationError, ModelError, ModelErrorKind, Result, RoutingError,
    ToolError,
};
pub use model::{
    AnthropicBackend, ContentBlock, Message, MessageContent, ModelBackend, ModelParams,
    ModelRequest, ModelResponse, Role, StopReason, TokenUsage, ToolSpec,
};
pub use namespace::{NamespacedToolName, SEPARATOR, is_model_tool_name};
pub use registry::{ProviderStatus, SessionRegistry};
pub use session::{
    InProcessLauncher, ResourceDescriptor, SessionState, StdioLauncher, ToolDescriptor, ToolSession,
    TransportLauncher,
};

// Re-exported so embedders can implement in-process providers
pub use toolmux_mcp::{McpHandler, McpResource, McpTool, ResourceContent, ServerInfo};
