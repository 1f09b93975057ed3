//! MCP Server implementation
//!
//! Dispatches JSON-RPC requests to an [`McpHandler`]. Paired with
//! [`LocalTransport`](crate::transport::LocalTransport) it runs a provider
//! inside the current process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, methods};
use crate::{
    McpResource, McpTool, PROTOCOL_VERSION, ResourcesCapability, ServerCapabilities,
    ToolsCapability,
};

/// Handler for MCP requests
#[async_trait]
pub trait McpHandler: Send + Sync {
    /// List available tools
    async fn list_tools(&self) -> Vec<McpTool>;

    /// Call a tool; `Err` is reported to the client as a tool result with `isError`
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String>;

    /// List available resources
    async fn list_resources(&self) -> Vec<McpResource> {
        Vec::new()
    }

    /// Read a resource
    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, String> {
        Err(format!("Resource not found: {}", uri))
    }
}

/// Resource content
#[derive(Debug, Clone)]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: Option<String>,
    pub text: String,
}

/// MCP Server
pub struct McpServer<H: McpHandler> {
    handler: Arc<H>,
    capabilities: ServerCapabilities,
    server_name: String,
    server_version: String,
}

impl<H: McpHandler> McpServer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                resources: Some(ResourcesCapability {
                    subscribe: false,
                    list_changed: false,
                }),
            },
            server_name: "toolmux-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Handle one raw message; notifications and garbage produce no reply
    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        if message.get("id").is_none() {
            return None;
        }
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed JSON-RPC request");
                return None;
            }
        };
        let response = self.handle_request(request).await;
        serde_json::to_value(response).ok()
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request.id),
            methods::TOOLS_LIST => self.handle_tools_list(request.id).await,
            methods::TOOLS_CALL => self.handle_tools_call(request.id, request.params).await,
            methods::RESOURCES_LIST => self.handle_resources_list(request.id).await,
            methods::RESOURCES_READ => self.handle_resources_read(request.id, request.params).await,
            _ => JsonRpcResponse::error(request.id, JsonRpcError::method_not_found()),
        }
    }

    fn handle_initialize(&self, id: RequestId) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": self.capabilities,
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version
            }
        });

        JsonRpcResponse::success(id, result)
    }

    async fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let tools = self.handler.list_tools().await;
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
            return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing tool name"));
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let (text, is_error) = match self.handler.call_tool(name, arguments).await {
            Ok(Value::String(text)) => (text, false),
            Ok(value) => (value.to_string(), false),
            Err(message) => (message, true),
        };

        JsonRpcResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error
            }),
        )
    }

    async fn handle_resources_list(&self, id: RequestId) -> JsonRpcResponse {
        let resources = self.handler.list_resources().await;
        JsonRpcResponse::success(id, json!({ "resources": resources }))
    }

    async fn handle_resources_read(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let Some(uri) = params.as_ref().and_then(|p| p.get("uri")).and_then(|u| u.as_str()) else {
            return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing resource uri"));
        };

        match self.handler.read_resource(uri).await {
            Ok(content) => JsonRpcResponse::success(
                id,
                json!({
                    "contents": [{
                        "uri": content.uri,
                        "mimeType": content.mime_type,
                        "text": content.text
                    }]
                }),
            ),
            Err(message) => JsonRpcResponse::error(id, JsonRpcError::internal_error(message)),
        }
    }
}
