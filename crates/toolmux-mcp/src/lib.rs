//! Toolmux MCP - Model Context Protocol implementation
//!
//! This crate speaks the MCP wire protocol (JSON-RPC 2.0 over
//! newline-delimited stdio) to tool-provider processes. It also ships an
//! in-process server and transport so providers can be embedded in the
//! same process.

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{ClientInfo, ContentItem, McpClient, McpError, ServerInfo, ToolCallResult};
pub use server::{McpHandler, McpServer, ResourceContent};
pub use transport::{LocalTransport, StdioTransport, Transport};

use serde::{Deserialize, Serialize};

/// MCP protocol version
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tool definition in MCP format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

impl McpTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: empty_object_schema(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Resource in MCP format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_without_description_deserializes() {
        let tool: McpTool = serde_json::from_value(serde_json::json!({
            "name": "search",
            "inputSchema": { "type": "object" }
        }))
        .unwrap();

        assert_eq!(tool.name, "search");
        assert!(tool.description.is_none());
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_tool_missing_schema_gets_empty_object() {
        let tool: McpTool = serde_json::from_value(serde_json::json!({ "name": "ping" })).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_resource_uses_camel_case_mime_type() {
        let resource = McpResource {
            uri: "file:///notes.txt".to_string(),
            name: "notes".to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
        };
        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["mimeType"], "text/plain");
        assert!(value.get("description").is_none());
    }

    #[test]
    fn test_capabilities_tolerate_missing_fields() {
        let caps: ServerCapabilities =
            serde_json::from_value(serde_json::json!({ "tools": {} })).unwrap();
        assert!(caps.tools.is_some());
        assert!(caps.resources.is_none());
    }
}
