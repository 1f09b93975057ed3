//! One connection to one tool provider
//!
//! A [`ToolSession`] owns the MCP client for a provider process, caches the
//! provider's tool list, and turns every provider-side failure into a typed
//! error so callers never see a panic or a dead transport.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use toolmux_mcp::{
    ClientInfo, LocalTransport, McpClient, McpError, McpHandler, McpResource, McpServer, McpTool,
    ServerInfo, StdioTransport, Transport,
};

use crate::config::ProviderConfig;
use crate::error::{ConnectionError, InvocationError};
use crate::namespace::NamespacedToolName;

/// Lifecycle of a provider connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// A tool as advertised by a provider at the last catalog refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub provider: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolDescriptor {
    fn from_mcp(provider: &str, tool: McpTool) -> Self {
        Self {
            provider: provider.to_string(),
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }

    /// The `provider__tool` name shown to the model
    pub fn namespaced_name(&self) -> String {
        NamespacedToolName::new(&self.provider, &self.name).to_string()
    }
}

/// A resource as advertised by a provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub provider: String,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

impl ResourceDescriptor {
    fn from_mcp(provider: &str, resource: McpResource) -> Self {
        Self {
            provider: provider.to_string(),
            uri: resource.uri,
            name: resource.name,
            description: resource.description,
            mime_type: resource.mime_type,
        }
    }
}

/// Opens the transport for a provider
#[async_trait]
pub trait TransportLauncher: Send + Sync {
    async fn launch(&self, config: &ProviderConfig) -> io::Result<Box<dyn Transport>>;
}

/// Spawns the provider command and speaks MCP over its stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioLauncher;

#[async_trait]
impl TransportLauncher for StdioLauncher {
    async fn launch(&self, config: &ProviderConfig) -> io::Result<Box<dyn Transport>> {
        let transport = StdioTransport::spawn(&config.command, &config.args, &config.env).await?;
        debug!(provider = %config.name, pid = ?transport.pid(), "Spawned provider process");
        Ok(Box::new(transport))
    }
}

type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Serves providers from handlers running inside this process.
///
/// Providers are looked up by configured name; the command is ignored.
#[derive(Default, Clone)]
pub struct InProcessLauncher {
    factories: HashMap<String, TransportFactory>,
}

impl InProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as the provider called `name`
    pub fn with_handler<H: McpHandler + 'static>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Self {
        let name = name.into();
        let server = Arc::new(McpServer::new(Arc::new(handler)).with_name(name.clone()));
        self.factories.insert(
            name,
            Arc::new(move || Box::new(LocalTransport::new(server.clone())) as Box<dyn Transport>),
        );
        self
    }
}

#[async_trait]
impl TransportLauncher for InProcessLauncher {
    async fn launch(&self, config: &ProviderConfig) -> io::Result<Box<dyn Transport>> {
        let factory = self.factories.get(&config.name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No in-process provider named '{}'", config.name),
            )
        })?;
        Ok(factory())
    }
}

struct Connection {
    client: McpClient<Box<dyn Transport>>,
    server: ServerInfo,
}

/// Connection to a single provider
pub struct ToolSession {
    config: ProviderConfig,
    state: RwLock<SessionState>,
    tools: RwLock<Vec<ToolDescriptor>>,
    /// Held for the whole of every request, connect and teardown
    connection: Mutex<Option<Connection>>,
}

impl ToolSession {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            state: RwLock::new(SessionState::Disconnected),
            tools: RwLock::new(Vec::new()),
            connection: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Tools from the last successful listing
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().clone()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Launch the provider, run the handshake and load its tools.
    ///
    /// Connecting an already connected session returns the existing server info.
    pub async fn connect(
        &self,
        launcher: &dyn TransportLauncher,
    ) -> Result<ServerInfo, ConnectionError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.server.clone());
        }

        *self.state.write() = SessionState::Connecting;
        info!(provider = %self.name(), command = %self.config.command, "Connecting to provider");

        let transport = match launcher.launch(&self.config).await {
            Ok(transport) => transport,
            Err(e) => {
                *self.state.write() = SessionState::Disconnected;
                return Err(ConnectionError::Launch {
                    name: self.name().to_string(),
                    message: e.to_string(),
                });
            }
        };

        let mut client = McpClient::new(transport);
        let client_info = ClientInfo::new("toolmux", env!("CARGO_PKG_VERSION"));
        let initialize = client.initialize(client_info);
        let handshake = match tokio::time::timeout(self.timeout(), initialize).await {
            Ok(Ok(server)) => Ok(server),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no response within {} seconds", self.config.timeout_secs)),
        };

        let server = match handshake {
            Ok(server) => server,
            Err(message) => {
                if let Err(e) = client.close().await {
                    debug!(provider = %self.name(), error = %e, "Error closing failed transport");
                }
                *self.state.write() = SessionState::Disconnected;
                return Err(ConnectionError::Handshake {
                    name: self.name().to_string(),
                    message,
                });
            }
        };

        let conn = Connection { client, server };
        let tools = self.fetch_tools(&conn).await;
        info!(
            provider = %self.name(),
            server = %conn.server.name,
            version = %conn.server.version,
            tools = tools.len(),
            "Provider connected"
        );
        let server = conn.server.clone();
        *self.tools.write() = tools;
        *guard = Some(conn);
        *self.state.write() = SessionState::Connected;

        Ok(server)
    }

    /// Re-list the provider's tools; failures log and yield an empty list
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let guard = self.connection.lock().await;
        let tools = match guard.as_ref() {
            Some(conn) => self.fetch_tools(conn).await,
            None => Vec::new(),
        };
        *self.tools.write() = tools.clone();
        tools
    }

    async fn fetch_tools(&self, conn: &Connection) -> Vec<ToolDescriptor> {
        match tokio::time::timeout(self.timeout(), conn.client.list_tools()).await {
            Ok(Ok(tools)) => {
                // Namespaced names must stay unique; the first listing wins
                let mut seen = HashSet::new();
                tools
                    .into_iter()
                    .filter(|tool| {
                        let fresh = seen.insert(tool.name.clone());
                        if !fresh {
                            warn!(
                                provider = %self.name(),
                                tool = %tool.name,
                                "Dropping duplicate tool"
                            );
                        }
                        fresh
                    })
                    .map(|tool| ToolDescriptor::from_mcp(self.name(), tool))
                    .collect()
            }
            Ok(Err(e)) => {
                warn!(provider = %self.name(), error = %e, "Failed to list tools");
                Vec::new()
            }
            Err(_) => {
                warn!(provider = %self.name(), "Timed out listing tools");
                Vec::new()
            }
        }
    }

    /// List the provider's resources; failures log and yield an empty list
    pub async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        let guard = self.connection.lock().await;
        let Some(conn) = guard.as_ref() else {
            return Vec::new();
        };

        // Skip the round trip when the server said it has no resources
        if conn
            .client
            .server_capabilities()
            .is_some_and(|caps| caps.resources.is_none())
        {
            return Vec::new();
        }

        match tokio::time::timeout(self.timeout(), conn.client.list_resources()).await {
            Ok(Ok(resources)) => resources
                .into_iter()
                .map(|resource| ResourceDescriptor::from_mcp(self.name(), resource))
                .collect(),
            Ok(Err(e)) => {
                warn!(provider = %self.name(), error = %e, "Failed to list resources");
                Vec::new()
            }
            Err(_) => {
                warn!(provider = %self.name(), "Timed out listing resources");
                Vec::new()
            }
        }
    }

    /// Call `tool` (the provider's own name, not namespaced) with `args`.
    ///
    /// Text content is joined with newlines into a string value; a result
    /// without text is returned as the raw result object.
    pub async fn invoke(&self, tool: &str, args: Value) -> Result<Value, InvocationError> {
        let guard = self.connection.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| InvocationError::NotConnected(self.name().to_string()))?;

        debug!(provider = %self.name(), tool = %tool, "Calling tool");
        let result = tokio::time::timeout(self.timeout(), conn.client.call_tool(tool, args))
            .await
            .map_err(|_| InvocationError::Timeout {
                tool: tool.to_string(),
                secs: self.config.timeout_secs,
            })?
            .map_err(|e| invocation_error(tool, e))?;

        if result.is_error {
            return Err(InvocationError::Tool {
                tool: tool.to_string(),
                message: result.text().unwrap_or_else(|| "Tool returned an error".to_string()),
            });
        }

        match result.text() {
            Some(text) => Ok(Value::String(text)),
            None => serde_json::to_value(&result).map_err(|e| InvocationError::Protocol {
                tool: tool.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Read one resource; returns the provider's `contents` payload
    pub async fn read_resource(&self, uri: &str) -> Result<Value, InvocationError> {
        let guard = self.connection.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| InvocationError::NotConnected(self.name().to_string()))?;

        tokio::time::timeout(self.timeout(), conn.client.read_resource(uri))
            .await
            .map_err(|_| InvocationError::Timeout {
                tool: uri.to_string(),
                secs: self.config.timeout_secs,
            })?
            .map_err(|e| invocation_error(uri, e))
    }

    /// Close the connection. The session ends up disconnected with no tools
    /// even when closing the transport fails.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let mut guard = self.connection.lock().await;
        let conn = guard.take();
        *self.state.write() = SessionState::Disconnected;
        self.tools.write().clear();

        let Some(conn) = conn else {
            return Ok(());
        };

        info!(provider = %self.name(), "Disconnecting provider");
        conn.client.close().await.map_err(|e| ConnectionError::Shutdown {
            name: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

fn invocation_error(tool: &str, error: McpError) -> InvocationError {
    let tool = tool.to_string();
    match error {
        McpError::Transport(message) => InvocationError::Transport { tool, message },
        McpError::Protocol(message) => InvocationError::Protocol { tool, message },
        McpError::Server(message) => InvocationError::Server { tool, message },
    }
}
