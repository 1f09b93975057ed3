//! Application context tying the registry and the engine together
//!
//! Front ends build one [`Agent`] at startup and share it; the engine sits
//! behind an async mutex so turns of the conversation never interleave.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use toolmux_mcp::ServerInfo;

use crate::audit::AuditSink;
use crate::config::Config;
use crate::engine::ConversationEngine;
use crate::error::{ConnectionError, Result, ToolError};
use crate::model::{Message, ModelBackend, TokenUsage};
use crate::registry::{ProviderStatus, SessionRegistry};
use crate::session::{ResourceDescriptor, ToolDescriptor, TransportLauncher};

/// Outcome of connecting one provider at startup
pub type ConnectReport = Vec<(String, std::result::Result<ServerInfo, ConnectionError>)>;

pub struct Agent {
    registry: Arc<SessionRegistry>,
    engine: Mutex<ConversationEngine>,
    audit: Arc<dyn AuditSink>,
    startup: ConnectReport,
}

impl Agent {
    /// Connect every configured provider and build the engine.
    ///
    /// Providers that fail to connect are reported, not fatal.
    pub async fn start(
        config: &Config,
        backend: Arc<dyn ModelBackend>,
        audit: Arc<dyn AuditSink>,
        launcher: Arc<dyn TransportLauncher>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(launcher));

        let startup = registry.connect_all(&config.providers).await;
        for (name, outcome) in &startup {
            match outcome {
                Ok(server) => info!(provider = %name, server = %server.name, "Provider ready"),
                Err(e) => warn!(provider = %name, error = %e, "Provider unavailable"),
            }
        }

        let tools = registry.refresh_catalog().await;
        info!(
            providers = registry.provider_names().await.len(),
            tools = tools.len(),
            "Tool catalog loaded"
        );

        let engine =
            ConversationEngine::new(backend, registry.clone(), audit.clone(), config.model.params())
                .with_system_prompt(config.agent.system_prompt.clone())
                .with_max_iterations(config.agent.max_iterations);

        Self {
            registry,
            engine: Mutex::new(engine),
            audit,
            startup,
        }
    }

    /// Per-provider connection results from `start`, in config order
    pub fn startup_report(&self) -> &ConnectReport {
        &self.startup
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn chat(&self, message: &str) -> Result<String> {
        self.engine.lock().await.chat(message).await
    }

    /// Start a new conversation with `message`, atomically with respect to
    /// other callers
    pub async fn chat_fresh(&self, message: &str) -> Result<String> {
        let mut engine = self.engine.lock().await;
        engine.clear_history();
        engine.chat(message).await
    }

    pub async fn clear_history(&self) {
        self.engine.lock().await.clear_history();
    }

    pub async fn history(&self) -> Vec<Message> {
        self.engine.lock().await.history().to_vec()
    }

    pub async fn usage(&self) -> TokenUsage {
        self.engine.lock().await.usage()
    }

    /// Cached tool catalog
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry.catalog().await
    }

    /// Re-list tools on every provider
    pub async fn refresh_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.refresh_catalog().await
    }

    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.registry.resources().await
    }

    pub async fn read_resource(
        &self,
        provider: &str,
        uri: &str,
    ) -> std::result::Result<Value, ToolError> {
        self.registry.read_resource(provider, uri).await
    }

    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        self.registry.statuses().await
    }

    /// Disconnect every provider and flush the audit log
    pub async fn shutdown(&self) -> Vec<(String, ConnectionError)> {
        let failures = self.registry.disconnect_all().await;
        self.audit.flush().await;
        info!(failures = failures.len(), "Agent shut down");
        failures
    }
}
