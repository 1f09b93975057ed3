//! Registry of provider sessions
//!
//! Owns every [`ToolSession`], exposes their tools as one flat namespaced
//! catalog, and routes `provider__tool` calls to the right session.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use toolmux_mcp::ServerInfo;

use crate::config::ProviderConfig;
use crate::error::{ConnectionError, RoutingError, ToolError};
use crate::namespace::{NamespacedToolName, validate_provider_name};
use crate::session::{
    ResourceDescriptor, SessionState, ToolDescriptor, ToolSession, TransportLauncher,
};

/// Summary of one registered provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub state: SessionState,
    pub tool_count: usize,
}

pub struct SessionRegistry {
    launcher: Arc<dyn TransportLauncher>,
    /// Registration order is catalog order
    sessions: RwLock<Vec<Arc<ToolSession>>>,
}

impl SessionRegistry {
    pub fn new(launcher: Arc<dyn TransportLauncher>) -> Self {
        Self {
            launcher,
            sessions: RwLock::new(Vec::new()),
        }
    }

    /// Connect every enabled provider concurrently.
    ///
    /// Returns one entry per enabled config, in config order. Successful
    /// sessions are registered in the same order.
    pub async fn connect_all(
        &self,
        configs: &[ProviderConfig],
    ) -> Vec<(String, Result<ServerInfo, ConnectionError>)> {
        let registered: HashSet<String> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect();

        let mut seen = HashSet::new();
        let mut results: Vec<(String, Option<Result<ServerInfo, ConnectionError>>)> = Vec::new();
        let mut pending = Vec::new();

        for config in configs {
            if !config.enabled {
                debug!(provider = %config.name, "Skipping disabled provider");
                continue;
            }

            let rejected = if let Err(e) = validate_provider_name(&config.name) {
                Some(e)
            } else if registered.contains(&config.name) || !seen.insert(config.name.clone()) {
                Some(ConnectionError::AlreadyRegistered(config.name.clone()))
            } else {
                None
            };

            match rejected {
                Some(e) => results.push((config.name.clone(), Some(Err(e)))),
                None => {
                    pending.push((results.len(), Arc::new(ToolSession::new(config.clone()))));
                    results.push((config.name.clone(), None));
                }
            }
        }

        let launcher = self.launcher.as_ref();
        let outcomes = join_all(
            pending
                .iter()
                .map(|(_, session)| async move { session.connect(launcher).await }),
        )
        .await;

        let mut sessions = self.sessions.write().await;
        for ((slot, session), outcome) in pending.into_iter().zip(outcomes) {
            let outcome = match outcome {
                Ok(info) if sessions.iter().any(|s| s.name() == session.name()) => {
                    // Lost a race with another connect for the same name
                    if let Err(e) = session.disconnect().await {
                        debug!(
                            provider = %session.name(),
                            error = %e,
                            "Error dropping duplicate session"
                        );
                    }
                    debug!(
                        provider = %session.name(),
                        server = %info.name,
                        "Discarded duplicate connection"
                    );
                    Err(ConnectionError::AlreadyRegistered(session.name().to_string()))
                }
                Ok(info) => {
                    sessions.push(session);
                    Ok(info)
                }
                Err(e) => {
                    warn!(provider = %session.name(), error = %e, "Provider failed to connect");
                    Err(e)
                }
            };
            results[slot].1 = Some(outcome);
        }
        drop(sessions);

        results
            .into_iter()
            .filter_map(|(name, outcome)| outcome.map(|o| (name, o)))
            .collect()
    }

    /// Connect a single provider
    pub async fn connect(&self, config: &ProviderConfig) -> Result<ServerInfo, ConnectionError> {
        self.connect_all(std::slice::from_ref(config))
            .await
            .pop()
            .map(|(_, outcome)| outcome)
            .unwrap_or_else(|| {
                Err(ConnectionError::Launch {
                    name: config.name.clone(),
                    message: "provider is disabled".to_string(),
                })
            })
    }

    /// Re-list tools on every session, in registration then provider order
    pub async fn refresh_catalog(&self) -> Vec<ToolDescriptor> {
        let sessions = self.sessions.read().await;
        join_all(sessions.iter().map(|s| s.list_tools()))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Cached tools from the last listing, in the same order as `refresh_catalog`
    pub async fn catalog(&self) -> Vec<ToolDescriptor> {
        let sessions = self.sessions.read().await;
        sessions.iter().flat_map(|s| s.tools()).collect()
    }

    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        let sessions = self.sessions.read().await;
        join_all(sessions.iter().map(|s| s.list_resources()))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    pub async fn read_resource(&self, provider: &str, uri: &str) -> Result<Value, ToolError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .iter()
            .find(|s| s.name() == provider)
            .ok_or_else(|| RoutingError::UnknownProvider(provider.to_string()))?;

        Ok(session.read_resource(uri).await?)
    }

    /// Route a namespaced call to its provider.
    ///
    /// The registry stays read-locked for the whole call, so a provider
    /// cannot be torn down underneath it.
    pub async fn invoke(&self, namespaced: &str, args: Value) -> Result<Value, ToolError> {
        let name = NamespacedToolName::parse(namespaced)?;

        let sessions = self.sessions.read().await;
        let session = sessions
            .iter()
            .find(|s| s.name() == name.provider())
            .ok_or_else(|| RoutingError::UnknownProvider(name.provider().to_string()))?;

        info!(provider = %name.provider(), tool = %name.tool(), "Invoking tool");
        Ok(session.invoke(name.tool(), args).await?)
    }

    /// Remove and disconnect one provider; `Ok(false)` if it was not registered
    pub async fn disconnect(&self, name: &str) -> Result<bool, ConnectionError> {
        let mut sessions = self.sessions.write().await;
        let Some(index) = sessions.iter().position(|s| s.name() == name) else {
            return Ok(false);
        };
        let session = sessions.remove(index);
        drop(sessions);

        session.disconnect().await?;
        Ok(true)
    }

    /// Disconnect everything, collecting failures instead of stopping at the first
    pub async fn disconnect_all(&self) -> Vec<(String, ConnectionError)> {
        let drained: Vec<Arc<ToolSession>> = self.sessions.write().await.drain(..).collect();

        let mut failures = Vec::new();
        for session in drained {
            if let Err(e) = session.disconnect().await {
                warn!(provider = %session.name(), error = %e, "Provider did not shut down cleanly");
                failures.push((session.name().to_string(), e));
            }
        }
        failures
    }

    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|s| ProviderStatus {
                name: s.name().to_string(),
                state: s.state(),
                tool_count: s.tools().len(),
            })
            .collect()
    }

    pub async fn provider_names(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions.iter().map(|s| s.name().to_string()).collect()
    }
}
