//! Error types for Toolmux Core
//!
//! Only [`ModelError`] ever escapes a `chat` call. Connection, routing and
//! invocation failures are caught where they happen and turned into data.

use thiserror::Error;

/// Result type alias using Toolmux Error
pub type Result<T> = std::result::Result<T, Error>;

/// Toolmux error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to bring a provider up (or down)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Invalid provider name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Provider '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Failed to launch provider '{name}': {message}")]
    Launch { name: String, message: String },

    #[error("Handshake with provider '{name}' failed: {message}")]
    Handshake { name: String, message: String },

    #[error("Failed to shut down provider '{name}': {message}")]
    Shutdown { name: String, message: String },
}

/// A namespaced tool name that cannot be routed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("Invalid tool name format: {0}")]
    Malformed(String),

    #[error("Provider '{0}' not connected")]
    UnknownProvider(String),
}

/// A routed call that failed at or beyond the provider boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("Provider '{0}' is not connected")]
    NotConnected(String),

    #[error("Error calling tool {tool}: {message}")]
    Transport { tool: String, message: String },

    #[error("Error calling tool {tool}: invalid response: {message}")]
    Protocol { tool: String, message: String },

    #[error("Error calling tool {tool}: {message}")]
    Server { tool: String, message: String },

    #[error("Tool {tool} reported an error: {message}")]
    Tool { tool: String, message: String },

    #[error("Tool {tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },
}

/// Anything `SessionRegistry::invoke` can return
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Model backend failure with classification
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Unknown, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Timeouts, refused connections, truncated bodies
    Network,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError,
    /// HTTP 401/403
    Auth,
    /// HTTP 400
    InvalidRequest,
    Unknown,
}
