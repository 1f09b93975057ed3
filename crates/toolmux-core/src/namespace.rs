//! Model-facing tool names: `{provider}__{tool}`
//!
//! Provider names are validated when configuration is loaded so that the
//! first separator in a namespaced name always ends the provider part.

use std::fmt;

use crate::error::{ConnectionError, RoutingError};

/// Joins a provider name and a tool name
pub const SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedToolName {
    provider: String,
    tool: String,
}

impl NamespacedToolName {
    pub fn new(provider: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            tool: tool.into(),
        }
    }

    /// Split on the first separator; both halves must be non-empty
    pub fn parse(name: &str) -> Result<Self, RoutingError> {
        match name.split_once(SEPARATOR) {
            Some((provider, tool)) if !provider.is_empty() && !tool.is_empty() => {
                Ok(Self::new(provider, tool))
            }
            _ => Err(RoutingError::Malformed(name.to_string())),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl fmt::Display for NamespacedToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.provider, SEPARATOR, self.tool)
    }
}

/// Longest tool name the model API accepts
pub const MAX_MODEL_TOOL_NAME: usize = 128;

/// Whether the model API accepts `name` as a tool name: `[A-Za-z0-9_-]{1,128}`
pub fn is_model_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_MODEL_TOOL_NAME
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Check that `name` can be used as a provider namespace
pub fn validate_provider_name(name: &str) -> Result<(), ConnectionError> {
    let invalid = |reason: &str| ConnectionError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(invalid("only ASCII letters, digits, '-' and '_' are allowed"));
    }
    if name.contains(SEPARATOR) {
        return Err(invalid("must not contain the namespace separator '__'"));
    }
    // "a_" + "__" + "x" would parse back as provider "a"
    if name.ends_with('_') {
        return Err(invalid("must not end with '_'"));
    }
    Ok(())
}
