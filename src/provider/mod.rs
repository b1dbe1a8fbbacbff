//! Remote tool providers
//!
//! A provider is an external service exposing tools over JSON-RPC 2.0
//! (`tools/list` for discovery, `tools/call` for invocation). Every provider
//! is reached through the same [`ProviderClient`] trait so the catalog and
//! router never care about transport details.

pub mod client;
pub mod protocol;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ToolDescriptor, ToolOutput};

pub use client::{HttpProviderClient, ProviderTimeouts};

/// Uniform interface over a remote tool provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Configured provider id; stamped onto every discovered descriptor
    fn id(&self) -> &str;

    /// Discover the tools this provider exposes
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError>;

    /// Invoke one tool by name
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<ToolOutput, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider {provider} unreachable: {reason}")]
    Unreachable { provider: String, reason: String },

    #[error("provider {provider} protocol error: {reason}")]
    Protocol { provider: String, reason: String },

    #[error("provider {provider} returned error {code}: {message}")]
    Remote {
        provider: String,
        code: i64,
        message: String,
    },

    #[error("provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    /// Call completed but the tool reported `isError`
    #[error("tool reported an error: {message}")]
    ToolFailed { provider: String, message: String },
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Unreachable { .. } => "provider_unreachable",
            ProviderError::Protocol { .. } => "provider_protocol_error",
            ProviderError::Remote { .. } => "provider_error",
            ProviderError::Timeout { .. } => "provider_timeout",
            ProviderError::ToolFailed { .. } => "tool_execution_error",
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Unreachable { provider, .. }
            | ProviderError::Protocol { provider, .. }
            | ProviderError::Remote { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::ToolFailed { provider, .. } => provider,
        }
    }
}
