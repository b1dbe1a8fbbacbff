//! Tool descriptors, call/result shapes and dispatch
//!
//! # Architecture
//!
//! ```text
//! Model tool request ──► ToolRouter.dispatch()
//!                            │
//!                       Catalog lookup (pre-resolved target)
//!                            │
//!              ┌─────────────┴──────────────┐
//!              ▼                            ▼
//!      LocalToolExecutor             ProviderClient
//!    (session environment)          (remote JSON-RPC)
//!              │                            │
//!              └─────────────┬──────────────┘
//!                            ▼
//!           normalize (inline or artifact reference)
//!                            │
//!                            ▼
//!                 ToolCallResult { call_id, ... }
//! ```

pub mod artifacts;
pub mod catalog;
pub mod local;
pub mod router;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ProviderError;

pub use artifacts::{ArtifactRef, ArtifactStore};
pub use catalog::{Catalog, CatalogEntry, Collision, ToolTarget};
pub use local::{EnvironmentTools, LocalToolExecutor};
pub use router::ToolRouter;

/// Name/schema/description triple identifying one invocable capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Globally unique key within one catalog
    pub name: String,
    /// Provider that exposes this tool (`None` = local executor)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_provider_id: Option<String>,
    pub description: String,
    /// JSON Schema for the arguments object
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Descriptor for a tool served by the local executor
    pub fn local(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            source_provider_id: None,
            description: description.into(),
            input_schema,
        }
    }

    pub fn is_local(&self) -> bool {
        self.source_provider_id.is_none()
    }

    /// Human-readable source label ("local" or the provider id)
    pub fn source(&self) -> &str {
        self.source_provider_id.as_deref().unwrap_or("local")
    }
}

/// A model-issued request to invoke one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Caller-assigned id, unique within a turn
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Shape of a tool result payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Structured,
    /// Payload is a reference to an artifact persisted out-of-band
    Artifact,
}

/// Normalized result of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Always equal to the originating request's `call_id`
    pub call_id: String,
    pub content_kind: ContentKind,
    pub payload: Value,
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content_kind: ContentKind::Text,
            payload: Value::String(text.into()),
            is_error: false,
        }
    }

    pub fn structured(call_id: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            content_kind: ContentKind::Structured,
            payload: value,
            is_error: false,
        }
    }

    pub fn artifact(call_id: impl Into<String>, artifact: &ArtifactRef) -> Self {
        Self {
            call_id: call_id.into(),
            content_kind: ContentKind::Artifact,
            payload: serde_json::to_value(artifact).unwrap_or(Value::Null),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content_kind: ContentKind::Text,
            payload: Value::String(message.into()),
            is_error: true,
        }
    }

    /// Render the payload as the text block echoed back to the model
    pub fn as_model_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Raw output of a tool before router normalization
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
    /// Binary payload (e.g. a screenshot); never inlined into the conversation
    Binary { media_type: String, data: Vec<u8> },
}

/// Errors raised inside a tool call. Recovered at the router boundary.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ToolError {
    pub fn execution(reason: impl Into<String>) -> Self {
        ToolError::Execution(reason.into())
    }

    /// Stable error code for logs, metrics and API bodies
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "tool_not_found",
            ToolError::Execution(_) => "tool_execution_error",
            ToolError::Timeout(_) => "tool_timeout",
            ToolError::Provider(ProviderError::Timeout { .. }) => "tool_timeout",
            ToolError::Provider(ProviderError::ToolFailed { .. }) => "tool_execution_error",
            ToolError::Provider(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_result_is_flagged() {
        let result = ToolCallResult::error("call-1", "tool not found: nope");
        assert!(result.is_error);
        assert_eq!(result.call_id, "call-1");
        assert_eq!(result.as_model_text(), "tool not found: nope");
    }

    #[test]
    fn test_structured_result_renders_json() {
        let result = ToolCallResult::structured("c", serde_json::json!({"rows": 3}));
        assert_eq!(result.content_kind, ContentKind::Structured);
        assert_eq!(result.as_model_text(), r#"{"rows":3}"#);
    }

    #[test]
    fn test_descriptor_source_label() {
        let local = ToolDescriptor::local("bash", "Run commands", serde_json::json!({}));
        assert!(local.is_local());
        assert_eq!(local.source(), "local");

        let remote = ToolDescriptor {
            source_provider_id: Some("shop".to_string()),
            ..local
        };
        assert_eq!(remote.source(), "shop");
    }

    #[test]
    fn test_provider_timeout_maps_to_tool_timeout() {
        let err = ToolError::from(ProviderError::Timeout {
            provider: "a".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(err.code(), "tool_timeout");
    }
}
