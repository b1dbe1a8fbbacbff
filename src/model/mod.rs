//! Model API clients
//!
//! The orchestrator talks to every model backend through [`ModelClient`]:
//! it sends the system prompt, the catalog's tool definitions and the linear
//! conversation history, and receives text plus zero or more tool requests
//! together with a stop reason.
//!
//! - [`AnthropicClient`] - Anthropic Messages API (`tool_use` / `tool_result` blocks)
//! - [`OllamaClient`] - Ollama `/api/chat` with text-embedded tool call fallback

pub mod anthropic;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::ConversationTurn;
use crate::tools::ToolCallRequest;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use ollama::OllamaClient;

/// Tool definition in the shape model APIs expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Final answer
    EndTurn,
    /// Stopped to have tools run
    ToolUse,
    /// Output token limit hit
    MaxTokens,
    Other(String),
}

impl StopReason {
    /// Map an Anthropic-style `stop_reason` string
    pub fn from_api(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop_sequence" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            other => StopReason::Other(other.to_string()),
        }
    }

    /// True when the model considers the task answered
    pub fn is_terminal(&self) -> bool {
        matches!(self, StopReason::EndTurn)
    }
}

/// One model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: StopReason,
}

impl ModelOutput {
    pub fn final_answer(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        }
    }

    pub fn with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
            stop_reason: StopReason::ToolUse,
        }
    }
}

/// Everything the model sees on one call
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub tools: &'a [ToolDefinition],
    /// Completed turns, oldest first
    pub history: &'a [ConversationTurn],
    /// Task text not yet answered (first call of a run)
    pub prompt: Option<&'a str>,
    pub max_tokens: u32,
}

/// Uniform interface over a model backend
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier (metric label, log field)
    fn model(&self) -> &str;

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelOutput, ModelError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode model response: {0}")]
    Decode(String),

    #[error("model client misconfigured: {0}")]
    Configuration(String),
}

impl ModelError {
    pub fn code(&self) -> &'static str {
        match self {
            ModelError::Transport(_) => "model_unreachable",
            ModelError::Api { .. } => "model_api_error",
            ModelError::Decode(_) => "model_protocol_error",
            ModelError::Configuration(_) => "model_configuration_error",
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ModelError::Decode(e.to_string())
        } else {
            ModelError::Transport(e.to_string())
        }
    }
}
