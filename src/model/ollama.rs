//! Ollama Chat API with tool calling support
//!
//! Ollama has no call ids, so ids are synthesized as `call_<turn>_<n>`.
//! Models that print tool calls as JSON in their text instead of using the
//! native `tool_calls` field are handled by [`parse_tool_calls_from_text`],
//! restricted to names present in the request's tool list.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ModelClient, ModelError, ModelOutput, ModelRequest, StopReason, ToolDefinition};
use crate::agent::ConversationTurn;
use crate::tools::ToolCallRequest;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role("tool", content)
    }

    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// A tool call from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function call details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
}

impl From<&ToolDefinition> for Tool {
    fn from(definition: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: definition.name.clone(),
                description: definition.description.clone(),
                parameters: definition.input_schema.clone(),
            },
        }
    }
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub eval_count: u32,
}

/// Client for Ollama's /api/chat endpoint with tool support
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `model` - The model name (e.g., "qwen3")
    /// * `timeout` - Overall request timeout (local models can be slow to load)
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Configuration(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelOutput, ModelError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let tools: Vec<Tool> = request.tools.iter().map(Tool::from).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": build_messages(request.system, request.history, request.prompt),
            "stream": false,
            "options": {
                "temperature": 0.0,
                "num_predict": request.max_tokens
            }
        });
        if !tools.is_empty() {
            body["tools"] =
                serde_json::to_value(&tools).map_err(|e| ModelError::Decode(e.to_string()))?;
        }

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ModelError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        if text.is_empty() {
            return Err(ModelError::Decode("empty response from Ollama".to_string()));
        }

        let chat: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))?;

        debug!(model = %self.model, eval_count = chat.eval_count, done = chat.done, "Ollama response received");

        Ok(into_output(chat, request.tools, request.history.len()))
    }
}

fn into_output(response: ChatResponse, tools: &[ToolDefinition], turn_index: usize) -> ModelOutput {
    // Native format first, then fallback to text parsing
    let calls = response
        .message
        .tool_calls
        .clone()
        .filter(|tc| !tc.is_empty())
        .unwrap_or_else(|| {
            parse_tool_calls_from_text(&response.message.content)
                .into_iter()
                .filter(|call| tools.iter().any(|t| t.name == call.function.name))
                .collect()
        });

    let tool_calls: Vec<ToolCallRequest> = calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| {
            ToolCallRequest::new(
                format!("call_{}_{}", turn_index, i),
                call.function.name,
                call.function.arguments,
            )
        })
        .collect();

    let stop_reason = if !tool_calls.is_empty() {
        StopReason::ToolUse
    } else {
        match response.done_reason.as_deref() {
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    };

    ModelOutput {
        text: response.message.content,
        tool_calls,
        stop_reason,
    }
}

fn build_messages(system: &str, history: &[ConversationTurn], prompt: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system)];

    for turn in history {
        if let Some(prompt) = &turn.prompt {
            messages.push(ChatMessage::user(prompt.as_str()));
        }

        let output = &turn.model_output;
        let calls = output
            .tool_calls
            .iter()
            .map(|call| ToolCall {
                function: FunctionCall {
                    name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect();
        messages.push(ChatMessage::assistant(output.text.as_str(), calls));

        for call in &output.tool_calls {
            let content = match turn.result_for(&call.call_id) {
                Some(result) if result.is_error => format!("Error: {}", result.as_model_text()),
                Some(result) => result.as_model_text(),
                None => "Error: no result recorded for this call".to_string(),
            };
            messages.push(ChatMessage::tool(content));
        }
    }

    if let Some(prompt) = prompt {
        messages.push(ChatMessage::user(prompt));
    }

    messages
}

/// Try to parse tool calls from the response content text
///
/// This handles models that output tool calls as JSON in the text
/// instead of using the native tool_calls field.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let content = content.trim();

    // Try parsing the entire content as a tool call
    if let Some(tool_call) = try_parse_tool_call(content) {
        return vec![tool_call];
    }

    // Look for top-level {...} spans that might be tool calls
    let mut tool_calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(tool_call) = try_parse_tool_call(&content[s..=i]) {
                            tool_calls.push(tool_call);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    tool_calls
}

fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    let value = serde_json::from_str::<Value>(json_str).ok()?;
    let name = value.get("name").and_then(Value::as_str)?;

    // Some models use "parameters" instead of "arguments"
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))?
        .clone();

    Some(ToolCall {
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}
