//! Anthropic Messages API client
//!
//! History mapping:
//!
//! ```text
//! turn.prompt          → user      [text]
//! turn.model_output    → assistant [text?, tool_use{id, name, input}...]
//! turn.tool_results    → user      [tool_result{tool_use_id, content, is_error}...]
//! pending prompt       → user      [text]
//! ```
//!
//! Consecutive user messages are merged, so a new task prompt following the
//! tool results of a previous run lands in the same user message.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{ModelClient, ModelError, ModelOutput, ModelRequest, StopReason};
use crate::agent::ConversationTurn;
use crate::tools::ToolCallRequest;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

pub struct AnthropicClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self, ModelError> {
        if config.api_key.trim().is_empty() {
            return Err(ModelError::Configuration("Anthropic API key is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ModelError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            model: config.model,
        })
    }

    fn request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": build_messages(request.history, request.prompt),
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                }))
                .collect::<Vec<_>>());
        }

        body
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelOutput, ModelError> {
        let body = self.request_body(&request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))?;

        let output = into_output(parsed);
        debug!(
            model = %self.model,
            tool_calls = output.tool_calls.len(),
            stop_reason = ?output.stop_reason,
            "Anthropic response received"
        );
        Ok(output)
    }
}

fn into_output(response: MessagesResponse) -> ModelOutput {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCallRequest::new(id, name, input));
            }
            ContentBlock::Unknown => {}
        }
    }

    let stop_reason = match response.stop_reason.as_deref() {
        Some(reason) => StopReason::from_api(reason),
        None if !tool_calls.is_empty() => StopReason::ToolUse,
        None => StopReason::EndTurn,
    };

    ModelOutput {
        text: texts.join("\n"),
        tool_calls,
        stop_reason,
    }
}

/// Render the linear history as Messages API messages
pub fn build_messages(history: &[ConversationTurn], prompt: Option<&str>) -> Vec<Value> {
    let mut messages = Vec::new();

    for turn in history {
        if let Some(prompt) = &turn.prompt {
            push_user(&mut messages, vec![json!({ "type": "text", "text": prompt })]);
        }

        let output = &turn.model_output;
        let mut blocks = Vec::new();
        if !output.text.is_empty() {
            blocks.push(json!({ "type": "text", "text": output.text }));
        }
        for call in &output.tool_calls {
            blocks.push(json!({
                "type": "tool_use",
                "id": call.call_id,
                "name": call.tool_name,
                "input": call.arguments,
            }));
        }
        if blocks.is_empty() {
            blocks.push(json!({ "type": "text", "text": "(empty response)" }));
        }
        messages.push(json!({ "role": "assistant", "content": blocks }));

        if !output.tool_calls.is_empty() {
            let results = output
                .tool_calls
                .iter()
                .map(|call| match turn.result_for(&call.call_id) {
                    Some(result) => json!({
                        "type": "tool_result",
                        "tool_use_id": call.call_id,
                        "content": result.as_model_text(),
                        "is_error": result.is_error,
                    }),
                    None => json!({
                        "type": "tool_result",
                        "tool_use_id": call.call_id,
                        "content": "no result recorded for this call",
                        "is_error": true,
                    }),
                })
                .collect();
            push_user(&mut messages, results);
        }
    }

    if let Some(prompt) = prompt {
        push_user(&mut messages, vec![json!({ "type": "text", "text": prompt })]);
    }

    messages
}

fn push_user(messages: &mut Vec<Value>, blocks: Vec<Value>) {
    if let Some(last) = messages.last_mut() {
        if last["role"] == "user" {
            if let Some(content) = last["content"].as_array_mut() {
                content.extend(blocks);
                return;
            }
        }
    }
    messages.push(json!({ "role": "user", "content": blocks }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCallResult;

    fn tool_turn() -> ConversationTurn {
        ConversationTurn {
            index: 0,
            prompt: Some("list files".to_string()),
            model_output: ModelOutput::with_tool_calls(
                "Let me look.",
                vec![ToolCallRequest::new("toolu_1", "bash", json!({"command": "ls"}))],
            ),
            tool_results: vec![ToolCallResult::text("toolu_1", "a.txt")],
        }
    }

    #[test]
    fn test_tool_results_follow_tool_use() {
        let messages = build_messages(&[tool_turn()], None);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["id"], "toolu_1");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(messages[2]["content"][0]["content"], "a.txt");
        assert_eq!(messages[2]["content"][0]["is_error"], false);
    }

    #[test]
    fn test_new_prompt_merges_into_trailing_user_message() {
        let messages = build_messages(&[tool_turn()], Some("now count them"));
        assert_eq!(messages.len(), 3);
        let last = messages[2]["content"].as_array().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[1]["text"], "now count them");
    }

    #[test]
    fn test_response_with_tool_use() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Checking"},
                {"type": "tool_use", "id": "toolu_9", "name": "query", "input": {"q": 1}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();
        let output = into_output(response);
        assert_eq!(output.text, "Checking");
        assert_eq!(output.stop_reason, StopReason::ToolUse);
        assert_eq!(output.tool_calls[0].call_id, "toolu_9");
        assert_eq!(output.tool_calls[0].arguments, json!({"q": 1}));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = AnthropicClient::new(AnthropicConfig::new("  ", "claude"));
        assert!(matches!(result, Err(ModelError::Configuration(_))));
    }
}
