//! HTTP JSON-RPC client for a single tool provider

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::protocol::{
    self, CallToolResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, METHOD_CALL_TOOL,
    METHOD_LIST_TOOLS,
};
use super::{ProviderClient, ProviderError};
use crate::config::ProviderConfig;
use crate::tools::{ToolDescriptor, ToolOutput};

/// Connect and overall request timeouts for provider traffic
#[derive(Debug, Clone, Copy)]
pub struct ProviderTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(30),
        }
    }
}

/// Talks JSON-RPC 2.0 over HTTP POST to one configured provider
pub struct HttpProviderClient {
    config: ProviderConfig,
    client: reqwest::Client,
    timeouts: ProviderTimeouts,
    next_id: AtomicU64,
}

impl HttpProviderClient {
    /// Create a client for one provider
    ///
    /// # Arguments
    /// * `config` - Provider id and endpoint URL
    /// * `timeouts` - Connect timeout and overall request timeout
    pub fn new(config: ProviderConfig, timeouts: ProviderTimeouts) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .map_err(|e| ProviderError::Unreachable {
                provider: config.id.clone(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            client,
            timeouts,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint_url
    }

    /// Issue one JSON-RPC call and return its `result` member
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        debug!(provider = %self.config.id, method, request_id = id, "Sending JSON-RPC request");

        let response = self
            .client
            .post(&self.config.endpoint_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        let parsed: JsonRpcResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(self.protocol_error(format!("invalid JSON-RPC response: {}", e)));
            }
            Err(_) => {
                return Err(self.protocol_error(format!("unexpected HTTP status {}", status)));
            }
        };

        if !parsed.matches(id) {
            return Err(self.protocol_error(format!(
                "response id {:?} does not match request id {}",
                parsed.id, id
            )));
        }

        if let Some(error) = parsed.error {
            return Err(ProviderError::Remote {
                provider: self.config.id.clone(),
                code: error.code,
                message: error.message,
            });
        }

        parsed
            .result
            .ok_or_else(|| self.protocol_error("response has neither result nor error"))
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: self.config.id.clone(),
                timeout: self.timeouts.request,
            }
        } else {
            ProviderError::Unreachable {
                provider: self.config.id.clone(),
                reason: e.to_string(),
            }
        }
    }

    fn protocol_error(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::Protocol {
            provider: self.config.id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        let result = self.rpc(METHOD_LIST_TOOLS, json!({})).await?;
        let listing: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| self.protocol_error(format!("invalid tools/list result: {}", e)))?;

        let mut tools = Vec::with_capacity(listing.tools.len());
        for tool in listing.tools {
            if tool.name.is_empty() {
                warn!(provider = %self.config.id, "Skipping tool with empty name");
                continue;
            }
            tools.push(ToolDescriptor {
                name: tool.name,
                source_provider_id: Some(self.config.id.clone()),
                description: tool.description.unwrap_or_default(),
                input_schema: tool.input_schema.unwrap_or_else(protocol::empty_object_schema),
            });
        }

        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<ToolOutput, ProviderError> {
        let result = self
            .rpc(METHOD_CALL_TOOL, json!({ "name": name, "arguments": arguments }))
            .await?;
        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| self.protocol_error(format!("invalid tools/call result: {}", e)))?;

        if call.is_error {
            return Err(ProviderError::ToolFailed {
                provider: self.config.id.clone(),
                message: protocol::error_text(&call.content),
            });
        }

        protocol::normalize_content(call.content).map_err(|reason| self.protocol_error(reason))
    }
}
