//! JSON-RPC 2.0 wire types for the tool provider protocol
//!
//! ```text
//! → {"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}}
//! ← {"jsonrpc":"2.0","id":7,"result":{"tools":[{"name":..,"description":..,"inputSchema":{..}}]}}
//!
//! → {"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":..,"arguments":{..}}}
//! ← {"jsonrpc":"2.0","id":8,"result":{"content":[{"type":"text","text":..}],"isError":false}}
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::ToolOutput;

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    /// True when the response id echoes the request id
    pub fn matches(&self, request_id: u64) -> bool {
        match &self.id {
            Some(Value::Number(n)) => n.as_u64() == Some(request_id),
            Some(Value::String(s)) => s.parse::<u64>().ok() == Some(request_id),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<RemoteTool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// Schema used when a provider omits `inputSchema`
pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

/// Collapse an MCP content array into a single tool output.
///
/// All-text arrays join with newlines, a lone image becomes binary output,
/// anything else is passed through as structured JSON.
pub fn normalize_content(items: Vec<Value>) -> Result<ToolOutput, String> {
    if items.iter().all(|item| item_type(item) == Some("text")) {
        let text = items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        return Ok(ToolOutput::Text(text));
    }

    if let [item] = items.as_slice() {
        if item_type(item) == Some("image") {
            let data = item
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| "image content without data".to_string())?;
            let media_type = item
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            let bytes = BASE64
                .decode(data)
                .map_err(|e| format!("invalid base64 image data: {}", e))?;
            return Ok(ToolOutput::Binary { media_type, data: bytes });
        }
    }

    Ok(ToolOutput::Structured(Value::Array(items)))
}

/// Text of every `text` item, used as the message of an `isError` result
pub fn error_text(items: &[Value]) -> String {
    let text = items
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        "tool returned isError without a message".to_string()
    } else {
        text
    }
}

fn item_type(item: &Value) -> Option<&str> {
    item.get("type").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_items_are_joined() {
        let output = normalize_content(vec![
            json!({"type": "text", "text": "first"}),
            json!({"type": "text", "text": "second"}),
        ])
        .unwrap();
        assert_eq!(output, ToolOutput::Text("first\nsecond".to_string()));
    }

    #[test]
    fn test_empty_content_is_empty_text() {
        let output = normalize_content(Vec::new()).unwrap();
        assert_eq!(output, ToolOutput::Text(String::new()));
    }

    #[test]
    fn test_single_image_becomes_binary() {
        let output = normalize_content(vec![json!({
            "type": "image",
            "data": BASE64.encode(b"\x89PNG"),
            "mimeType": "image/png"
        })])
        .unwrap();
        match output {
            ToolOutput::Binary { media_type, data } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(data, b"\x89PNG");
            }
            other => panic!("expected binary output, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_content_is_structured() {
        let items = vec![
            json!({"type": "text", "text": "caption"}),
            json!({"type": "resource", "uri": "file:///tmp/x"}),
        ];
        let output = normalize_content(items.clone()).unwrap();
        assert_eq!(output, ToolOutput::Structured(Value::Array(items)));
    }

    #[test]
    fn test_bad_image_data_is_protocol_error() {
        let result = normalize_content(vec![json!({"type": "image", "data": "%%%"})]);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_id_matching() {
        let response: JsonRpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 4, "result": {}})).unwrap();
        assert!(response.matches(4));
        assert!(!response.matches(5));

        let missing: JsonRpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "result": {}})).unwrap();
        assert!(!missing.matches(1));
    }
}
