//! Integration tests for the agent configuration and model backends
//!
//! The Anthropic backend is exercised against an in-process axum server that
//! speaks the Messages API, so request shape and response decoding are
//! checked over real HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::{routing::post, Json, Router};
use serde_json::{json, Value};

use toolvisor::agent::ConversationTurn;
use toolvisor::model::anthropic::{AnthropicClient, AnthropicConfig};
use toolvisor::model::ollama::{ChatMessage, Tool};
use toolvisor::model::{ModelClient, ModelError, ModelOutput, ModelRequest, StopReason, ToolDefinition};
use toolvisor::tools::local::environment_tool_descriptors;
use toolvisor::{AgentConfig, ProviderSettings, ToolCallResult};

/// Test that AgentConfig has sensible defaults
#[test]
fn test_agent_config_defaults() {
    let config = AgentConfig::default();

    assert_eq!(config.max_turns, 25);
    assert_eq!(config.max_tokens, 4096);
    assert_eq!(config.tool_timeout, Duration::from_secs(180));
    assert!(config.system_prompt.is_none());
    assert!(config.allowed_tools.is_none());
}

/// Test that AgentConfig can be customized
#[test]
fn test_agent_config_custom() {
    let config = AgentConfig {
        model: "claude-3-5-haiku-latest".to_string(),
        max_turns: 5,
        tool_timeout: Duration::from_secs(30),
        allowed_tools: Some(vec!["bash".to_string()]),
        system_prompt: Some("You are a careful operator.".to_string()),
        ..AgentConfig::default()
    };

    assert_eq!(config.model, "claude-3-5-haiku-latest");
    assert_eq!(config.max_turns, 5);
    assert_eq!(config.allowed_tools.as_deref(), Some(&["bash".to_string()][..]));
}

/// Provider file entries keep their file order; disabled and URL-less ones are dropped
#[test]
fn test_provider_settings_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mcp_servers.json");
    std::fs::write(
        &path,
        r#"{
            "mcpServers": {
                "zeta": {"httpUrl": "http://zeta:9000/mcp", "description": "Last alphabetically"},
                "alpha": {"endpointUrl": "http://alpha:9000/mcp", "authMode": "bearer"},
                "off": {"httpUrl": "http://off:9000/mcp", "enabled": false},
                "nourl": {"description": "Missing URL"}
            }
        }"#,
    )
    .unwrap();

    let settings = ProviderSettings::load(&path).unwrap();
    let ids: Vec<_> = settings.providers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["zeta", "alpha"]);
    assert_eq!(settings.providers[1].auth_mode, "bearer");
}

/// A missing provider file means no providers, not an error
#[test]
fn test_provider_settings_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ProviderSettings::load(dir.path().join("absent.json")).unwrap();
    assert!(settings.providers.is_empty());
}

/// Test ChatMessage construction with helper methods
#[test]
fn test_chat_message_construction() {
    let user_msg = ChatMessage::user("Hello, world!");
    assert_eq!(user_msg.role, "user");
    assert_eq!(user_msg.content, "Hello, world!");
    assert!(user_msg.tool_calls.is_none());

    let system_msg = ChatMessage::system("You are helpful.");
    assert_eq!(system_msg.role, "system");

    let assistant_msg = ChatMessage::assistant("I can help!", Vec::new());
    assert_eq!(assistant_msg.role, "assistant");
    assert!(assistant_msg.tool_calls.is_none());

    let tool_msg = ChatMessage::tool("Result: 42");
    assert_eq!(tool_msg.role, "tool");
}

/// Environment tools convert to Ollama function definitions
#[test]
fn test_bash_tool_definition() {
    let bash = environment_tool_descriptors()
        .into_iter()
        .find(|d| d.name == "bash")
        .unwrap();
    let definition = ToolDefinition {
        name: bash.name.clone(),
        description: bash.description.clone(),
        input_schema: bash.input_schema.clone(),
    };
    let tool = Tool::from(&definition);

    assert_eq!(tool.tool_type, "function");
    assert_eq!(tool.function.name, "bash");
    assert_eq!(tool.function.parameters["type"], "object");
    assert!(tool.function.parameters["properties"]["command"].is_object());

    let json = serde_json::to_string(&tool).unwrap();
    assert!(json.contains("\"type\":\"function\""));
}

/// Test ChatMessage serialization
#[test]
fn test_chat_message_serialization() {
    let msg = ChatMessage::user("test message");
    let json = serde_json::to_string(&msg).unwrap();

    assert!(json.contains("\"role\":\"user\""));
    assert!(json.contains("\"content\":\"test message\""));
    // tool_calls should be skipped when None
    assert!(!json.contains("tool_calls"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic Messages API over HTTP
// ─────────────────────────────────────────────────────────────────────────────

async fn messages_handler(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"type": "error", "error": {"type": "authentication_error"}})),
        );
    }
    assert_eq!(headers["anthropic-version"], "2023-06-01");

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let last = messages.last().cloned().unwrap_or(Value::Null);

    // Once a tool result comes back, answer; otherwise ask for a tool
    let answered = last["content"]
        .as_array()
        .map(|blocks| blocks.iter().any(|b| b["type"] == "tool_result"))
        .unwrap_or(false);

    let response = if answered {
        json!({
            "content": [{"type": "text", "text": format!("seen {} messages", messages.len())}],
            "stop_reason": "end_turn"
        })
    } else {
        json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_01", "name": "bash", "input": {"command": "ls"}}
            ],
            "stop_reason": "tool_use"
        })
    };
    (StatusCode::OK, Json(response))
}

async fn spawn_messages_api() -> SocketAddr {
    let app = Router::new().route("/v1/messages", post(messages_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn anthropic(addr: SocketAddr, key: &str) -> AnthropicClient {
    let mut config = AnthropicConfig::new(key, "claude-test");
    config.base_url = format!("http://{}", addr);
    AnthropicClient::new(config).unwrap()
}

fn request<'a>(tools: &'a [ToolDefinition], history: &'a [ConversationTurn], prompt: Option<&'a str>) -> ModelRequest<'a> {
    ModelRequest {
        system: "You are a test.",
        tools,
        history,
        prompt,
        max_tokens: 256,
    }
}

/// tool_use blocks become tool calls; tool results are echoed with the same id
#[tokio::test]
async fn test_anthropic_tool_round_trip() {
    let addr = spawn_messages_api().await;
    let client = anthropic(addr, "test-key");
    let tools = vec![ToolDefinition {
        name: "bash".to_string(),
        description: "Run a command".to_string(),
        input_schema: json!({"type": "object"}),
    }];

    let first = client.complete(request(&tools, &[], Some("list files"))).await.unwrap();
    assert_eq!(first.stop_reason, StopReason::ToolUse);
    assert_eq!(first.text, "Let me check.");
    assert_eq!(first.tool_calls[0].call_id, "toolu_01");
    assert_eq!(first.tool_calls[0].arguments["command"], "ls");

    let history = vec![ConversationTurn {
        index: 0,
        prompt: Some("list files".to_string()),
        model_output: first,
        tool_results: vec![ToolCallResult::text("toolu_01", "README.md")],
    }];
    let second = client.complete(request(&tools, &history, None)).await.unwrap();

    assert_eq!(second, ModelOutput::final_answer("seen 3 messages"));
}

/// Non-2xx answers surface as API errors with the status
#[tokio::test]
async fn test_anthropic_rejected_key() {
    let addr = spawn_messages_api().await;
    let client = anthropic(addr, "wrong-key");

    let err = client.complete(request(&[], &[], Some("hi"))).await.unwrap_err();
    assert!(matches!(err, ModelError::Api { status: 401, .. }), "got {:?}", err);
}

/// An empty key is rejected before any request is made
#[test]
fn test_anthropic_requires_key() {
    let err = AnthropicClient::new(AnthropicConfig::new("  ", "claude-test")).err().unwrap();
    assert_eq!(err.code(), "model_configuration_error");
}
