//! Fakes shared by the integration tests
//!
//! Every fake implements one of the public traits so the tests drive the
//! real catalog, router, orchestrator and session manager.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use toolvisor::environment::{EnvironmentError, EnvironmentHandle, Provisioner};
use toolvisor::model::{ModelClient, ModelError, ModelOutput, ModelRequest, StopReason};
use toolvisor::provider::{ProviderClient, ProviderError};
use toolvisor::tools::{ArtifactStore, LocalToolExecutor, ToolError, ToolOutput};
use toolvisor::{Agent, AgentConfig, ToolCallRequest, ToolCallResult, ToolDescriptor};

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// Replays scripted responses; repeats `fallback` once the script runs out
pub struct ScriptedModel {
    script: Mutex<VecDeque<ModelOutput>>,
    fallback: Option<ModelOutput>,
    delay: Duration,
    /// Tool results of the latest turn, as seen by each call
    seen_results: Mutex<Vec<Vec<ToolCallResult>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<ModelOutput>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            delay: Duration::ZERO,
            seen_results: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the same output
    pub fn repeating(output: ModelOutput) -> Self {
        Self {
            fallback: Some(output),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn seen_results(&self) -> Vec<Vec<ToolCallResult>> {
        self.seen_results.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelOutput, ModelError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let latest = request
            .history
            .last()
            .map(|turn| turn.tool_results.clone())
            .unwrap_or_default();
        self.seen_results.lock().unwrap().push(latest);

        let next = self.script.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(output) => Ok(output),
            None => Err(ModelError::Decode("script exhausted".to_string())),
        }
    }
}

/// Model whose endpoint is always down
pub struct UnreachableModel;

#[async_trait]
impl ModelClient for UnreachableModel {
    fn model(&self) -> &str {
        "unreachable"
    }

    async fn complete(&self, _request: ModelRequest<'_>) -> Result<ModelOutput, ModelError> {
        Err(ModelError::Transport("connection refused".to_string()))
    }
}

pub fn tool_call(call_id: &str, tool: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(call_id, tool, arguments)
}

pub fn calls(text: &str, calls: Vec<ToolCallRequest>) -> ModelOutput {
    ModelOutput::with_tool_calls(text, calls)
}

pub fn truncated(text: &str) -> ModelOutput {
    ModelOutput {
        text: text.to_string(),
        tool_calls: Vec::new(),
        stop_reason: StopReason::MaxTokens,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory provider answering `<provider>:<tool>:<arguments.tag>`
pub struct FakeProvider {
    id: String,
    tools: Vec<ToolDescriptor>,
    delays: HashMap<String, Duration>,
    discovery_fails: bool,
}

impl FakeProvider {
    pub fn new(id: &str, tools: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            tools: tools
                .iter()
                .map(|name| ToolDescriptor {
                    name: name.to_string(),
                    source_provider_id: None,
                    description: format!("{} from {}", name, id),
                    input_schema: json!({"type": "object"}),
                })
                .collect(),
            delays: HashMap::new(),
            discovery_fails: false,
        }
    }

    /// Provider whose `tools/list` fails
    pub fn unreachable(id: &str) -> Self {
        Self {
            discovery_fails: true,
            ..Self::new(id, &[])
        }
    }

    pub fn with_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.delays.insert(tool.to_string(), delay);
        self
    }

    pub fn shared(self) -> Arc<dyn ProviderClient> {
        Arc::new(self)
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        if self.discovery_fails {
            return Err(ProviderError::Unreachable {
                provider: self.id.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<ToolOutput, ProviderError> {
        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        let tag = arguments["tag"].as_str().unwrap_or_default();
        Ok(ToolOutput::Text(format!("{}:{}:{}", self.id, name, tag)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Local executor
// ─────────────────────────────────────────────────────────────────────────────

/// Local executor serving a fixed set of names that echo `local:<tool>`
pub struct StubLocalTools {
    names: Vec<String>,
}

impl StubLocalTools {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn none() -> Self {
        Self::new(&[])
    }
}

#[async_trait]
impl LocalToolExecutor for StubLocalTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.names
            .iter()
            .map(|name| ToolDescriptor::local(name.clone(), "stub", json!({"type": "object"})))
            .collect()
    }

    async fn execute(
        &self,
        tool_name: &str,
        _arguments: &Value,
        _environment_endpoint: &str,
    ) -> Result<ToolOutput, ToolError> {
        if self.names.iter().any(|n| n == tool_name) {
            Ok(ToolOutput::Text(format!("local:{}", tool_name)))
        } else {
            Err(ToolError::NotFound(tool_name.to_string()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provisioners
// ─────────────────────────────────────────────────────────────────────────────

/// Provisioner that never produces an environment
pub struct FailingProvisioner;

#[async_trait]
impl Provisioner for FailingProvisioner {
    fn name(&self) -> &str {
        "failing"
    }

    async fn provision(&self, _session_id: &str) -> Result<EnvironmentHandle, EnvironmentError> {
        Err(EnvironmentError::Spawn("image not found".to_string()))
    }

    async fn teardown(&self, _handle: EnvironmentHandle) -> Result<(), EnvironmentError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assembly
// ─────────────────────────────────────────────────────────────────────────────

pub async fn build_agent(
    config: AgentConfig,
    providers: Vec<Arc<dyn ProviderClient>>,
    local: StubLocalTools,
    model: Arc<dyn ModelClient>,
    artifact_dir: &tempfile::TempDir,
) -> Arc<Agent> {
    Arc::new(
        Agent::build(
            config,
            providers,
            model,
            Arc::new(local),
            Arc::new(ArtifactStore::new(artifact_dir.path())),
        )
        .await,
    )
}
