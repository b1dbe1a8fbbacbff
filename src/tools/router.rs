//! Tool Router - dispatches one tool request to its pre-resolved target
//!
//! The router never fails: every outcome, including unknown tools, timeouts
//! and provider errors, becomes a [`ToolCallResult`] carrying the request's
//! `call_id` so the model can react to it on the next turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info_span, warn, Instrument};

use super::{
    ArtifactStore, Catalog, CatalogEntry, LocalToolExecutor, ToolCallRequest, ToolCallResult,
    ToolError, ToolOutput, ToolTarget,
};
use crate::metrics::{TOOL_CALLS, TOOL_CALL_DURATION};

/// Characters of text kept as the preview of an offloaded artifact
const PREVIEW_CHARS: usize = 512;

/// Per-session dispatcher bound to one environment endpoint
#[derive(Clone)]
pub struct ToolRouter {
    catalog: Arc<Catalog>,
    local: Arc<dyn LocalToolExecutor>,
    artifacts: Arc<ArtifactStore>,
    session_id: String,
    environment_endpoint: String,
    timeout: Duration,
    inline_limit: usize,
}

impl ToolRouter {
    /// Create a router for one session
    ///
    /// # Arguments
    /// * `catalog` - Shared, immutable tool catalog
    /// * `local` - Executor for tools served by the session environment
    /// * `artifacts` - Store for outputs that are not inlined
    /// * `session_id` - Owning session (artifact namespace, log field)
    /// * `environment_endpoint` - Base URL of the session's environment
    /// * `timeout` - Upper bound on every dispatch
    /// * `inline_limit` - Serialized size above which outputs become artifacts
    pub fn new(
        catalog: Arc<Catalog>,
        local: Arc<dyn LocalToolExecutor>,
        artifacts: Arc<ArtifactStore>,
        session_id: impl Into<String>,
        environment_endpoint: impl Into<String>,
        timeout: Duration,
        inline_limit: usize,
    ) -> Self {
        Self {
            catalog,
            local,
            artifacts,
            session_id: session_id.into(),
            environment_endpoint: environment_endpoint.into(),
            timeout,
            inline_limit,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn environment_endpoint(&self) -> &str {
        &self.environment_endpoint
    }

    /// Dispatch one request and return its normalized result
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResult {
        let Some(entry) = self.catalog.get(&request.tool_name) else {
            warn!(
                session_id = %self.session_id,
                call_id = %request.call_id,
                tool = %request.tool_name,
                "Model requested unknown tool"
            );
            let error = ToolError::NotFound(request.tool_name.clone());
            TOOL_CALLS
                .with_label_values(&[&request.tool_name, "none", error.code()])
                .inc();
            return ToolCallResult::error(&request.call_id, error.to_string());
        };

        let target = entry.target.label().to_string();
        let span = info_span!(
            "tool_dispatch",
            session_id = %self.session_id,
            call_id = %request.call_id,
            tool = %request.tool_name,
            target = %target,
            otel.name = "tool_dispatch"
        );

        async {
            let start = Instant::now();

            let outcome = match tokio::time::timeout(self.timeout, self.invoke(entry, request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::Timeout(self.timeout)),
            };

            let (result, status) = match outcome {
                Ok(output) => {
                    let result = self.normalize(&request.call_id, output).await;
                    let status = if result.is_error { "artifact_error" } else { "ok" };
                    (result, status)
                }
                Err(e) => {
                    warn!(error = %e, code = e.code(), "Tool call failed");
                    (ToolCallResult::error(&request.call_id, e.to_string()), e.code())
                }
            };

            let elapsed = start.elapsed();
            TOOL_CALLS
                .with_label_values(&[&request.tool_name, &target, status])
                .inc();
            TOOL_CALL_DURATION
                .with_label_values(&[&target])
                .observe(elapsed.as_secs_f64());
            debug!(
                duration_ms = elapsed.as_secs_f64() * 1000.0,
                content_kind = ?result.content_kind,
                is_error = result.is_error,
                "Tool call finished"
            );

            result
        }
        .instrument(span)
        .await
    }

    async fn invoke(&self, entry: &CatalogEntry, request: &ToolCallRequest) -> Result<ToolOutput, ToolError> {
        match &entry.target {
            ToolTarget::Local => {
                self.local
                    .execute(&request.tool_name, &request.arguments, &self.environment_endpoint)
                    .await
            }
            ToolTarget::Provider(client) => Ok(client
                .call_tool(&request.tool_name, &request.arguments)
                .await?),
        }
    }

    /// Inline small text/structured outputs; offload binary and oversized ones
    async fn normalize(&self, call_id: &str, output: ToolOutput) -> ToolCallResult {
        match output {
            ToolOutput::Text(text) if text.len() <= self.inline_limit => ToolCallResult::text(call_id, text),
            ToolOutput::Text(text) => {
                let preview = Some(preview_of(&text));
                self.offload(call_id, "text/plain", text.into_bytes(), preview).await
            }
            ToolOutput::Structured(value) => {
                let encoded = value.to_string();
                if encoded.len() <= self.inline_limit {
                    ToolCallResult::structured(call_id, value)
                } else {
                    let preview = Some(preview_of(&encoded));
                    self.offload(call_id, "application/json", encoded.into_bytes(), preview)
                        .await
                }
            }
            ToolOutput::Binary { media_type, data } => self.offload(call_id, &media_type, data, None).await,
        }
    }

    async fn offload(
        &self,
        call_id: &str,
        media_type: &str,
        data: Vec<u8>,
        preview: Option<String>,
    ) -> ToolCallResult {
        match self
            .artifacts
            .persist(&self.session_id, media_type, &data, preview)
            .await
        {
            Ok(artifact) => ToolCallResult::artifact(call_id, &artifact),
            Err(e) => {
                warn!(error = %e, media_type, "Failed to persist artifact");
                ToolCallResult::error(call_id, format!("failed to persist tool output: {}", e))
            }
        }
    }
}

fn preview_of(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
