//! The agent configuration value shared by every session

use std::sync::Arc;

use tracing::info;

use super::prompt::build_system_prompt;
use crate::config::AgentConfig;
use crate::model::ModelClient;
use crate::provider::ProviderClient;
use crate::tools::{ArtifactStore, Catalog, LocalToolExecutor, ToolRouter};

/// Immutable bundle of configuration, catalog and clients
///
/// Built once at startup and shared through `Arc`; replaces any process-wide
/// client or catalog state.
pub struct Agent {
    config: AgentConfig,
    catalog: Arc<Catalog>,
    model: Arc<dyn ModelClient>,
    local: Arc<dyn LocalToolExecutor>,
    artifacts: Arc<ArtifactStore>,
    system_prompt: String,
}

impl Agent {
    /// Discover provider tools and assemble the agent
    ///
    /// # Arguments
    /// * `config` - Loop limits, timeouts and the optional allow-list
    /// * `providers` - Provider clients in registration order
    /// * `model` - Model backend
    /// * `local` - Executor for environment-hosted tools
    /// * `artifacts` - Store for offloaded tool outputs
    pub async fn build(
        config: AgentConfig,
        providers: Vec<Arc<dyn ProviderClient>>,
        model: Arc<dyn ModelClient>,
        local: Arc<dyn LocalToolExecutor>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        let catalog = Catalog::build(
            &providers,
            local.descriptors(),
            config.allowed_tools.as_deref(),
        )
        .await;

        Self::from_catalog(config, Arc::new(catalog), model, local, artifacts)
    }

    /// Assemble the agent around an existing catalog
    pub fn from_catalog(
        config: AgentConfig,
        catalog: Arc<Catalog>,
        model: Arc<dyn ModelClient>,
        local: Arc<dyn LocalToolExecutor>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| build_system_prompt(&catalog));

        info!(
            model = %model.model(),
            tools = catalog.len(),
            max_turns = config.max_turns,
            "Agent ready"
        );

        Self {
            config,
            catalog,
            model,
            local,
            artifacts,
            system_prompt,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Tool router bound to one session's environment
    pub fn router(&self, session_id: &str, environment_endpoint: &str) -> ToolRouter {
        ToolRouter::new(
            self.catalog.clone(),
            self.local.clone(),
            self.artifacts.clone(),
            session_id,
            environment_endpoint,
            self.config.tool_timeout,
            self.config.inline_limit,
        )
    }
}
