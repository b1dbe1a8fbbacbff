//! Agent and provider configuration
//!
//! Provider settings are read once at startup from a JSON file:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "ecommerce": { "httpUrl": "http://localhost:8081/mcp", "description": "Shop tools" },
//!     "analytics": { "httpUrl": "http://localhost:8082/mcp", "enabled": false }
//!   }
//! }
//! ```
//!
//! Entry order in the file is the provider registration order.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Configuration for the agent and its conversation loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier passed to the model backend
    pub model: String,
    /// Maximum number of model calls per task run
    pub max_turns: usize,
    /// Output token limit per model call
    pub max_tokens: u32,
    /// Custom system prompt (built from the catalog if None)
    pub system_prompt: Option<String>,
    /// Bound on every individual tool dispatch
    pub tool_timeout: Duration,
    /// Text/structured outputs larger than this many bytes become artifacts
    pub inline_limit: usize,
    /// Restrict the catalog to these tool names (None = all tools)
    pub allowed_tools: Option<Vec<String>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_turns: 25,
            max_tokens: 4096,
            system_prompt: None,
            tool_timeout: Duration::from_secs(180),
            inline_limit: 16 * 1024,
            allowed_tools: None,
        }
    }
}

/// Static description of one remote tool provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub endpoint_url: String,
    pub enabled: bool,
    /// Opaque authentication mode; only "none" is understood today
    pub auth_mode: String,
    pub description: String,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint_url: endpoint_url.into(),
            enabled: true,
            auth_mode: "none".to_string(),
            description: String::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read provider settings {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid provider settings {path}: {reason}")]
    Invalid { path: String, reason: String },
}

/// Provider entries as they appear in the settings file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderEntry {
    #[serde(default)]
    http_url: Option<String>,
    #[serde(default)]
    endpoint_url: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    auth_mode: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Ordered set of configured providers
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub providers: Vec<ProviderConfig>,
}

impl ProviderSettings {
    /// Load provider settings from a JSON file
    ///
    /// A missing file yields an empty set. Disabled entries and entries
    /// without a URL are dropped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %shown, "Provider settings file not found, starting with no providers");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: shown,
                    source,
                })
            }
        };

        let settings = Self::parse(&raw).map_err(|reason| ConfigError::Invalid {
            path: shown.clone(),
            reason,
        })?;

        info!(path = %shown, providers = settings.providers.len(), "Loaded provider settings");
        Ok(settings)
    }

    /// Parse the `mcpServers` document, preserving entry order
    pub fn parse(raw: &str) -> Result<Self, String> {
        let document: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;

        let servers = match document.get("mcpServers") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(servers)) => servers,
            Some(_) => return Err("mcpServers must be an object".to_string()),
        };

        let mut providers = Vec::new();
        for (id, entry) in servers {
            let entry: ProviderEntry = serde_json::from_value(entry.clone())
                .map_err(|e| format!("provider {}: {}", id, e))?;

            if !entry.enabled {
                info!(provider = %id, "Provider disabled, skipping");
                continue;
            }

            let Some(endpoint_url) = entry.http_url.or(entry.endpoint_url) else {
                warn!(provider = %id, "Provider has no httpUrl, skipping");
                continue;
            };

            providers.push(ProviderConfig {
                id: id.clone(),
                endpoint_url,
                enabled: true,
                auth_mode: entry.auth_mode.unwrap_or_else(|| "none".to_string()),
                description: entry.description.unwrap_or_default(),
            });
        }

        Ok(Self { providers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_turns, 25);
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.tool_timeout, Duration::from_secs(180));
        assert_eq!(config.inline_limit, 16 * 1024);
        assert!(config.allowed_tools.is_none());
    }

    #[test]
    fn test_parse_preserves_file_order() {
        let raw = r#"{
            "mcpServers": {
                "zeta": { "httpUrl": "http://z/mcp" },
                "alpha": { "endpointUrl": "http://a/mcp", "description": "A" }
            }
        }"#;
        let settings = ProviderSettings::parse(raw).unwrap();
        let ids: Vec<_> = settings.providers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert_eq!(settings.providers[1].endpoint_url, "http://a/mcp");
        assert_eq!(settings.providers[1].auth_mode, "none");
    }

    #[test]
    fn test_parse_skips_disabled_and_urlless() {
        let raw = r#"{
            "mcpServers": {
                "off": { "httpUrl": "http://off/mcp", "enabled": false },
                "nourl": { "description": "broken" },
                "on": { "httpUrl": "http://on/mcp" }
            }
        }"#;
        let settings = ProviderSettings::parse(raw).unwrap();
        assert_eq!(settings.providers.len(), 1);
        assert_eq!(settings.providers[0].id, "on");
    }

    #[test]
    fn test_parse_without_servers_is_empty() {
        let settings = ProviderSettings::parse("{}").unwrap();
        assert!(settings.providers.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let settings = ProviderSettings::load("/nonexistent/toolvisor/settings.json").unwrap();
        assert!(settings.providers.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_object_servers() {
        assert!(ProviderSettings::parse(r#"{"mcpServers": []}"#).is_err());
    }
}
