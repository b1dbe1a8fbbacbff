//! Toolvisor - tool orchestration core for model-driven task execution
//!
//! This library lets a generative model complete a task by repeatedly invoking
//! tools that live in remote providers or inside a per-session sandboxed
//! execution environment.
//!
//! # Modules
//!
//! - `provider` - JSON-RPC client for remote tool providers (`tools/list`, `tools/call`)
//! - `tools` - tool descriptors, the aggregated catalog, the router and the local executor
//! - `model` - model API clients (Anthropic Messages, Ollama chat)
//! - `agent` - agent configuration value and the conversation orchestrator (turn loop)
//! - `environment` - per-session execution environment provisioning
//! - `session` - session lifecycle, history and counters
//! - `api` - HTTP surface for sessions, health and metrics
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - tracing subscriber and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use toolvisor::{Agent, AgentConfig, SessionManager};
//!
//! let agent = Arc::new(Agent::build(AgentConfig::default(), providers, model, local, artifacts).await);
//! let sessions = SessionManager::new(agent, provisioner, Default::default())?;
//!
//! let session = sessions.create_session(Some("research".into())).await?;
//! let report = sessions.run_task(&session.id, "List the files in /workspace").await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod environment;
pub mod metrics;
pub mod model;
pub mod provider;
pub mod session;
pub mod telemetry;
pub mod tools;

// Re-export commonly used types at crate root for convenience
pub use agent::{Agent, Orchestrator, TaskOutcome, TaskStatus};
pub use config::{AgentConfig, ProviderConfig, ProviderSettings};
pub use session::{Session, SessionManager, SessionStatus};
pub use tools::{Catalog, ToolCallRequest, ToolCallResult, ToolDescriptor, ToolRouter};
