//! Sessions - one environment and one linear history per session
//!
//! The [`SessionManager`] owns every session, provisions its environment,
//! runs tasks through the orchestrator and tears the environment down on
//! delete. Task runs are sequential per session: a second run while one is
//! in flight is rejected with [`SessionError::NotReady`].

pub mod manager;
pub mod state;

pub use manager::{EnvironmentHealth, SessionManager, SessionManagerConfig, TaskReport};
pub use state::{InvalidTransition, Session, SessionStatus, SessionSummary};

use crate::agent::AgentError;
use crate::environment::EnvironmentError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {id} is {status}")]
    NotReady { id: String, status: SessionStatus },

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("failed to provision environment for session {id}: {source}")]
    ProvisioningFailed {
        id: String,
        #[source]
        source: EnvironmentError,
    },

    #[error("environment for session {id} is unhealthy: {reason}")]
    EnvironmentUnhealthy { id: String, reason: String },

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "session_not_found",
            SessionError::NotReady { .. } => "session_not_ready",
            SessionError::InvalidTask(_) => "invalid_task",
            SessionError::ProvisioningFailed { .. } => "provisioning_failed",
            SessionError::EnvironmentUnhealthy { .. } => "environment_unhealthy",
            SessionError::Agent(e) => e.code(),
        }
    }

    fn not_ready(transition: InvalidTransition, id: &str) -> Self {
        SessionError::NotReady {
            id: id.to_string(),
            status: transition.from,
        }
    }
}
