//! Execution environments - one sandboxed tool server per session
//!
//! A [`Provisioner`] creates an environment for a session and tears it down
//! when the session is deleted. The session exclusively owns the returned
//! [`EnvironmentHandle`].
//!
//! - [`StaticProvisioner`] - every session shares one fixed URL (local development)
//! - [`ProcessProvisioner`] - spawns a tool server process per session and polls `/health`
//! - [`EnvironmentPool`] - keeps pre-provisioned environments warm in front of another provisioner

pub mod handle;
pub mod pool;
pub mod process;
pub mod static_url;

use std::time::Duration;

use async_trait::async_trait;

pub use handle::{EnvironmentHandle, EnvironmentStatus};
pub use pool::{EnvironmentPool, PoolStats};
pub use process::{ProcessConfig, ProcessProvisioner};
pub use static_url::StaticProvisioner;

/// Creates and destroys session environments
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Short name for logs and metric labels
    fn name(&self) -> &str;

    /// Create a ready-to-use environment for a session
    async fn provision(&self, session_id: &str) -> Result<EnvironmentHandle, EnvironmentError>;

    /// Release every resource held by the environment
    async fn teardown(&self, handle: EnvironmentHandle) -> Result<(), EnvironmentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("failed to start environment: {0}")]
    Spawn(String),

    #[error("environment not ready after {0:?}")]
    NotReady(Duration),

    #[error("environment capacity exhausted ({max} environments)")]
    Capacity { max: usize },

    #[error("failed to tear down environment {id}: {reason}")]
    Teardown { id: String, reason: String },

    #[error("environment unhealthy: {0}")]
    Unhealthy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EnvironmentError {
    pub fn code(&self) -> &'static str {
        match self {
            EnvironmentError::Spawn(_) => "environment_spawn_failed",
            EnvironmentError::NotReady(_) => "environment_not_ready",
            EnvironmentError::Capacity { .. } => "environment_capacity_exhausted",
            EnvironmentError::Teardown { .. } => "environment_teardown_failed",
            EnvironmentError::Unhealthy(_) => "environment_unhealthy",
            EnvironmentError::Io(_) => "environment_io_error",
        }
    }
}

/// `GET {endpoint}/health`; any 2xx is healthy
pub async fn check_health(client: &reqwest::Client, endpoint: &str) -> Result<(), EnvironmentError> {
    let url = format!("{}/health", endpoint.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| EnvironmentError::Unhealthy(e.to_string()))?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(EnvironmentError::Unhealthy(format!(
            "health check returned {}",
            response.status()
        )))
    }
}
