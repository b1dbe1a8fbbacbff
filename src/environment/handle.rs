//! Environment Handle - one provisioned environment and its resources
//!
//! Status flow: Starting -> Ready -> Active -> Stopping

use std::time::{Duration, Instant};

use tokio::process::Child;
use tracing::warn;

/// Status of an environment
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentStatus {
    /// Process started, tool server not answering yet
    Starting,
    /// Health check passed (warm, unassigned)
    Ready,
    /// Owned by a session
    Active,
    Stopping,
    Failed(String),
}

/// Represents a single environment instance
pub struct EnvironmentHandle {
    /// Unique identifier (e.g., "env-01926abc...")
    pub id: String,
    /// Base URL of the environment's tool server
    pub endpoint: String,
    /// Tool server process, when this host spawned it
    process: Option<Child>,
    pub status: EnvironmentStatus,
    pub created_at: Instant,
}

impl EnvironmentHandle {
    /// Handle for an environment this host does not own a process for
    pub fn external(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            process: None,
            status: EnvironmentStatus::Ready,
            created_at: Instant::now(),
        }
    }

    /// Handle for a spawned tool server process
    pub fn with_process(id: impl Into<String>, endpoint: impl Into<String>, process: Child) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            process: Some(process),
            status: EnvironmentStatus::Starting,
            created_at: Instant::now(),
        }
    }

    pub fn mark_ready(&mut self) {
        self.status = EnvironmentStatus::Ready;
    }

    pub fn mark_active(&mut self) {
        self.status = EnvironmentStatus::Active;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = EnvironmentStatus::Failed(error);
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, EnvironmentStatus::Ready)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Exit status if the process has already exited
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        match self.process.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    /// Kill the process (if any) and wait for it to exit
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.status = EnvironmentStatus::Stopping;

        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.start_kill() {
                // Process might already be dead
                warn!(env_id = %self.id, error = %e, "Failed to signal environment process");
            }
            child.wait().await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("pid", &self.pid())
            .field("status", &self.status)
            .field("age", &self.age())
            .finish()
    }
}
