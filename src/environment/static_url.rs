//! Fixed-URL provisioner for local development
//!
//! Every session receives the same endpoint (e.g. a tool server container
//! started by hand on `http://localhost:8080`). Teardown is a no-op.

use async_trait::async_trait;
use tracing::debug;

use super::{EnvironmentError, EnvironmentHandle, Provisioner};

pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct StaticProvisioner {
    endpoint: String,
}

impl StaticProvisioner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for StaticProvisioner {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_ENDPOINT)
    }
}

#[async_trait]
impl Provisioner for StaticProvisioner {
    fn name(&self) -> &str {
        "static"
    }

    async fn provision(&self, session_id: &str) -> Result<EnvironmentHandle, EnvironmentError> {
        debug!(session_id, endpoint = %self.endpoint, "Using shared static environment");
        Ok(EnvironmentHandle::external(
            format!("static-{}", session_id),
            self.endpoint.clone(),
        ))
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<(), EnvironmentError> {
        debug!(env_id = %handle.id, "Static environment released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_share_endpoint() {
        let provisioner = StaticProvisioner::default();
        let a = provisioner.provision("a").await.unwrap();
        let b = provisioner.provision("b").await.unwrap();
        assert_eq!(a.endpoint, DEFAULT_LOCAL_ENDPOINT);
        assert_eq!(a.endpoint, b.endpoint);
        assert_ne!(a.id, b.id);
        provisioner.teardown(a).await.unwrap();
    }
}
