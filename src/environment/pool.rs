//! Environment Pool - pre-provisioned environments ready for sessions
//!
//! The pool keeps a set of warm environments so session creation does not
//! wait for a tool server to boot. Environments are never reused: teardown
//! destroys them and the replenisher creates fresh ones in the background.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Environment Pool                                               │
//! │                                                                 │
//! │  ┌───────────────┐     ┌───────────────┐     ┌───────────────┐  │
//! │  │  env (warm)   │     │  env (warm)   │     │  env (warm)   │  │
//! │  └───────────────┘     └───────────────┘     └───────────────┘  │
//! │         │                                                       │
//! │         ▼                                                       │
//! │    provision() ──► environment owned by a session               │
//! │         │          (falls back to a cold start when empty)      │
//! │         ▼                                                       │
//! │    teardown() ──► environment destroyed, replenish later        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::{EnvironmentError, EnvironmentHandle, Provisioner};
use crate::metrics::{POOL_ACTIVE_ENVIRONMENTS, POOL_WARM_ENVIRONMENTS};

/// Statistics about the pool state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Environments waiting for a session
    pub warm_count: usize,
    /// Environments currently owned by sessions
    pub active_count: usize,
    pub target_warm_size: usize,
    pub max_pool_size: usize,
}

pub struct EnvironmentPool {
    /// Provisioner that actually creates environments
    inner: Arc<dyn Provisioner>,
    warm: Mutex<Vec<EnvironmentHandle>>,
    /// Only raised while the warm lock is held
    active_count: AtomicUsize,
    target_warm_size: usize,
    /// Maximum total environments (warm + active)
    max_pool_size: usize,
}

impl EnvironmentPool {
    /// Create a new pool
    ///
    /// # Arguments
    /// * `inner` - Provisioner used for warm and cold starts
    /// * `target_warm_size` - Environments to keep pre-provisioned (e.g., 2)
    /// * `max_pool_size` - Maximum total environments allowed (e.g., 10)
    pub fn new(inner: Arc<dyn Provisioner>, target_warm_size: usize, max_pool_size: usize) -> Self {
        Self {
            inner,
            warm: Mutex::new(Vec::with_capacity(target_warm_size)),
            active_count: AtomicUsize::new(0),
            target_warm_size,
            max_pool_size: max_pool_size.max(1),
        }
    }

    /// Pre-provision `target_warm_size` environments
    ///
    /// Failures are logged and skipped; the replenisher retries later.
    pub async fn initialize(&self) {
        info!(target = self.target_warm_size, "Pre-warming environments");
        self.replenish().await;
        let warm = self.warm.lock().await.len();
        info!(warm, "Environment pool initialized");
    }

    /// Top the warm set back up to target without exceeding the maximum
    pub async fn replenish(&self) {
        let (current_warm, current_active) = {
            let warm = self.warm.lock().await;
            (warm.len(), self.active_count.load(Ordering::SeqCst))
        };

        let total = current_warm + current_active;
        let needed = self.target_warm_size.saturating_sub(current_warm);
        let can_create = self.max_pool_size.saturating_sub(total);
        let to_create = needed.min(can_create);

        for _ in 0..to_create {
            let warm_id = format!("warm-{}", Uuid::now_v7());
            match self.inner.provision(&warm_id).await {
                Ok(handle) => {
                    let mut warm = self.warm.lock().await;
                    warm.push(handle);
                    POOL_WARM_ENVIRONMENTS.set(warm.len() as i64);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to create warm environment");
                    // Try again on the next tick
                    break;
                }
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let warm = self.warm.lock().await;

        PoolStats {
            warm_count: warm.len(),
            active_count: self.active_count.load(Ordering::SeqCst),
            target_warm_size: self.target_warm_size,
            max_pool_size: self.max_pool_size,
        }
    }

    /// Destroy every warm environment
    pub async fn shutdown(&self) {
        let handles: Vec<EnvironmentHandle> = {
            let mut warm = self.warm.lock().await;
            warm.drain(..).collect()
        };

        for handle in handles {
            let id = handle.id.clone();
            if let Err(e) = self.inner.teardown(handle).await {
                warn!(env_id = %id, error = %e, "Failed to destroy warm environment during shutdown");
            }
        }

        POOL_WARM_ENVIRONMENTS.set(0);
        info!("Environment pool shut down");
    }

    /// Start the background replenisher task
    pub fn start_replenisher(pool: Arc<EnvironmentPool>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                pool.replenish().await;
            }
        })
    }

    async fn claim_slot(&self) -> Result<Option<EnvironmentHandle>, EnvironmentError> {
        let mut warm = self.warm.lock().await;
        let active = self.active_count.load(Ordering::SeqCst);

        let handle = warm.pop();
        if handle.is_none() && active + warm.len() >= self.max_pool_size {
            return Err(EnvironmentError::Capacity {
                max: self.max_pool_size,
            });
        }

        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        POOL_WARM_ENVIRONMENTS.set(warm.len() as i64);
        POOL_ACTIVE_ENVIRONMENTS.set(active as i64);
        Ok(handle)
    }

    fn release_slot(&self) {
        let previous = self
            .active_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or_default();
        POOL_ACTIVE_ENVIRONMENTS.set(previous.saturating_sub(1) as i64);
    }
}

/// Holds a claimed slot during a cold start
///
/// Dropping the guard without `keep` gives the slot back, so a cold start
/// that fails or is abandoned mid-flight does not leak capacity.
struct SlotGuard<'a> {
    pool: &'a EnvironmentPool,
    kept: bool,
}

impl SlotGuard<'_> {
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.pool.release_slot();
        }
    }
}

#[async_trait]
impl Provisioner for EnvironmentPool {
    fn name(&self) -> &str {
        "pool"
    }

    async fn provision(&self, session_id: &str) -> Result<EnvironmentHandle, EnvironmentError> {
        match self.claim_slot().await? {
            Some(mut handle) => {
                handle.mark_active();
                info!(env_id = %handle.id, session_id, "Assigned warm environment");
                Ok(handle)
            }
            None => {
                info!(session_id, "No warm environment available, provisioning on demand");
                let slot = SlotGuard {
                    pool: self,
                    kept: false,
                };
                let mut handle = self.inner.provision(session_id).await?;
                slot.keep();
                handle.mark_active();
                Ok(handle)
            }
        }
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<(), EnvironmentError> {
        self.release_slot();
        self.inner.teardown(handle).await
    }
}
